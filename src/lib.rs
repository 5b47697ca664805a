pub use mosaic_core as core;
pub use mosaic_features as features;
pub use mosaic_imgproc as imgproc;
pub use mosaic_photo as photo;

pub use mosaic_photo::{stitch, stitch_with, StitchConfig, StitchError, StitchReport, Stitcher};

pub mod logger;

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before stitching.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `MOSAIC_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), mosaic_core::Error> {
    mosaic_core::init_global_thread_pool(num_threads)
}
