//! Panorama stitching for microscope tiles.
//!
//! A run first tries to align the whole tile sequence at once by
//! translation-only correlation. When that fails it falls back to merging
//! tiles one by one onto a growing canvas using ORB features, cross-checked
//! matching and RANSAC homographies.
//!
//! # Example
//!
//! ```no_run
//! # use mosaic_photo::stitch;
//! # use std::path::Path;
//! let report = stitch(&["left.png", "middle.png", "right.png"], Path::new("panorama.jpg"))?;
//! println!("wrote {report}");
//! # Ok::<(), mosaic_photo::StitchError>(())
//! ```

pub mod canvas;
pub mod config;
pub mod error;
pub mod holistic;
pub mod report;
pub mod stitcher;
pub mod store;

pub use canvas::{Canvas, CanvasError};
pub use config::*;
pub use error::{ErrorKind, Result, StitchError};
pub use holistic::{HolisticAligner, HolisticAlignment, HolisticError, PairOffset};
pub use report::{DecodeFailure, StitchReport};
pub use stitcher::*;
pub use store::{FsImageStore, ImageStore, StoreError};

use image::RgbImage;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Stitches the image files at `paths`, in order, and writes the result to
/// `output` with default settings.
pub fn stitch<P: AsRef<Path> + Sync>(paths: &[P], output: &Path) -> Result<StitchReport> {
    stitch_with(&FsImageStore, &StitchConfig::default(), paths, output)
}

/// [`stitch`] with an explicit store and configuration.
///
/// Tiles that fail to decode are reported and left out; the run fails only
/// if fewer than two remain, in which case the error carries the failures.
pub fn stitch_with<S, P>(store: &S, config: &StitchConfig, paths: &[P], output: &Path) -> Result<StitchReport>
where
    S: ImageStore + ?Sized,
    P: AsRef<Path> + Sync,
{
    let decoded: Vec<std::result::Result<RgbImage, StoreError>> =
        paths.par_iter().map(|p| store.decode(p.as_ref())).collect();

    let mut tiles = Vec::with_capacity(paths.len());
    let mut tile_index = Vec::with_capacity(paths.len());
    let mut decode_failures = Vec::new();
    for (index, (path, result)) in paths.iter().zip(decoded).enumerate() {
        match result {
            Ok(img) => {
                tiles.push(img);
                tile_index.push(index);
            }
            Err(e) => {
                let failure = StitchError::DecodeFailure {
                    path: path.as_ref().to_path_buf(),
                    reason: e.to_string(),
                };
                warn!(error = %failure, "skipping unreadable tile");
                decode_failures.push(DecodeFailure {
                    index,
                    path: path.as_ref().to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }
    info!(decoded = tiles.len(), failed = decode_failures.len(), "tiles decoded");
    if tiles.len() < 2 {
        return Err(StitchError::InsufficientTiles {
            found: tiles.len(),
            decode_failures,
        });
    }

    let panorama = Stitcher::new(config.clone()).stitch_images(&tiles)?;

    store
        .encode(&panorama.image, output)
        .map_err(|e| StitchError::CompositeWriteFailure {
            path: output.to_path_buf(),
            reason: e.to_string(),
        })?;

    let (width, height) = panorama.dimensions();
    info!(output = %output.display(), width, height, strategy = %panorama.strategy, "panorama written");

    Ok(StitchReport {
        output: PathBuf::from(output),
        width,
        height,
        strategy: panorama.strategy,
        merged_tiles: panorama.merged_tiles.iter().map(|&i| tile_index[i]).collect(),
        skipped: panorama
            .skipped
            .into_iter()
            .map(|s| SkippedTile {
                index: tile_index[s.index],
                ..s
            })
            .collect(),
        decode_failures,
    })
}
