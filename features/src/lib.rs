//! Feature detection, description and geometric matching.

pub mod fast;
pub mod matcher;
pub mod orb;
pub mod ransac;

pub use fast::*;
pub use matcher::*;
pub use orb::*;
pub use ransac::*;

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("insufficient correspondences: {found} found, {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("no consistent geometry: {inliers} inliers, {required} required")]
    NoConsistentGeometry { inliers: usize, required: usize },
}
