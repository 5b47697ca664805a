//! Image processing primitives used by the stitching pipeline.

pub mod color;
pub mod geometry;
pub mod morph;
pub mod resize;
pub mod template_matching;

pub use color::*;
pub use geometry::*;
pub use morph::*;
pub use resize::*;
pub use template_matching::*;

pub type Result<T> = std::result::Result<T, ImgprocError>;

#[derive(Debug, thiserror::Error)]
pub enum ImgprocError {
    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

pub fn validate_image_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ImgprocError::DimensionMismatch(
            "Image dimensions must be non-zero".into(),
        ));
    }
    Ok(())
}
