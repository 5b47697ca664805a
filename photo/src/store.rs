//! Decoding tiles from and writing composites to storage.

use image::RgbImage;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source of decoded tiles and sink for the finished panorama.
pub trait ImageStore: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RgbImage, StoreError>;

    fn encode(&self, image: &RgbImage, path: &Path) -> Result<(), StoreError>;
}

/// Reads and writes image files; the format follows the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageStore;

impl ImageStore for FsImageStore {
    fn decode(&self, path: &Path) -> Result<RgbImage, StoreError> {
        Ok(image::open(path)?.to_rgb8())
    }

    fn encode(&self, image: &RgbImage, path: &Path) -> Result<(), StoreError> {
        image.save(path)?;
        Ok(())
    }
}
