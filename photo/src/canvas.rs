//! The growing composite and the warp-and-merge step.

use crate::config::CanvasBounds;
use image::{GrayImage, Luma, RgbImage};
use mosaic_core::Homography;
use mosaic_imgproc::{blit, warp_perspective_into, ImgprocError, Interpolation, PixelRect, MASK_VALID};
use nalgebra::Point2;

/// Largest accepted change in tile area through a warp, either way.
const MAX_AREA_RATIO: f64 = 16.0;

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("canvas of {width}x{height} exceeds the {limit} pixel limit")]
    TooLarge { width: u64, height: u64, limit: u64 },

    #[error("degenerate warp: {0}")]
    Degenerate(String),

    #[error(transparent)]
    Warp(#[from] ImgprocError),
}

/// Composite image, its coverage mask and where the first tile's origin
/// sits inside it.
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbImage,
    mask: GrayImage,
    origin: (i64, i64),
    tiles: usize,
}

impl Canvas {
    pub fn from_tile(tile: &RgbImage) -> Self {
        let (w, h) = tile.dimensions();
        Self {
            image: tile.clone(),
            mask: GrayImage::from_pixel(w, h, Luma([MASK_VALID])),
            origin: (0, 0),
            tiles: 1,
        }
    }

    /// Places every tile at its integer offset from the first tile and
    /// composites them in order, later tiles on top.
    pub fn from_placements(tiles: &[RgbImage], offsets: &[(i64, i64)], max_pixels: u64) -> Result<Self, CanvasError> {
        if tiles.is_empty() || tiles.len() != offsets.len() {
            return Err(CanvasError::Degenerate(format!(
                "{} tiles for {} offsets",
                tiles.len(),
                offsets.len()
            )));
        }

        let mut x0 = i64::MAX;
        let mut y0 = i64::MAX;
        let mut x1 = i64::MIN;
        let mut y1 = i64::MIN;
        for (tile, &(ox, oy)) in tiles.iter().zip(offsets) {
            x0 = x0.min(ox);
            y0 = y0.min(oy);
            x1 = x1.max(ox + tile.width() as i64);
            y1 = y1.max(oy + tile.height() as i64);
        }
        let (width, height) = checked_size((x1 - x0) as f64, (y1 - y0) as f64, max_pixels)?;

        let mut image = RgbImage::new(width, height);
        let mut mask = GrayImage::new(width, height);
        for (tile, &(ox, oy)) in tiles.iter().zip(offsets) {
            blit(&mut image, &mut mask, tile, None, (ox - x0) as u32, (oy - y0) as u32)?;
        }

        Ok(Self {
            image,
            mask,
            origin: (-x0, -y0),
            tiles: tiles.len(),
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Position of the first tile's top-left pixel in canvas coordinates.
    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    pub fn tile_count(&self) -> usize {
        self.tiles
    }

    /// Builds the canvas that results from warping `src` through
    /// `src_to_canvas` onto this one. The new tile wins in overlaps.
    ///
    /// On success the returned canvas supersedes `self`; on error `self`
    /// is still the valid composite.
    pub fn merge(
        &self,
        src: &RgbImage,
        src_to_canvas: &Homography,
        bounds: CanvasBounds,
        max_pixels: u64,
    ) -> Result<Canvas, CanvasError> {
        let (sw, sh) = src.dimensions();
        let (cw, ch) = self.image.dimensions();

        let corners = src_to_canvas
            .project_corners(sw, sh)
            .ok_or_else(|| CanvasError::Degenerate("tile corner maps to infinity".into()))?;
        check_quad(&corners, sw, sh)?;

        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor();
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor();
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).ceil();
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).ceil();

        let x0 = min_x.min(0.0);
        let y0 = min_y.min(0.0);
        let tight_w = max_x.max(cw as f64) - x0;
        let tight_h = max_y.max(ch as f64) - y0;
        let (w, h) = match bounds {
            CanvasBounds::Tight => (tight_w, tight_h),
            CanvasBounds::Conservative => (
                tight_w.max(cw as f64 + sw as f64),
                tight_h.max(ch.max(sh) as f64),
            ),
        };
        let (width, height) = checked_size(w, h, max_pixels)?;

        let (shift_x, shift_y) = (-x0 as u32, -y0 as u32);
        let mut image = RgbImage::new(width, height);
        let mut mask = GrayImage::new(width, height);
        blit(&mut image, &mut mask, &self.image, Some(&self.mask), shift_x, shift_y)?;

        let placed = src_to_canvas.translated(shift_x as f64, shift_y as f64);
        let roi = PixelRect::new(
            (min_x - x0) as u32,
            (min_y - y0) as u32,
            (max_x - x0) as u32,
            (max_y - y0) as u32,
        );
        let written = warp_perspective_into(&mut image, &mut mask, src, &placed, roi, Interpolation::Linear)?;
        if written == 0 {
            return Err(CanvasError::Degenerate("warped tile covers no pixel".into()));
        }

        Ok(Canvas {
            image,
            mask,
            origin: (self.origin.0 + shift_x as i64, self.origin.1 + shift_y as i64),
            tiles: self.tiles + 1,
        })
    }
}

fn checked_size(w: f64, h: f64, max_pixels: u64) -> Result<(u32, u32), CanvasError> {
    if !(w.is_finite() && h.is_finite()) || w < 1.0 || h < 1.0 {
        return Err(CanvasError::Degenerate(format!("canvas size {w}x{h}")));
    }
    if w * h > max_pixels as f64 || w > u32::MAX as f64 || h > u32::MAX as f64 {
        return Err(CanvasError::TooLarge {
            width: w as u64,
            height: h as u64,
            limit: max_pixels,
        });
    }
    Ok((w as u32, h as u32))
}

/// The warped outline must stay a convex, non-mirrored quad of comparable area.
fn check_quad(corners: &[Point2<f64>; 4], w: u32, h: u32) -> Result<(), CanvasError> {
    if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(CanvasError::Degenerate("non-finite corner".into()));
    }

    let turns: Vec<f64> = (0..4)
        .map(|i| {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            let c = corners[(i + 2) % 4];
            (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
        })
        .collect();
    if turns.iter().any(|&t| t <= 0.0) {
        return Err(CanvasError::Degenerate("warp folds or mirrors the tile".into()));
    }

    let area = 0.5
        * (0..4)
            .map(|i| {
                let a = corners[i];
                let b = corners[(i + 1) % 4];
                a.x * b.y - b.x * a.y
            })
            .sum::<f64>();
    let ratio = area / (w as f64 * h as f64);
    if !(1.0 / MAX_AREA_RATIO..=MAX_AREA_RATIO).contains(&ratio) {
        return Err(CanvasError::Degenerate(format!("area changes by a factor of {ratio:.3}")));
    }
    Ok(())
}
