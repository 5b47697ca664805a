use crate::{ImgprocError, Result};
use image::{GrayImage, RgbImage};
use mosaic_core::Homography;
use rayon::prelude::*;

/// Mask value for pixels that carry image content.
pub const MASK_VALID: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// Axis-aligned pixel rectangle, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn of_image(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self::new(
            self.x0.min(width),
            self.y0.min(height),
            self.x1.min(width),
            self.y1.min(height),
        )
    }
}

fn sample_rgb(img: &RgbImage, x: f32, y: f32, interpolation: Interpolation) -> [u8; 3] {
    let (w, h) = img.dimensions();
    let raw = img.as_raw();
    let stride = w as usize * 3;

    match interpolation {
        Interpolation::Nearest => {
            let xi = (x.round().max(0.0) as u32).min(w - 1) as usize;
            let yi = (y.round().max(0.0) as u32).min(h - 1) as usize;
            let base = yi * stride + xi * 3;
            [raw[base], raw[base + 1], raw[base + 2]]
        }
        Interpolation::Linear => {
            let (x0, y0, x1, y1, fx, fy) = bilinear_taps(x, y, w, h);
            let mut out = [0u8; 3];
            for (c, o) in out.iter_mut().enumerate() {
                let at = |xx: usize, yy: usize| raw[yy * stride + xx * 3 + c] as f32;
                let v0 = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
                let v1 = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
                *o = (v0 * (1.0 - fy) + v1 * fy).round().clamp(0.0, 255.0) as u8;
            }
            out
        }
    }
}

/// Neighbouring taps and weights, replicating the border.
fn bilinear_taps(x: f32, y: f32, w: u32, h: u32) -> (usize, usize, usize, usize, f32, f32) {
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w as usize - 1);
    let y1 = (y0 + 1).min(h as usize - 1);
    (x0, y0, x1, y1, x - x0 as f32, y - y0 as f32)
}

/// Resamples `src` into `dst` through `src_to_dst`, visiting only `roi` of
/// the destination. A destination pixel is written when its preimage falls
/// inside the source pixel footprint; the mask is set for every written
/// pixel. Existing content is overwritten.
///
/// Returns the number of pixels written.
pub fn warp_perspective_into(
    dst: &mut RgbImage,
    dst_mask: &mut GrayImage,
    src: &RgbImage,
    src_to_dst: &Homography,
    roi: PixelRect,
    interpolation: Interpolation,
) -> Result<usize> {
    if dst.dimensions() != dst_mask.dimensions() {
        return Err(ImgprocError::DimensionMismatch(format!(
            "canvas {:?} vs mask {:?}",
            dst.dimensions(),
            dst_mask.dimensions()
        )));
    }
    crate::validate_image_size(src.width(), src.height())?;

    let dst_to_src = src_to_dst
        .inverse()
        .map_err(|e| ImgprocError::AlgorithmError(e.to_string()))?;

    let (dw, dh) = dst.dimensions();
    let roi = roi.clamp_to(dw, dh);
    if roi.is_empty() {
        return Ok(0);
    }

    let (sw, sh) = (src.width() as f64, src.height() as f64);
    let stride = dw as usize * 3;
    let rows = roi.y0 as usize..roi.y1 as usize;

    let written: usize = dst
        .par_chunks_mut(stride)
        .zip(dst_mask.par_chunks_mut(dw as usize))
        .enumerate()
        .filter(|(y, _)| rows.contains(y))
        .map(|(y, (row, mask_row))| {
            let mut count = 0usize;
            for x in roi.x0..roi.x1 {
                let Some(p) = dst_to_src.transform_point(x as f64, y as f64) else {
                    continue;
                };
                if p.x < -0.5 || p.y < -0.5 || p.x >= sw - 0.5 || p.y >= sh - 0.5 {
                    continue;
                }
                let px = sample_rgb(src, p.x as f32, p.y as f32, interpolation);
                let xi = x as usize;
                row[xi * 3..xi * 3 + 3].copy_from_slice(&px);
                mask_row[xi] = MASK_VALID;
                count += 1;
            }
            count
        })
        .sum();

    Ok(written)
}

/// Copies `src` into `dst` with its origin at integer `(ox, oy)`. With a
/// source mask only masked pixels are copied.
pub fn blit(
    dst: &mut RgbImage,
    dst_mask: &mut GrayImage,
    src: &RgbImage,
    src_mask: Option<&GrayImage>,
    ox: u32,
    oy: u32,
) -> Result<()> {
    let (sw, sh) = src.dimensions();
    let (dw, dh) = dst.dimensions();
    if ox as u64 + sw as u64 > dw as u64 || oy as u64 + sh as u64 > dh as u64 {
        return Err(ImgprocError::DimensionMismatch(format!(
            "{sw}x{sh} at ({ox}, {oy}) does not fit in {dw}x{dh}"
        )));
    }
    if let Some(mask) = src_mask {
        if mask.dimensions() != (sw, sh) {
            return Err(ImgprocError::DimensionMismatch("source mask size".into()));
        }
    }

    let src_raw = src.as_raw();
    let dst_raw: &mut [u8] = &mut *dst;
    let mask_raw: &mut [u8] = &mut *dst_mask;
    let dst_stride = dw as usize * 3;
    let src_stride = sw as usize * 3;

    for y in 0..sh as usize {
        let dy = y + oy as usize;
        for x in 0..sw as usize {
            let valid = src_mask.map_or(true, |m| m.as_raw()[y * sw as usize + x] != 0);
            if !valid {
                continue;
            }
            let dx = x + ox as usize;
            let s = y * src_stride + x * 3;
            let d = dy * dst_stride + dx * 3;
            dst_raw[d..d + 3].copy_from_slice(&src_raw[s..s + 3]);
            mask_raw[dy * dw as usize + dx] = MASK_VALID;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 77]))
    }

    #[test]
    fn warp_translation_moves_content() {
        let src = gradient(8, 6);
        let mut dst = RgbImage::new(20, 10);
        let mut mask = GrayImage::new(20, 10);
        let h = Homography::translation(5.0, 2.0);

        let written = warp_perspective_into(
            &mut dst,
            &mut mask,
            &src,
            &h,
            PixelRect::of_image(20, 10),
            Interpolation::Linear,
        )
        .unwrap();

        assert_eq!(written, 8 * 6);
        assert_eq!(dst.get_pixel(5, 2), src.get_pixel(0, 0));
        assert_eq!(dst.get_pixel(12, 7), src.get_pixel(7, 5));
        assert_eq!(mask.get_pixel(4, 2)[0], 0);
        assert_eq!(mask.get_pixel(13, 7)[0], 0);
        assert_eq!(mask.get_pixel(12, 7)[0], MASK_VALID);
    }

    #[test]
    fn warp_respects_roi() {
        let src = gradient(8, 6);
        let mut dst = RgbImage::new(8, 6);
        let mut mask = GrayImage::new(8, 6);
        let written = warp_perspective_into(
            &mut dst,
            &mut mask,
            &src,
            &Homography::identity(),
            PixelRect::new(0, 0, 4, 6),
            Interpolation::Nearest,
        )
        .unwrap();
        assert_eq!(written, 4 * 6);
        assert_eq!(mask.get_pixel(5, 0)[0], 0);
    }

    #[test]
    fn warp_rejects_mismatched_mask() {
        let src = gradient(4, 4);
        let mut dst = RgbImage::new(4, 4);
        let mut mask = GrayImage::new(3, 4);
        let res = warp_perspective_into(
            &mut dst,
            &mut mask,
            &src,
            &Homography::identity(),
            PixelRect::of_image(4, 4),
            Interpolation::Linear,
        );
        assert!(matches!(res, Err(ImgprocError::DimensionMismatch(_))));
    }

    #[test]
    fn blit_with_mask_copies_only_valid_pixels() {
        let src = gradient(3, 3);
        let mut src_mask = GrayImage::new(3, 3);
        src_mask.put_pixel(1, 1, Luma([MASK_VALID]));

        let mut dst = RgbImage::new(6, 6);
        let mut mask = GrayImage::new(6, 6);
        blit(&mut dst, &mut mask, &src, Some(&src_mask), 2, 3).unwrap();

        assert_eq!(dst.get_pixel(3, 4), src.get_pixel(1, 1));
        assert_eq!(mask.get_pixel(3, 4)[0], MASK_VALID);
        assert_eq!(mask.get_pixel(2, 3)[0], 0);
        assert!(blit(&mut dst, &mut mask, &src, None, 4, 0).is_err());
    }
}
