//! Normalised cross-correlation between two images over their overlap.
//!
//! Unlike classic template matching the second image may hang over any edge
//! of the first; only the shared rectangle is scored.

use image::GrayImage;
use rayon::prelude::*;

/// Score of one placement of `moving` inside the frame of `fixed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapScore {
    pub dx: i64,
    pub dy: i64,
    /// Zero-mean normalised cross-correlation in `[-1, 1]`; 0 when either
    /// side of the overlap has no variance.
    pub ncc: f64,
    pub overlap_width: u32,
    pub overlap_height: u32,
}

impl OverlapScore {
    pub fn overlap_area(&self) -> u64 {
        self.overlap_width as u64 * self.overlap_height as u64
    }
}

/// Shared rectangle when `moving`'s origin sits at `(dx, dy)` in `fixed`.
/// Returned in `fixed` coordinates as `(x0, y0, x1, y1)`.
pub fn overlap_rect(
    fixed: (u32, u32),
    moving: (u32, u32),
    dx: i64,
    dy: i64,
) -> Option<(i64, i64, i64, i64)> {
    let x0 = dx.max(0);
    let y0 = dy.max(0);
    let x1 = (dx + moving.0 as i64).min(fixed.0 as i64);
    let y1 = (dy + moving.1 as i64).min(fixed.1 as i64);
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

/// NCC of `moving` placed at `(dx, dy)` over `fixed`, `None` without overlap.
pub fn overlap_ncc(fixed: &GrayImage, moving: &GrayImage, dx: i64, dy: i64) -> Option<OverlapScore> {
    let (x0, y0, x1, y1) = overlap_rect(fixed.dimensions(), moving.dimensions(), dx, dy)?;

    let fw = fixed.width() as usize;
    let mw = moving.width() as usize;
    let f_raw = fixed.as_raw();
    let m_raw = moving.as_raw();

    let mut sum_f = 0.0f64;
    let mut sum_m = 0.0f64;
    let mut sum_ff = 0.0f64;
    let mut sum_mm = 0.0f64;
    let mut sum_fm = 0.0f64;

    for y in y0..y1 {
        let f_row = y as usize * fw;
        let m_row = (y - dy) as usize * mw;
        for x in x0..x1 {
            let f = f_raw[f_row + x as usize] as f64;
            let m = m_raw[m_row + (x - dx) as usize] as f64;
            sum_f += f;
            sum_m += m;
            sum_ff += f * f;
            sum_mm += m * m;
            sum_fm += f * m;
        }
    }

    let n = ((x1 - x0) * (y1 - y0)) as f64;
    let var_f = sum_ff - sum_f * sum_f / n;
    let var_m = sum_mm - sum_m * sum_m / n;
    let cov = sum_fm - sum_f * sum_m / n;
    let denom = (var_f * var_m).sqrt();
    let ncc = if var_f > 1e-6 * n && var_m > 1e-6 * n && denom > 1e-12 {
        (cov / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    Some(OverlapScore {
        dx,
        dy,
        ncc,
        overlap_width: (x1 - x0) as u32,
        overlap_height: (y1 - y0) as u32,
    })
}

/// Scores every candidate offset in parallel and returns the best one that
/// satisfies `admissible`. Ties go to the earlier candidate.
pub fn best_overlap<F>(
    fixed: &GrayImage,
    moving: &GrayImage,
    candidates: &[(i64, i64)],
    admissible: F,
) -> Option<OverlapScore>
where
    F: Fn(&OverlapScore) -> bool + Sync,
{
    candidates
        .par_iter()
        .enumerate()
        .filter_map(|(i, &(dx, dy))| {
            overlap_ncc(fixed, moving, dx, dy)
                .filter(|s| admissible(s))
                .map(|s| (i, s))
        })
        .reduce_with(|a, b| {
            if b.1.ncc > a.1.ncc || (b.1.ncc == a.1.ncc && b.0 < a.0) {
                b
            } else {
                a
            }
        })
        .map(|(_, s)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn texture(w: u32, h: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = (x / 3).wrapping_mul(73_856_093) ^ (y / 3).wrapping_mul(19_349_663) ^ seed;
            Luma([(v.wrapping_mul(2_654_435_761) >> 24) as u8])
        })
    }

    fn crop(src: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
        image::imageops::crop_imm(src, x, y, w, h).to_image()
    }

    #[test]
    fn overlap_rect_handles_negative_offsets() {
        assert_eq!(overlap_rect((10, 10), (4, 4), -2, 8), Some((0, 8, 2, 10)));
        assert_eq!(overlap_rect((10, 10), (4, 4), 10, 0), None);
    }

    #[test]
    fn identical_content_scores_one() {
        let scene = texture(60, 40, 1);
        let a = crop(&scene, 0, 0, 40, 40);
        let b = crop(&scene, 25, 0, 35, 40);
        let s = overlap_ncc(&a, &b, 25, 0).unwrap();
        assert!((s.ncc - 1.0).abs() < 1e-9);
        assert_eq!((s.overlap_width, s.overlap_height), (15, 40));
    }

    #[test]
    fn flat_overlap_scores_zero() {
        let a = texture(20, 20, 3);
        let b = GrayImage::from_pixel(20, 20, Luma([128]));
        assert_eq!(overlap_ncc(&a, &b, 5, 5).unwrap().ncc, 0.0);
    }

    #[test]
    fn best_overlap_finds_true_shift() {
        let scene = texture(80, 40, 9);
        let a = crop(&scene, 0, 0, 50, 40);
        let b = crop(&scene, 30, 0, 50, 40);
        let candidates: Vec<(i64, i64)> = (-40..50)
            .flat_map(|dx| (-30..30).map(move |dy| (dx, dy)))
            .collect();
        let best = best_overlap(&a, &b, &candidates, |s| s.overlap_area() >= 300).unwrap();
        assert_eq!((best.dx, best.dy), (30, 0));
    }
}
