//! Whole-set alignment for scan-mode captures: every adjacent pair of tiles
//! is registered by normalised cross-correlation over integer translations,
//! coarse to fine, and the offsets are chained into one frame.

use crate::canvas::{Canvas, CanvasError};
use crate::config::HolisticConfig;
use image::{GrayImage, RgbImage};
use mosaic_imgproc::{best_overlap, build_pyramid, to_gray, OverlapScore};
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HolisticError {
    #[error("tiles {left} and {right}: no admissible overlap")]
    NoOverlap { left: usize, right: usize },

    #[error("tiles {left} and {right}: peak correlation {ncc:.3} below {min:.3}")]
    WeakCorrelation {
        left: usize,
        right: usize,
        ncc: f64,
        min: f64,
    },

    #[error("composite failed: {0}")]
    Composite(#[from] CanvasError),
}

/// Translation of tile `left + 1` relative to tile `left`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOffset {
    pub left: usize,
    pub dx: i64,
    pub dy: i64,
    pub ncc: f64,
}

#[derive(Debug)]
pub struct HolisticAlignment {
    pub canvas: Canvas,
    pub pairs: Vec<PairOffset>,
    /// Position of every tile relative to the first.
    pub positions: Vec<(i64, i64)>,
}

pub struct HolisticAligner {
    config: HolisticConfig,
}

impl HolisticAligner {
    pub fn new(config: HolisticConfig) -> Self {
        Self { config }
    }

    /// Registers all adjacent pairs in parallel and composites the tiles in
    /// one pass. Any weak pair fails the whole alignment.
    pub fn align(&self, tiles: &[RgbImage], max_canvas_pixels: u64) -> Result<HolisticAlignment, HolisticError> {
        let grays: Vec<GrayImage> = tiles.par_iter().map(to_gray).collect();

        let pairs: Vec<PairOffset> = (0..grays.len().saturating_sub(1))
            .into_par_iter()
            .map(|i| self.register_pair(i, &grays[i], &grays[i + 1]))
            .collect::<Result<_, _>>()?;

        let mut positions = Vec::with_capacity(tiles.len());
        let mut pos = (0i64, 0i64);
        positions.push(pos);
        for p in &pairs {
            pos = (pos.0 + p.dx, pos.1 + p.dy);
            positions.push(pos);
        }

        let canvas = Canvas::from_placements(tiles, &positions, max_canvas_pixels)?;
        Ok(HolisticAlignment {
            canvas,
            pairs,
            positions,
        })
    }

    /// Offset of `right` in `left`'s frame.
    pub fn register_pair(&self, index: usize, left: &GrayImage, right: &GrayImage) -> Result<PairOffset, HolisticError> {
        let no_overlap = HolisticError::NoOverlap {
            left: index,
            right: index + 1,
        };

        let mut left_levels = build_pyramid(left, self.config.coarse_max_dim);
        let mut right_levels = build_pyramid(right, self.config.coarse_max_dim);
        let depth = left_levels.len().min(right_levels.len());
        left_levels.truncate(depth);
        right_levels.truncate(depth);

        let coarse = depth - 1;
        let (l, r) = (&left_levels[coarse], &right_levels[coarse]);
        let (lw, lh) = (l.width() as i64, l.height() as i64);
        let (rw, rh) = (r.width() as i64, r.height() as i64);
        let candidates: Vec<(i64, i64)> = (-(rw - 1)..lw)
            .flat_map(|dx| (-(rh - 1)..lh).map(move |dy| (dx, dy)))
            .collect();

        let mut best = best_overlap(l, r, &candidates, |s| self.admissible(s, l, r)).ok_or(no_overlap)?;
        debug!(pair = index, level = coarse, dx = best.dx, dy = best.dy, ncc = best.ncc, "coarse match");

        for level in (0..coarse).rev() {
            let (l, r) = (&left_levels[level], &right_levels[level]);
            let radius = self.config.refine_radius;
            let (cx, cy) = (best.dx * 2, best.dy * 2);
            let candidates: Vec<(i64, i64)> = (cx - radius..=cx + radius)
                .flat_map(|dx| (cy - radius..=cy + radius).map(move |dy| (dx, dy)))
                .collect();
            best = best_overlap(l, r, &candidates, |s| self.admissible(s, l, r)).ok_or(HolisticError::NoOverlap {
                left: index,
                right: index + 1,
            })?;
        }

        if best.ncc < self.config.min_correlation {
            return Err(HolisticError::WeakCorrelation {
                left: index,
                right: index + 1,
                ncc: best.ncc,
                min: self.config.min_correlation,
            });
        }

        debug!(pair = index, dx = best.dx, dy = best.dy, ncc = best.ncc, "pair registered");
        Ok(PairOffset {
            left: index,
            dx: best.dx,
            dy: best.dy,
            ncc: best.ncc,
        })
    }

    fn admissible(&self, score: &OverlapScore, left: &GrayImage, right: &GrayImage) -> bool {
        let smaller = (left.width() as u64 * left.height() as u64).min(right.width() as u64 * right.height() as u64);
        score.overlap_area() as f64 >= self.config.min_overlap_fraction * smaller as f64
    }
}
