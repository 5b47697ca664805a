//! Stitch orchestration.
//!
//! A run moves through `Idle -> HolisticAttempt -> FallbackPairwise ->
//! PairwiseLoop(i) -> Done`, leaving early on holistic success. The pairwise
//! loop is a fold over the tiles that carries the canvas, the reference
//! features and the tiles skipped so far.

use crate::canvas::Canvas;
use crate::config::{CancelToken, StitchConfig};
use crate::error::{ErrorKind, Result, StitchError};
use crate::holistic::HolisticAligner;
use image::RgbImage;
use mosaic_features::{estimate_homography, train_to_query_pairs, ImageFeatures, Matcher, Orb};
use mosaic_imgproc::{erode_mask, to_gray};
use rayon::prelude::*;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStage {
    Idle,
    HolisticAttempt,
    FallbackPairwise,
    PairwiseLoop(usize),
    Done,
}

impl fmt::Display for StitchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StitchStage::Idle => f.write_str("idle"),
            StitchStage::HolisticAttempt => f.write_str("holistic attempt"),
            StitchStage::FallbackPairwise => f.write_str("fallback pairwise"),
            StitchStage::PairwiseLoop(i) => write!(f, "pairwise loop (tile {i})"),
            StitchStage::Done => f.write_str("done"),
        }
    }
}

/// Strategy that produced a panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyUsed {
    Holistic,
    Pairwise,
}

impl fmt::Display for StrategyUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyUsed::Holistic => f.write_str("holistic"),
            StrategyUsed::Pairwise => f.write_str("pairwise"),
        }
    }
}

/// A tile the pairwise loop could not place.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTile {
    pub index: usize,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Panorama {
    pub image: RgbImage,
    pub strategy: StrategyUsed,
    /// Indices of the tiles present in the composite, in merge order.
    pub merged_tiles: Vec<usize>,
    pub skipped: Vec<SkippedTile>,
    /// Why holistic alignment was abandoned, when it was tried and failed.
    pub holistic_failure: Option<String>,
    /// Position of the first tile inside `image`.
    pub origin: (i64, i64),
}

impl Panorama {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Abort conditions of one run.
struct RunGuard<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a CancelToken>,
}

impl RunGuard<'_> {
    fn checkpoint(&self, stage: StitchStage) -> Result<()> {
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            info!(%stage, "stitch cancelled");
            return Err(StitchError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            info!(%stage, "stitch deadline exceeded");
            return Err(StitchError::DeadlineExceeded);
        }
        debug!(%stage, "entering stage");
        Ok(())
    }
}

/// State carried through the pairwise fold.
struct Progress {
    canvas: Canvas,
    reference: ImageFeatures,
    merged: Vec<usize>,
    skipped: Vec<SkippedTile>,
}

pub struct Stitcher {
    config: StitchConfig,
    orb: Orb,
    matcher: Matcher,
}

impl Default for Stitcher {
    fn default() -> Self {
        Self::new(StitchConfig::default())
    }
}

impl Stitcher {
    pub fn new(config: StitchConfig) -> Self {
        let orb = Orb::new(config.orb.clone());
        let matcher = Matcher::new(config.matcher.clone());
        Self { config, orb, matcher }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Stitches an ordered sequence of tiles into one image.
    pub fn stitch_images(&self, tiles: &[RgbImage]) -> Result<Panorama> {
        if tiles.len() < 2 {
            return Err(StitchError::InsufficientTiles {
                found: tiles.len(),
                decode_failures: Vec::new(),
            });
        }

        let _span = info_span!("stitch", tiles = tiles.len(), strategy = ?self.config.strategy).entered();
        let guard = RunGuard {
            deadline: self.config.timeout.map(|t| Instant::now() + t),
            cancel: self.config.cancel.as_ref(),
        };
        guard.checkpoint(StitchStage::Idle)?;

        let mut holistic_failure = None;
        if self.config.strategy.tries_holistic() {
            guard.checkpoint(StitchStage::HolisticAttempt)?;
            match HolisticAligner::new(self.config.holistic.clone()).align(tiles, self.config.max_canvas_pixels) {
                Ok(aligned) => {
                    let (w, h) = aligned.canvas.dimensions();
                    info!(width = w, height = h, stage = %StitchStage::Done, "holistic alignment succeeded");
                    return Ok(Panorama {
                        origin: aligned.canvas.origin(),
                        image: aligned.canvas.into_image(),
                        strategy: StrategyUsed::Holistic,
                        merged_tiles: (0..tiles.len()).collect(),
                        skipped: Vec::new(),
                        holistic_failure: None,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "holistic alignment failed");
                    holistic_failure = Some(e.to_string());
                }
            }
        }

        if !self.config.strategy.tries_pairwise() {
            return Err(StitchError::NoUsableComposite {
                holistic: holistic_failure.unwrap_or_else(|| "not attempted".into()),
            });
        }

        guard.checkpoint(StitchStage::FallbackPairwise)?;
        self.stitch_pairwise(tiles, &guard, holistic_failure)
    }

    fn stitch_pairwise(&self, tiles: &[RgbImage], guard: &RunGuard<'_>, holistic_failure: Option<String>) -> Result<Panorama> {
        let features: Vec<ImageFeatures> = tiles
            .par_iter()
            .map(|tile| self.orb.detect_and_compute(&to_gray(tile), None))
            .collect::<std::result::Result<_, _>>()?;
        debug!(
            keypoints = ?features.iter().map(ImageFeatures::len).collect::<Vec<_>>(),
            "tile features extracted"
        );

        let initial = Progress {
            canvas: Canvas::from_tile(&tiles[0]),
            reference: features[0].clone(),
            merged: vec![0],
            skipped: Vec::new(),
        };

        let progress = (1..tiles.len()).try_fold(initial, |mut acc, i| -> Result<Progress> {
            guard.checkpoint(StitchStage::PairwiseLoop(i))?;
            match self.merge_tile(&acc, i, &tiles[i], &features[i]) {
                Ok(canvas) => {
                    acc.reference = self.canvas_features(&canvas)?;
                    acc.canvas = canvas;
                    acc.merged.push(i);
                    let (w, h) = acc.canvas.dimensions();
                    info!(tile = i, tiles = acc.canvas.tile_count(), width = w, height = h, "tile merged");
                }
                Err(e) if e.is_recoverable() => {
                    warn!(tile = i, error = %e, "skipping tile");
                    acc.skipped.push(SkippedTile {
                        index: i,
                        kind: e.kind(),
                        reason: e.pair_detail(),
                    });
                }
                Err(e) => return Err(e),
            }
            Ok(acc)
        })?;

        if progress.merged.len() < 2 {
            return Err(StitchError::NoUsableComposite {
                holistic: holistic_failure.unwrap_or_else(|| "not attempted".into()),
            });
        }

        info!(
            merged = progress.merged.len(),
            skipped = progress.skipped.len(),
            stage = %StitchStage::Done,
            "pairwise stitching finished"
        );
        Ok(Panorama {
            origin: progress.canvas.origin(),
            image: progress.canvas.into_image(),
            strategy: StrategyUsed::Pairwise,
            merged_tiles: progress.merged,
            skipped: progress.skipped,
            holistic_failure,
        })
    }

    /// Matches `tile` against the current reference and warps it in.
    fn merge_tile(&self, acc: &Progress, index: usize, tile: &RgbImage, features: &ImageFeatures) -> Result<Canvas> {
        let good = self
            .matcher
            .good_matches(&acc.reference.descriptors, &features.descriptors);
        let pairs = train_to_query_pairs(&good, &acc.reference.keypoints, &features.keypoints);
        debug!(tile = index, good = pairs.len(), "matched against reference");

        let estimate = estimate_homography(&pairs, &self.config.ransac).map_err(|e| StitchError::from_pair(index, e))?;
        debug!(
            tile = index,
            inliers = estimate.num_inliers,
            residual = estimate.residual,
            translation = ?estimate.homography.as_translation(1e-3),
            "homography estimated"
        );

        acc.canvas
            .merge(tile, &estimate.homography, self.config.bounds, self.config.max_canvas_pixels)
            .map_err(|e| StitchError::NoConsistentGeometry {
                tile: index,
                reason: e.to_string(),
            })
    }

    /// Features of the composite, restricted to pixels whose descriptor
    /// patch lies entirely on covered content.
    fn canvas_features(&self, canvas: &Canvas) -> Result<ImageFeatures> {
        let reach = self.orb.config().max_patch_reach().ceil() as u32 + 1;
        let valid = erode_mask(canvas.mask(), reach);
        Ok(self.orb.detect_and_compute(&to_gray(canvas.image()), Some(&valid))?)
    }
}
