use mosaic_features::{MatcherConfig, OrbConfig, RansacConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which alignment strategies a run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyMode {
    /// Holistic alignment, pairwise feature matching when it fails.
    #[default]
    Auto,
    HolisticOnly,
    PairwiseOnly,
}

impl StrategyMode {
    pub fn tries_holistic(&self) -> bool {
        matches!(self, StrategyMode::Auto | StrategyMode::HolisticOnly)
    }

    pub fn tries_pairwise(&self) -> bool {
        matches!(self, StrategyMode::Auto | StrategyMode::PairwiseOnly)
    }
}

/// How the canvas grows when a tile is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanvasBounds {
    /// Bounding box of the prior canvas and the warped tile.
    #[default]
    Tight,
    /// At least `prior width + tile width` by the larger height.
    Conservative,
}

#[derive(Debug, Clone)]
pub struct HolisticConfig {
    /// Coarsest pyramid level has its larger side at or below this.
    pub coarse_max_dim: u32,
    /// Peak correlation every adjacent pair must reach.
    pub min_correlation: f64,
    /// Overlap area as a share of the smaller tile.
    pub min_overlap_fraction: f64,
    /// Search radius, in pixels, when refining on each finer level.
    pub refine_radius: i64,
}

impl Default for HolisticConfig {
    fn default() -> Self {
        Self {
            coarse_max_dim: 64,
            min_correlation: 0.8,
            min_overlap_fraction: 0.1,
            refine_radius: 2,
        }
    }
}

impl HolisticConfig {
    pub fn with_coarse_max_dim(mut self, dim: u32) -> Self {
        self.coarse_max_dim = dim;
        self
    }

    pub fn with_min_correlation(mut self, min_correlation: f64) -> Self {
        self.min_correlation = min_correlation;
        self
    }

    pub fn with_min_overlap_fraction(mut self, fraction: f64) -> Self {
        self.min_overlap_fraction = fraction;
        self
    }

    pub fn with_refine_radius(mut self, radius: i64) -> Self {
        self.refine_radius = radius;
        self
    }
}

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub strategy: StrategyMode,
    pub orb: OrbConfig,
    pub matcher: MatcherConfig,
    pub ransac: RansacConfig,
    pub holistic: HolisticConfig,
    pub bounds: CanvasBounds,
    /// Merges whose canvas would exceed this many pixels are rejected.
    pub max_canvas_pixels: u64,
    /// Wall-clock budget for one run, measured from its start.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyMode::Auto,
            orb: OrbConfig::default(),
            matcher: MatcherConfig::default(),
            ransac: RansacConfig::default(),
            holistic: HolisticConfig::default(),
            bounds: CanvasBounds::Tight,
            max_canvas_pixels: 400_000_000,
            timeout: None,
            cancel: None,
        }
    }
}

impl StitchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: StrategyMode) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_orb(mut self, orb: OrbConfig) -> Self {
        self.orb = orb;
        self
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_ransac(mut self, ransac: RansacConfig) -> Self {
        self.ransac = ransac;
        self
    }

    pub fn with_holistic(mut self, holistic: HolisticConfig) -> Self {
        self.holistic = holistic;
        self
    }

    pub fn with_bounds(mut self, bounds: CanvasBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_max_canvas_pixels(mut self, max: u64) -> Self {
        self.max_canvas_pixels = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Seeds the RANSAC sampler and the BRIEF sampling pattern.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ransac = self.ransac.with_seed(seed);
        self.orb = self.orb.with_pattern_seed(seed);
        self
    }
}
