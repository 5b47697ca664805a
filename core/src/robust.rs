//! Robust Estimation Module
//!
//! Provides a generic, seeded RANSAC implementation that can be used for any
//! model estimation task. The random generator is always seeded from the
//! configuration so that repeated runs over identical data agree.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::marker::PhantomData;

/// Configuration for robust estimation
#[derive(Debug, Clone)]
pub struct RobustConfig {
    /// Inlier threshold on [`RobustModel::compute_error`].
    pub threshold: f64,
    pub max_iterations: usize,
    /// Target probability of having drawn at least one outlier-free sample.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x6d6f_7361_6963,
        }
    }
}

impl RobustConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Result of robust estimation
#[derive(Debug, Clone)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Mean error over the inliers, infinite when there are none.
    pub residual: f64,
    pub iterations: usize,
}

impl<M> RobustResult<M> {
    fn empty(n: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
            residual: f64::INFINITY,
            iterations: 0,
        }
    }
}

/// Trait for models that can be estimated robustly
pub trait RobustModel<D> {
    type Model: Clone;

    /// Minimum number of data points required to estimate the model
    fn min_sample_size(&self) -> usize;

    /// Estimate model from a sample (minimal or larger)
    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    /// Compute error for a single data point against the model
    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;

    /// Samples for which no stable model exists, e.g. collinear points.
    fn is_degenerate(&self, _sample: &[&D]) -> bool {
        false
    }
}

/// Generic RANSAC engine
pub struct Ransac<D, M: RobustModel<D>> {
    config: RobustConfig,
    _phantom: PhantomData<(D, M)>,
}

impl<D, M: RobustModel<D>> Ransac<D, M> {
    pub fn new(config: RobustConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &RobustConfig {
        &self.config
    }

    /// Runs the hypothesise-and-verify loop, then refits the best model on
    /// all of its inliers. The refit replaces the sampled model only when it
    /// keeps at least as much support.
    pub fn run(&self, estimator: &M, data: &[D]) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        if n < k || k == 0 {
            return RobustResult::empty(n);
        }

        let mut best = RobustResult::empty(n);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut budget = self.config.max_iterations;
        let mut iterations = 0;

        while iterations < budget {
            iterations += 1;

            let sample: Vec<&D> = rand::seq::index::sample(&mut rng, n, k)
                .into_iter()
                .map(|i| &data[i])
                .collect();

            if estimator.is_degenerate(&sample) {
                continue;
            }

            let Some(model) = estimator.estimate(&sample) else {
                continue;
            };

            let (inliers, num_inliers, residual) = self.score(estimator, &model, data);
            if num_inliers > best.num_inliers
                || (num_inliers == best.num_inliers && num_inliers > 0 && residual < best.residual)
            {
                best = RobustResult {
                    model: Some(model),
                    inliers,
                    num_inliers,
                    residual,
                    iterations,
                };
                budget = budget.min(adaptive_iterations(
                    num_inliers as f64 / n as f64,
                    k,
                    self.config.confidence,
                    self.config.max_iterations,
                ));
            }
        }

        best.iterations = iterations;
        if best.num_inliers >= k {
            self.refit(estimator, data, best)
        } else {
            best
        }
    }

    fn refit(&self, estimator: &M, data: &[D], best: RobustResult<M::Model>) -> RobustResult<M::Model> {
        let support: Vec<&D> = data
            .iter()
            .zip(&best.inliers)
            .filter_map(|(d, &is_inlier)| is_inlier.then_some(d))
            .collect();

        let Some(model) = estimator.estimate(&support) else {
            return best;
        };

        let (inliers, num_inliers, residual) = self.score(estimator, &model, data);
        if num_inliers >= best.num_inliers {
            RobustResult {
                model: Some(model),
                inliers,
                num_inliers,
                residual,
                iterations: best.iterations,
            }
        } else {
            best
        }
    }

    fn score(&self, estimator: &M, model: &M::Model, data: &[D]) -> (Vec<bool>, usize, f64) {
        let mut inliers = vec![false; data.len()];
        let mut num_inliers = 0;
        let mut total_error = 0.0;

        for (j, d) in data.iter().enumerate() {
            let err = estimator.compute_error(model, d);
            if err <= self.config.threshold {
                inliers[j] = true;
                num_inliers += 1;
                total_error += err;
            }
        }

        let residual = if num_inliers > 0 {
            total_error / num_inliers as f64
        } else {
            f64::INFINITY
        };
        (inliers, num_inliers, residual)
    }
}

/// Number of draws needed to hit an all-inlier sample with the requested
/// confidence, given the current inlier ratio.
pub fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64, cap: usize) -> usize {
    let p_good_sample = inlier_ratio.clamp(0.0, 1.0).powi(sample_size as i32);
    if p_good_sample >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good_sample <= f64::EPSILON {
        return cap;
    }

    let needed = (1.0 - confidence.clamp(0.0, 1.0 - 1e-12)).ln() / (1.0 - p_good_sample).ln();
    if !needed.is_finite() || needed < 0.0 {
        return cap;
    }
    (needed.ceil() as usize).clamp(1, cap)
}
