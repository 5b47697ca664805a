//! RANSAC homography estimation
//!
//! Candidate matches are resolved to point pairs and fed through the generic
//! engine in `mosaic_core::robust` with a Hartley-normalised DLT solver.

use crate::{FeatureError, Result};
use mosaic_core::{Homography, KeyPoints, Matches, Ransac, RobustConfig, RobustModel};
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Smallest number of correspondences a homography is determined by.
pub const MIN_CORRESPONDENCES: usize = 4;

#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Reprojection threshold in pixels.
    pub threshold: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    /// Absolute support floor; below it there is no consistent geometry.
    pub min_inliers: usize,
    /// Support floor as a fraction of the correspondences offered.
    pub min_inlier_ratio: f64,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        let robust = RobustConfig::default();
        Self {
            threshold: 5.0,
            max_iterations: robust.max_iterations,
            confidence: robust.confidence,
            min_inliers: 15,
            min_inlier_ratio: 0.15,
            seed: robust.seed,
        }
    }
}

impl RansacConfig {
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

    pub fn with_min_inliers(mut self, min_inliers: usize) -> Self {
        self.min_inliers = min_inliers;
        self
    }

    pub fn with_min_inlier_ratio(mut self, ratio: f64) -> Self {
        self.min_inlier_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Inliers a model needs over `n` correspondences.
    pub fn required_inliers(&self, n: usize) -> usize {
        let relative = (self.min_inlier_ratio.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        self.min_inliers.max(relative).max(MIN_CORRESPONDENCES)
    }

    fn robust(&self) -> RobustConfig {
        RobustConfig::default()
            .with_threshold(self.threshold)
            .with_max_iterations(self.max_iterations)
            .with_confidence(self.confidence)
            .with_seed(self.seed)
    }
}

/// One correspondence: `src` should map onto `dst`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPair {
    pub src: (f64, f64),
    pub dst: (f64, f64),
}

impl MatchPair {
    pub fn new(src: (f64, f64), dst: (f64, f64)) -> Self {
        Self { src, dst }
    }
}

/// Resolves matches to pairs whose source is the train keypoint and whose
/// destination is the query keypoint. Out-of-range indices are dropped.
pub fn train_to_query_pairs(matches: &Matches, query: &KeyPoints, train: &KeyPoints) -> Vec<MatchPair> {
    matches
        .iter()
        .filter_map(|m| {
            let q = query.get(m.query_idx)?;
            let t = train.get(m.train_idx)?;
            Some(MatchPair::new((t.x, t.y), (q.x, q.y)))
        })
        .collect()
}

pub struct HomographyEstimator;

impl RobustModel<MatchPair> for HomographyEstimator {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        MIN_CORRESPONDENCES
    }

    fn estimate(&self, data: &[&MatchPair]) -> Option<Self::Model> {
        if data.len() < MIN_CORRESPONDENCES {
            return None;
        }
        let t_src = normalising_transform(data.iter().map(|m| m.src))?;
        let t_dst = normalising_transform(data.iter().map(|m| m.dst))?;

        let mut a = DMatrix::<f64>::zeros((data.len() * 2).max(9), 9);
        for (i, m) in data.iter().enumerate() {
            let (x1, y1) = apply(&t_src, m.src);
            let (x2, y2) = apply(&t_dst, m.dst);
            let r = i * 2;
            a[(r, 0)] = -x1;
            a[(r, 1)] = -y1;
            a[(r, 2)] = -1.0;
            a[(r, 6)] = x2 * x1;
            a[(r, 7)] = x2 * y1;
            a[(r, 8)] = x2;
            a[(r + 1, 3)] = -x1;
            a[(r + 1, 4)] = -y1;
            a[(r + 1, 5)] = -1.0;
            a[(r + 1, 6)] = y2 * x1;
            a[(r + 1, 7)] = y2 * y1;
            a[(r + 1, 8)] = y2;
        }

        let h_norm = solve_null_vector(a)?;
        let h = t_dst.try_inverse()? * h_norm * t_src;
        if h[(2, 2)].abs() > 1e-12 {
            Some(h / h[(2, 2)])
        } else {
            Some(h)
        }
    }

    fn compute_error(&self, model: &Self::Model, data: &MatchPair) -> f64 {
        let p = model * Vector3::new(data.src.0, data.src.1, 1.0);
        if p[2].abs() > 1e-10 {
            ((p[0] / p[2] - data.dst.0).powi(2) + (p[1] / p[2] - data.dst.1).powi(2)).sqrt()
        } else {
            f64::INFINITY
        }
    }

    fn is_degenerate(&self, sample: &[&MatchPair]) -> bool {
        has_collinear_triple(sample.iter().map(|m| m.src))
            || has_collinear_triple(sample.iter().map(|m| m.dst))
    }
}

/// Right singular vector of the smallest singular value, reshaped row-major.
fn solve_null_vector(a: DMatrix<f64>) -> Option<Matrix3<f64>> {
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    let h = v_t.row(min_idx);
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]))
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn normalising_transform(points: impl Iterator<Item = (f64, f64)> + Clone) -> Option<Matrix3<f64>> {
    let n = points.clone().count() as f64;
    if n == 0.0 {
        return None;
    }
    let (sx, sy) = points.clone().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points.map(|(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt()).sum::<f64>() / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, (x, y): (f64, f64)) -> (f64, f64) {
    (t[(0, 0)] * x + t[(0, 2)], t[(1, 1)] * y + t[(1, 2)])
}

/// Minimal samples only; larger sets are never rejected.
fn has_collinear_triple(points: impl Iterator<Item = (f64, f64)>) -> bool {
    let pts: Vec<(f64, f64)> = points.collect();
    if pts.len() > MIN_CORRESPONDENCES {
        return false;
    }
    for i in 0..pts.len() {
        for j in i + 1..pts.len() {
            for k in j + 1..pts.len() {
                let (ax, ay) = (pts[j].0 - pts[i].0, pts[j].1 - pts[i].1);
                let (bx, by) = (pts[k].0 - pts[i].0, pts[k].1 - pts[i].1);
                let cross = (ax * by - ay * bx).abs();
                let scale = (ax.hypot(ay) * bx.hypot(by)).max(f64::MIN_POSITIVE);
                if cross <= 1e-3 * scale || scale < 1e-9 {
                    return true;
                }
            }
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    /// Maps `src` points of the input pairs onto their `dst` points.
    pub homography: Homography,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Mean reprojection error over the inliers.
    pub residual: f64,
}

/// Robustly fits a homography to `pairs`.
pub fn estimate_homography(pairs: &[MatchPair], config: &RansacConfig) -> Result<HomographyEstimate> {
    if pairs.len() < MIN_CORRESPONDENCES {
        return Err(FeatureError::InsufficientCorrespondences {
            found: pairs.len(),
            required: MIN_CORRESPONDENCES,
        });
    }

    let required = config.required_inliers(pairs.len());
    let result = Ransac::new(config.robust()).run(&HomographyEstimator, pairs);
    let no_geometry = || FeatureError::NoConsistentGeometry {
        inliers: result.num_inliers,
        required,
    };

    let model = match result.model {
        Some(m) if result.num_inliers >= required => m,
        _ => return Err(no_geometry()),
    };
    let homography = Homography::new(model).map_err(|_| no_geometry())?;

    Ok(HomographyEstimate {
        homography,
        num_inliers: result.num_inliers,
        residual: result.residual,
        inliers: result.inliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{FeatureMatch, KeyPoint};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn grid_pairs(f: impl Fn(f64, f64) -> (f64, f64)) -> Vec<MatchPair> {
        let mut pairs = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                let src = (15.0 + i as f64 * 31.0, 9.0 + j as f64 * 27.0 + (i % 2) as f64 * 5.0);
                pairs.push(MatchPair::new(src, f(src.0, src.1)));
            }
        }
        pairs
    }

    #[test]
    fn recovers_translation_with_outliers() {
        let mut pairs = grid_pairs(|x, y| (x + 50.0, y));
        pairs.extend([
            MatchPair::new((10.0, 10.0), (300.0, 12.0)),
            MatchPair::new((80.0, 40.0), (5.0, 190.0)),
            MatchPair::new((120.0, 90.0), (-40.0, 70.0)),
            MatchPair::new((60.0, 130.0), (220.0, 220.0)),
        ]);

        let est = estimate_homography(&pairs, &RansacConfig::default()).unwrap();
        assert_eq!(est.num_inliers, 30);
        assert!(!est.inliers[30] && !est.inliers[33]);

        let p = est.homography.transform_point(100.0, 60.0).unwrap();
        assert!((p.x - 150.0).abs() < 1.0, "x = {}", p.x);
        assert!((p.y - 60.0).abs() < 1.0, "y = {}", p.y);
    }

    #[test]
    fn recovers_perspective_transform() {
        let truth = Matrix3::new(0.95, 0.04, 12.0, -0.03, 1.02, -7.0, 2e-4, -1e-4, 1.0);
        let pairs = grid_pairs(|x, y| {
            let p = truth * Vector3::new(x, y, 1.0);
            (p[0] / p[2], p[1] / p[2])
        });
        let est = estimate_homography(&pairs, &RansacConfig::default().with_threshold(0.5)).unwrap();
        let got = est.homography.matrix();
        for (a, b) in got.iter().zip(truth.iter()) {
            assert!((a - b).abs() < 1e-6, "{got} vs {truth}");
        }
    }

    #[test]
    fn fewer_than_four_pairs_is_insufficient() {
        let pairs = grid_pairs(|x, y| (x, y));
        let err = estimate_homography(&pairs[..3], &RansacConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::InsufficientCorrespondences { found: 3, required: 4 }
        ));
    }

    #[test]
    fn random_pairs_have_no_consistent_geometry() {
        let mut rng = StdRng::seed_from_u64(11);
        let pairs: Vec<MatchPair> = (0..30)
            .map(|_| {
                MatchPair::new(
                    (rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0)),
                    (rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0)),
                )
            })
            .collect();
        let err = estimate_homography(&pairs, &RansacConfig::default()).unwrap_err();
        assert!(matches!(err, FeatureError::NoConsistentGeometry { .. }));
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let line: Vec<MatchPair> = (0..4)
            .map(|i| MatchPair::new((i as f64 * 10.0, i as f64 * 5.0), (i as f64, 3.0 * i as f64)))
            .collect();
        let refs: Vec<&MatchPair> = line.iter().collect();
        assert!(HomographyEstimator.is_degenerate(&refs));
        let err = estimate_homography(&line, &RansacConfig::default().with_min_inliers(4)).unwrap_err();
        assert!(matches!(err, FeatureError::NoConsistentGeometry { .. }));
    }

    #[test]
    fn required_support_grows_with_correspondences() {
        let config = RansacConfig::default();
        assert_eq!(config.required_inliers(10), 15);
        assert_eq!(config.required_inliers(100), 15);
        assert_eq!(config.required_inliers(279), 42);
        assert_eq!(config.with_min_inliers(0).with_min_inlier_ratio(0.0).required_inliers(50), 4);
    }

    #[test]
    fn small_chance_consensus_is_rejected() {
        // 12 exact pairs plus 268 random ones: a planted consensus smaller
        // than the relative floor.
        let mut rng = StdRng::seed_from_u64(3);
        let mut pairs: Vec<MatchPair> = grid_pairs(|x, y| (x + 7.0, y - 4.0)).into_iter().take(12).collect();
        pairs.extend((0..268).map(|_| {
            MatchPair::new(
                (rng.gen_range(0.0..400.0), rng.gen_range(0.0..400.0)),
                (rng.gen_range(0.0..400.0), rng.gen_range(0.0..400.0)),
            )
        }));
        match estimate_homography(&pairs, &RansacConfig::default()) {
            Err(FeatureError::NoConsistentGeometry { required, .. }) => assert_eq!(required, 42),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn pairs_follow_train_to_query_direction() {
        let mut query = KeyPoints::new();
        query.push(KeyPoint::new(100.0, 5.0));
        let mut train = KeyPoints::new();
        train.push(KeyPoint::new(50.0, 5.0));
        let matches: Matches = [FeatureMatch::new(0, 0, 3.0), FeatureMatch::new(0, 7, 1.0)]
            .into_iter()
            .collect();

        let pairs = train_to_query_pairs(&matches, &query, &train);
        assert_eq!(pairs, vec![MatchPair::new((50.0, 5.0), (100.0, 5.0))]);
    }

    #[test]
    fn same_seed_same_estimate() {
        let mut pairs = grid_pairs(|x, y| (x - 20.0, y + 3.0));
        pairs.push(MatchPair::new((0.0, 0.0), (90.0, 90.0)));
        let config = RansacConfig::default().with_seed(99);
        let a = estimate_homography(&pairs, &config).unwrap();
        let b = estimate_homography(&pairs, &config).unwrap();
        assert_eq!(a.homography, b.homography);
        assert_eq!(a.inliers, b.inliers);
    }
}
