use mosaic_core::{Descriptors, FeatureMatch, Matches};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub cross_check: bool,
    /// Lowe ratio; a match survives when `best < ratio * second_best`.
    pub ratio_threshold: Option<f32>,
    /// Share of the distance-sorted matches kept as "good".
    pub keep_fraction: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            cross_check: true,
            ratio_threshold: None,
            keep_fraction: 0.75,
        }
    }
}

impl MatcherConfig {
    pub fn with_cross_check(mut self, enabled: bool) -> Self {
        self.cross_check = enabled;
        self
    }

    pub fn with_ratio_test(mut self, threshold: f32) -> Self {
        self.ratio_threshold = Some(threshold);
        self
    }

    pub fn with_keep_fraction(mut self, fraction: f32) -> Self {
        self.keep_fraction = fraction;
        self
    }
}

/// Brute-force Hamming matcher.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatcherConfig,
}

struct Nearest {
    idx: usize,
    distance: u32,
    second: Option<u32>,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Nearest train descriptor for every query, filtered by the configured
    /// cross-check and ratio test, sorted by ascending distance.
    pub fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        if query.is_empty() || train.is_empty() {
            return Matches::new();
        }

        let forward: Vec<Nearest> = query
            .descriptors
            .par_iter()
            .map(|q| nearest(q, train))
            .collect();

        let backward: Option<Vec<usize>> = self.config.cross_check.then(|| {
            train
                .descriptors
                .par_iter()
                .map(|t| nearest(t, query).idx)
                .collect()
        });

        let mut matches: Matches = forward
            .iter()
            .enumerate()
            .filter(|(query_idx, n)| {
                backward
                    .as_ref()
                    .map_or(true, |back| back[n.idx] == *query_idx)
            })
            .filter(|(_, n)| match (self.config.ratio_threshold, n.second) {
                (Some(ratio), Some(second)) => (n.distance as f32) < ratio * second as f32,
                _ => true,
            })
            .map(|(query_idx, n)| FeatureMatch::new(query_idx, n.idx, n.distance as f32))
            .collect();

        matches.sort_by_distance();
        matches
    }

    /// The leading `floor(len * keep_fraction)` of [`Matcher::match_descriptors`].
    pub fn good_matches(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        let mut matches = self.match_descriptors(query, train);
        matches.retain_best_fraction(self.config.keep_fraction);
        matches
    }
}

/// First index wins on ties. `others` must be non-empty.
fn nearest(desc: &mosaic_core::Descriptor, others: &Descriptors) -> Nearest {
    let mut best = Nearest {
        idx: 0,
        distance: u32::MAX,
        second: None,
    };
    for (idx, other) in others.iter().enumerate() {
        let d = desc.hamming_distance(other);
        if d < best.distance {
            if best.distance != u32::MAX {
                best.second = Some(best.distance);
            }
            best.idx = idx;
            best.distance = d;
        } else if best.second.map_or(true, |s| d < s) {
            best.second = Some(d);
        }
    }
    best
}
