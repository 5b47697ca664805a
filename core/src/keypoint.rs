use std::cmp::Ordering;

/// A detected point of interest in one image's pixel frame.
///
/// `size` is the diameter of the patch the descriptor was computed on, in
/// level-0 pixels. `angle` is in degrees, `-1.0` when not yet assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub angle: f64,
    pub response: f64,
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response;
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.octave = octave;
        self
    }

    /// Strongest response first; equal responses fall back to pyramid level
    /// and raster position so that the order is total and reproducible.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .response
            .partial_cmp(&self.response)
            .unwrap_or(Ordering::Equal)
            .then(self.octave.cmp(&other.octave))
            .then(self.y.partial_cmp(&other.y).unwrap_or(Ordering::Equal))
            .then(self.x.partial_cmp(&other.x).unwrap_or(Ordering::Equal))
    }
}

impl Default for KeyPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl FeatureMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matches {
    pub matches: Vec<FeatureMatch>,
}

impl Matches {
    pub fn new() -> Self {
        Self {
            matches: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            matches: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, m: FeatureMatch) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter()
    }

    /// Best match first. Ties keep query order.
    pub fn sort_by_distance(&mut self) {
        self.matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.query_idx.cmp(&b.query_idx))
        });
    }

    /// Keeps the leading `floor(len * fraction)` matches.
    ///
    /// Call after [`Matches::sort_by_distance`] to keep the best ones.
    pub fn retain_best_fraction(&mut self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        let keep = (self.matches.len() as f32 * fraction).floor() as usize;
        self.matches.truncate(keep);
    }
}

impl FromIterator<FeatureMatch> for Matches {
    fn from_iter<I: IntoIterator<Item = FeatureMatch>>(iter: I) -> Self {
        Self {
            matches: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyPoints {
    pub keypoints: Vec<KeyPoint>,
}

impl KeyPoints {
    pub fn new() -> Self {
        Self {
            keypoints: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keypoints: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, kp: KeyPoint) {
        self.keypoints.push(kp);
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyPoint> {
        self.keypoints.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&KeyPoint> {
        self.keypoints.get(idx)
    }
}
