//! ORB (Oriented FAST and Rotated BRIEF)
//!
//! FAST-9 corners are detected on every level of a scale pyramid, oriented by
//! the intensity centroid of the surrounding disc and described by a steered
//! BRIEF test pattern sampled on a smoothed copy of the level.

use crate::fast::fast_detect;
use crate::{FeatureError, Result};
use image::GrayImage;
use mosaic_core::{Descriptor, Descriptors, KeyPoint, KeyPoints};
use mosaic_imgproc::{resize_nearest, scale_down};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

/// Number of binary tests, i.e. descriptor bits.
pub const DESCRIPTOR_BITS: usize = 256;

/// Radius of the disc the orientation moments are taken over.
pub const ORIENTATION_RADIUS: i32 = 15;

/// Every BRIEF test point lies within this radius of the keypoint.
const PATTERN_RADIUS: i32 = 13;

const PATCH_SIZE: f64 = 31.0;

#[derive(Debug, Clone)]
pub struct OrbConfig {
    pub n_features: usize,
    pub scale_factor: f32,
    pub n_levels: usize,
    pub fast_threshold: u8,
    /// Keypoints closer than this to a level's border are discarded.
    pub edge_threshold: u32,
    /// Gaussian sigma of the smoothing applied before the binary tests.
    pub blur_sigma: f32,
    pub pattern_seed: u64,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            n_features: 2000,
            scale_factor: 1.2,
            n_levels: 3,
            fast_threshold: 20,
            edge_threshold: 16,
            blur_sigma: 2.0,
            pattern_seed: 0x0b5e_55ed,
        }
    }
}

impl OrbConfig {
    pub fn with_n_features(mut self, n: usize) -> Self {
        self.n_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: usize) -> Self {
        self.n_levels = n;
        self
    }

    pub fn with_scale_factor(mut self, factor: f32) -> Self {
        self.scale_factor = factor;
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }

    pub fn with_edge_threshold(mut self, edge: u32) -> Self {
        self.edge_threshold = edge;
        self
    }

    pub fn with_pattern_seed(mut self, seed: u64) -> Self {
        self.pattern_seed = seed;
        self
    }

    /// Largest distance, in level-0 pixels, from a keypoint to any pixel its
    /// descriptor reads.
    pub fn max_patch_reach(&self) -> f64 {
        let top = self.scale_factor.max(1.0).powi(self.n_levels.saturating_sub(1) as i32) as f64;
        self.edge_threshold as f64 * top
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct ImageFeatures {
    pub keypoints: KeyPoints,
    pub descriptors: Descriptors,
}

impl ImageFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// One test pair, offsets relative to the keypoint.
type TestPair = [(f32, f32); 2];

/// ORB feature detector and descriptor
#[derive(Debug, Clone)]
pub struct Orb {
    config: OrbConfig,
    pattern: Vec<TestPair>,
}

struct Level {
    scale: f64,
    image: GrayImage,
    smoothed: GrayImage,
    mask: Option<GrayImage>,
}

struct Candidate {
    keypoint: KeyPoint,
    level: usize,
    lx: u32,
    ly: u32,
}

impl Default for Orb {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl Orb {
    pub fn new(config: OrbConfig) -> Self {
        let pattern = sample_pattern(config.pattern_seed);
        Self { config, pattern }
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    /// Detects up to `n_features` keypoints and describes them.
    ///
    /// `mask` must match the image size; zero pixels are never detected on.
    /// A textureless image yields empty features, not an error.
    pub fn detect_and_compute(&self, image: &GrayImage, mask: Option<&GrayImage>) -> Result<ImageFeatures> {
        if let Some(m) = mask {
            if m.dimensions() != image.dimensions() {
                return Err(FeatureError::DetectionError(format!(
                    "mask {:?} does not match image {:?}",
                    m.dimensions(),
                    image.dimensions()
                )));
            }
        }

        let levels = self.build_levels(image, mask);

        let mut candidates: Vec<Candidate> = levels
            .par_iter()
            .enumerate()
            .flat_map_iter(|(idx, level)| self.detect_level(idx, level))
            .collect();

        candidates.sort_by(|a, b| a.keypoint.rank_cmp(&b.keypoint));
        candidates.truncate(self.config.n_features);

        let described: Vec<(KeyPoint, Descriptor)> = candidates
            .par_iter()
            .filter_map(|c| {
                let level = &levels[c.level];
                let angle = c.keypoint.angle.to_radians() as f32;
                describe(&level.smoothed, c.lx, c.ly, angle, &self.pattern)
                    .map(|d| (c.keypoint, d))
            })
            .collect();

        let mut features = ImageFeatures {
            keypoints: KeyPoints::with_capacity(described.len()),
            descriptors: Descriptors::with_capacity(described.len()),
        };
        for (kp, desc) in described {
            features.keypoints.push(kp);
            features.descriptors.push(desc);
        }

        debug!(
            width = image.width(),
            height = image.height(),
            levels = levels.len(),
            keypoints = features.len(),
            "orb features"
        );
        Ok(features)
    }

    fn build_levels(&self, image: &GrayImage, mask: Option<&GrayImage>) -> Vec<Level> {
        let min_side = 2 * self.config.edge_threshold + 1;
        let mut levels = Vec::with_capacity(self.config.n_levels);
        let mut scale = 1.0f64;

        for idx in 0..self.config.n_levels.max(1) {
            let level_image = if idx == 0 {
                image.clone()
            } else {
                scale_down(image, scale as f32)
            };
            if level_image.width() < min_side || level_image.height() < min_side {
                break;
            }
            let level_mask = mask.map(|m| {
                if idx == 0 {
                    m.clone()
                } else {
                    resize_nearest(m, level_image.width(), level_image.height())
                }
            });
            let smoothed = image::imageops::blur(&level_image, self.config.blur_sigma);
            levels.push(Level {
                scale,
                image: level_image,
                smoothed,
                mask: level_mask,
            });
            scale *= self.config.scale_factor as f64;
        }
        levels
    }

    fn detect_level(&self, idx: usize, level: &Level) -> Vec<Candidate> {
        let (w, h) = level.image.dimensions();
        let edge = self.config.edge_threshold;
        let corners = fast_detect(&level.image, self.config.fast_threshold, level.mask.as_ref());

        corners
            .iter()
            .filter_map(|kp| {
                let (lx, ly) = (kp.x as u32, kp.y as u32);
                if lx < edge || ly < edge || lx + edge >= w || ly + edge >= h {
                    return None;
                }
                let angle = intensity_centroid_angle(&level.image, lx, ly);
                let keypoint = KeyPoint::new(lx as f64 * level.scale, ly as f64 * level.scale)
                    .with_size(PATCH_SIZE * level.scale)
                    .with_angle(angle.to_degrees().rem_euclid(360.0))
                    .with_response(kp.response)
                    .with_octave(idx as i32);
                Some(Candidate {
                    keypoint,
                    level: idx,
                    lx,
                    ly,
                })
            })
            .collect()
    }
}

/// Draws the test pairs uniformly inside the pattern disc.
fn sample_pattern(seed: u64) -> Vec<TestPair> {
    let mut rng = StdRng::seed_from_u64(seed);
    let r2 = PATTERN_RADIUS * PATTERN_RADIUS;
    let mut point = || loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= r2 {
            return (x as f32, y as f32);
        }
    };
    (0..DESCRIPTOR_BITS).map(|_| [point(), point()]).collect()
}

/// Orientation in radians of the vector from `(x, y)` to the intensity
/// centroid of the surrounding disc. The caller keeps the disc in bounds.
fn intensity_centroid_angle(image: &GrayImage, x: u32, y: u32) -> f64 {
    let w = image.width() as i64;
    let raw = image.as_raw();
    let r = ORIENTATION_RADIUS as i64;
    let mut m01 = 0i64;
    let mut m10 = 0i64;

    for dy in -r..=r {
        let span = ((r * r - dy * dy) as f64).sqrt() as i64;
        let row = (y as i64 + dy) * w;
        for dx in -span..=span {
            let v = raw[(row + x as i64 + dx) as usize] as i64;
            m10 += dx * v;
            m01 += dy * v;
        }
    }
    (m01 as f64).atan2(m10 as f64)
}

/// Steered BRIEF: each test point is rotated by `angle` and rounded to the
/// nearest pixel. `None` if any rotated point leaves the image.
fn describe(smoothed: &GrayImage, x: u32, y: u32, angle: f32, pattern: &[TestPair]) -> Option<Descriptor> {
    let (w, h) = (smoothed.width() as i32, smoothed.height() as i32);
    let raw = smoothed.as_raw();
    let (sin_a, cos_a) = angle.sin_cos();
    let (cx, cy) = (x as f32, y as f32);

    let sample = |(px, py): (f32, f32)| -> Option<u8> {
        let rx = (cx + cos_a * px - sin_a * py).round() as i32;
        let ry = (cy + sin_a * px + cos_a * py).round() as i32;
        if rx < 0 || ry < 0 || rx >= w || ry >= h {
            return None;
        }
        Some(raw[(ry * w + rx) as usize])
    };

    let mut data = vec![0u8; DESCRIPTOR_BITS / 8];
    for (bit, &[a, b]) in pattern.iter().enumerate() {
        if sample(a)? < sample(b)? {
            data[bit / 8] |= 1 << (7 - bit % 8);
        }
    }
    Some(Descriptor::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Bright square blobs of side `period / 2` on a dark background.
    fn blobs(size: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if x % period < period / 2 && y % period < period / 2 {
                Luma([230])
            } else {
                Luma([25])
            }
        })
    }

    #[test]
    fn pattern_is_reproducible_and_inside_disc() {
        let a = sample_pattern(7);
        let b = sample_pattern(7);
        assert_eq!(a, b);
        assert_eq!(a.len(), DESCRIPTOR_BITS);
        let r2 = (PATTERN_RADIUS * PATTERN_RADIUS) as f32;
        assert!(a.iter().flatten().all(|&(x, y)| x * x + y * y <= r2));
    }

    #[test]
    fn keypoints_and_descriptors_stay_aligned() {
        let img = blobs(128, 12);
        let features = Orb::default().detect_and_compute(&img, None).unwrap();
        assert!(!features.is_empty());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        assert!(features.descriptors.iter().all(|d| d.size() * 8 == DESCRIPTOR_BITS));
    }

    #[test]
    fn keypoints_respect_edge_threshold() {
        let img = blobs(128, 12);
        let orb = Orb::default();
        let features = orb.detect_and_compute(&img, None).unwrap();
        let edge = orb.config().edge_threshold as f64;
        for kp in features.keypoints.iter().filter(|kp| kp.octave == 0) {
            assert!(kp.x >= edge && kp.y >= edge);
            assert!(kp.x < 128.0 - edge && kp.y < 128.0 - edge);
        }
    }

    #[test]
    fn n_features_caps_output_by_rank() {
        let img = blobs(160, 10);
        let orb = Orb::new(OrbConfig::default().with_n_features(15));
        let features = orb.detect_and_compute(&img, None).unwrap();
        assert!(features.len() <= 15);
        let kps = &features.keypoints.keypoints;
        assert!(kps.windows(2).all(|w| w[0].rank_cmp(&w[1]) != std::cmp::Ordering::Greater));
    }

    #[test]
    fn rejects_mismatched_mask() {
        let img = blobs(64, 8);
        let mask = GrayImage::new(10, 10);
        assert!(Orb::default().detect_and_compute(&img, Some(&mask)).is_err());
    }

    #[test]
    fn tiny_image_has_no_features() {
        let img = blobs(20, 4);
        assert!(Orb::default().detect_and_compute(&img, None).unwrap().is_empty());
    }
}
