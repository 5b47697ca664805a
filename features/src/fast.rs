use image::GrayImage;
use mosaic_core::{KeyPoint, KeyPoints};
use rayon::prelude::*;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a corner.
const ARC_LENGTH: usize = 9;

const RADIUS: u32 = 3;

/// FAST-9 corner score at `(x, y)`, `None` when the pixel is not a corner.
///
/// The score is the summed absolute difference beyond `threshold` over the
/// brighter or the darker ring pixels, whichever side forms the arc.
pub fn fast_score(image: &GrayImage, x: u32, y: u32, threshold: u8) -> Option<u32> {
    let (w, h) = image.dimensions();
    if x < RADIUS || y < RADIUS || x + RADIUS >= w || y + RADIUS >= h {
        return None;
    }

    let raw = image.as_raw();
    let stride = w as i32;
    let centre = (y as i32 * stride + x as i32) as usize;
    let p = raw[centre] as i32;
    let t = threshold as i32;

    let mut ring = [0i32; 16];
    for (v, &(dx, dy)) in ring.iter_mut().zip(CIRCLE.iter()) {
        *v = raw[(centre as i32 + dy * stride + dx) as usize] as i32;
    }

    // Quick rejection on the compass points: an arc of 9 covers at least two.
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let bright_hits = compass.iter().filter(|&&v| v > p + t).count();
    let dark_hits = compass.iter().filter(|&&v| v < p - t).count();
    if bright_hits < 2 && dark_hits < 2 {
        return None;
    }

    let bright = has_arc(&ring, |v| v > p + t);
    let dark = has_arc(&ring, |v| v < p - t);
    if !bright && !dark {
        return None;
    }

    let bright_sad: i32 = ring.iter().filter(|&&v| v > p + t).map(|&v| v - p - t).sum();
    let dark_sad: i32 = ring.iter().filter(|&&v| v < p - t).map(|&v| p - v - t).sum();
    let score = match (bright, dark) {
        (true, true) => bright_sad.max(dark_sad),
        (true, false) => bright_sad,
        _ => dark_sad,
    };
    Some(score.max(1) as u32)
}

fn has_arc(ring: &[i32; 16], pred: impl Fn(i32) -> bool) -> bool {
    let mut run = 0;
    for i in 0..ring.len() + ARC_LENGTH - 1 {
        if pred(ring[i % ring.len()]) {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Detects FAST-9 corners with 3x3 non-maximum suppression.
///
/// With a mask, only pixels whose mask value is non-zero are candidates.
/// Keypoints come out in raster order with `response` set to the score.
pub fn fast_detect(image: &GrayImage, threshold: u8, mask: Option<&GrayImage>) -> KeyPoints {
    let (w, h) = image.dimensions();
    if w <= 2 * RADIUS || h <= 2 * RADIUS {
        return KeyPoints::new();
    }
    let mask = mask.filter(|m| m.dimensions() == (w, h));

    let scores: Vec<u32> = (0..h)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..w).map(move |x| {
                let allowed = mask.map_or(true, |m| m.as_raw()[(y * w + x) as usize] != 0);
                if allowed {
                    fast_score(image, x, y, threshold).unwrap_or(0)
                } else {
                    0
                }
            })
        })
        .collect();

    let mut keypoints = KeyPoints::new();
    for y in RADIUS..h - RADIUS {
        for x in RADIUS..w - RADIUS {
            let idx = (y * w + x) as usize;
            let s = scores[idx];
            if s == 0 || !is_local_max(&scores, w, x, y, s) {
                continue;
            }
            keypoints.push(
                KeyPoint::new(x as f64, y as f64)
                    .with_size(7.0)
                    .with_response(s as f64),
            );
        }
    }
    keypoints
}

/// Strict maximum over the 3x3 neighbourhood; equal neighbours earlier in
/// raster order win.
fn is_local_max(scores: &[u32], w: u32, x: u32, y: u32, s: u32) -> bool {
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            if nx == x && ny == y {
                continue;
            }
            let n = scores[(ny * w + nx) as usize];
            let earlier = ny < y || (ny == y && nx < x);
            if n > s || (n == s && earlier) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square(size: u32, lo: u8, hi: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([hi])
            } else {
                Luma([lo])
            }
        })
    }

    #[test]
    fn detects_square_corners() {
        let img = square(40, 20, 220);
        let kps = fast_detect(&img, 20, None);
        assert!(!kps.is_empty());
        for (cx, cy) in [(10.0, 10.0), (29.0, 10.0), (10.0, 29.0), (29.0, 29.0)] {
            assert!(
                kps.iter().any(|kp| (kp.x - cx).abs() <= 2.0 && (kp.y - cy).abs() <= 2.0),
                "no corner near ({cx}, {cy})"
            );
        }
    }

    #[test]
    fn uniform_image_has_no_corners() {
        let img = GrayImage::from_pixel(32, 32, Luma([90]));
        assert!(fast_detect(&img, 20, None).is_empty());
    }

    #[test]
    fn mask_suppresses_detection() {
        let img = square(40, 20, 220);
        let mask = GrayImage::new(40, 40);
        assert!(fast_detect(&img, 20, Some(&mask)).is_empty());
    }

    #[test]
    fn nms_leaves_isolated_maxima() {
        let img = square(40, 20, 220);
        let kps = fast_detect(&img, 20, None);
        for (i, a) in kps.iter().enumerate() {
            for b in kps.iter().skip(i + 1) {
                assert!((a.x - b.x).abs() > 1.0 || (a.y - b.y).abs() > 1.0);
            }
        }
    }

    #[test]
    fn score_is_none_near_border() {
        let img = square(40, 20, 220);
        assert_eq!(fast_score(&img, 2, 10, 20), None);
    }
}
