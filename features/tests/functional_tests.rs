use image::{GrayImage, Luma};
use mosaic_features::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random grey blocks; rich in FAST corners, distinctive for BRIEF.
fn block_scene(width: u32, height: u32, block: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let bw = width.div_ceil(block);
    let bh = height.div_ceil(block);
    let values: Vec<u8> = (0..bw * bh).map(|_| rng.gen()).collect();
    GrayImage::from_fn(width, height, |x, y| Luma([values[((y / block) * bw + x / block) as usize]]))
}

fn crop(src: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(src, x, y, w, h).to_image()
}

#[test]
fn test_uniform_image_yields_no_features() {
    let img = GrayImage::from_pixel(200, 150, Luma([128]));
    let features = Orb::default().detect_and_compute(&img, None).unwrap();
    assert!(features.is_empty());
    assert!(features.descriptors.is_empty());
}

#[test]
fn test_orb_is_deterministic() {
    let img = block_scene(220, 180, 8, 5);
    let orb = Orb::default();
    let a = orb.detect_and_compute(&img, None).unwrap();
    let b = orb.detect_and_compute(&img, None).unwrap();
    assert_eq!(a.keypoints.keypoints, b.keypoints.keypoints);
    assert_eq!(a.descriptors.descriptors, b.descriptors.descriptors);
}

#[test]
fn test_mask_restricts_keypoints() {
    let img = block_scene(200, 200, 8, 6);
    let mask = GrayImage::from_fn(200, 200, |x, _| Luma([if x < 100 { 255 } else { 0 }]));
    let features = Orb::default().detect_and_compute(&img, Some(&mask)).unwrap();
    assert!(!features.is_empty());
    assert!(features.keypoints.iter().all(|kp| kp.x < 101.0));
}

#[test]
fn test_cross_checked_matches_are_mutual_nearest() {
    let scene = block_scene(300, 200, 8, 7);
    let a = crop(&scene, 0, 0, 200, 200);
    let b = crop(&scene, 60, 0, 200, 200);
    let orb = Orb::default();
    let fa = orb.detect_and_compute(&a, None).unwrap();
    let fb = orb.detect_and_compute(&b, None).unwrap();

    let matches = Matcher::default().match_descriptors(&fa.descriptors, &fb.descriptors);
    assert!(!matches.is_empty());

    let nearest = |d: &mosaic_core::Descriptor, set: &mosaic_core::Descriptors| {
        set.iter()
            .enumerate()
            .min_by_key(|(i, o)| (d.hamming_distance(o), *i))
            .map(|(i, _)| i)
    };
    for m in matches.iter() {
        let q = &fa.descriptors.descriptors[m.query_idx];
        let t = &fb.descriptors.descriptors[m.train_idx];
        assert_eq!(nearest(q, &fb.descriptors), Some(m.train_idx));
        assert_eq!(nearest(t, &fa.descriptors), Some(m.query_idx));
    }
}

#[test]
fn test_translation_recovered_from_features() {
    let scene = block_scene(260, 200, 8, 42);
    let reference = crop(&scene, 0, 0, 200, 200);
    let moved = crop(&scene, 50, 0, 200, 200);

    let orb = Orb::default();
    let fr = orb.detect_and_compute(&reference, None).unwrap();
    let fm = orb.detect_and_compute(&moved, None).unwrap();

    let good = Matcher::default().good_matches(&fr.descriptors, &fm.descriptors);
    assert!(good.len() >= MIN_CORRESPONDENCES);

    let pairs = train_to_query_pairs(&good, &fr.keypoints, &fm.keypoints);
    let est = estimate_homography(&pairs, &RansacConfig::default()).unwrap();

    // A pixel of `moved` sits 50 px further right in `reference`.
    for (x, y) in [(10.0, 10.0), (120.0, 80.0), (140.0, 190.0)] {
        let p = est.homography.transform_point(x, y).unwrap();
        assert!((p.x - (x + 50.0)).abs() < 1.0, "x: {} -> {}", x, p.x);
        assert!((p.y - y).abs() < 1.0, "y: {} -> {}", y, p.y);
    }
}

#[test]
fn test_unrelated_images_fail_geometry() {
    let orb = Orb::default();
    let matcher = Matcher::default();
    for seed in 0..8u64 {
        let a = block_scene(240, 200, 8, 100 + 2 * seed);
        let b = block_scene(240, 200, 8, 101 + 2 * seed);
        let fa = orb.detect_and_compute(&a, None).unwrap();
        let fb = orb.detect_and_compute(&b, None).unwrap();

        let good = matcher.good_matches(&fa.descriptors, &fb.descriptors);
        let pairs = train_to_query_pairs(&good, &fa.keypoints, &fb.keypoints);
        let res = estimate_homography(&pairs, &RansacConfig::default());
        assert!(
            matches!(
                res,
                Err(FeatureError::NoConsistentGeometry { .. }) | Err(FeatureError::InsufficientCorrespondences { .. })
            ),
            "seed {seed}: {} pairs accepted as {:?}",
            pairs.len(),
            res.map(|e| e.num_inliers)
        );
    }
}
