//! Benchmarks for the stitching pipeline stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma, Rgb, RgbImage};
use micromosaic::features::{estimate_homography, train_to_query_pairs, Matcher, Orb, RansacConfig};
use micromosaic::imgproc::{best_overlap, to_gray};
use micromosaic::photo::{StitchConfig, Stitcher, StrategyMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn block_scene(width: u32, height: u32, block: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(1);
    let bw = width.div_ceil(block);
    let colours: Vec<[u8; 3]> = (0..bw * height.div_ceil(block)).map(|_| rng.gen()).collect();
    RgbImage::from_fn(width, height, |x, y| Rgb(colours[((y / block) * bw + x / block) as usize]))
}

fn crop(src: &RgbImage, x: u32, w: u32) -> RgbImage {
    image::imageops::crop_imm(src, x, 0, w, src.height()).to_image()
}

fn benchmark_orb(c: &mut Criterion) {
    let mut group = c.benchmark_group("orb_detect_and_compute");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for size in [128u32, 256, 512] {
        let gray = to_gray(&block_scene(size, size, 8));
        let orb = Orb::default();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size}x{size}")), &gray, |b, img| {
            b.iter(|| orb.detect_and_compute(black_box(img), None))
        });
    }
    group.finish();
}

fn benchmark_match_and_estimate(c: &mut Criterion) {
    let scene = block_scene(400, 256, 8);
    let orb = Orb::default();
    let left = orb.detect_and_compute(&to_gray(&crop(&scene, 0, 256)), None).unwrap();
    let right = orb.detect_and_compute(&to_gray(&crop(&scene, 144, 256)), None).unwrap();
    let matcher = Matcher::default();

    c.bench_function("match_cross_check", |b| {
        b.iter(|| matcher.good_matches(black_box(&left.descriptors), black_box(&right.descriptors)))
    });

    let good = matcher.good_matches(&left.descriptors, &right.descriptors);
    let pairs = train_to_query_pairs(&good, &left.keypoints, &right.keypoints);
    let config = RansacConfig::default();
    c.bench_function("ransac_homography", |b| {
        b.iter(|| estimate_homography(black_box(&pairs), &config))
    });
}

fn benchmark_overlap_search(c: &mut Criterion) {
    let a = GrayImage::from_fn(64, 64, |x, y| Luma([((x * 37 + y * 91) % 251) as u8]));
    let b = GrayImage::from_fn(64, 64, |x, y| Luma([(((x + 40) * 37 + y * 91) % 251) as u8]));
    let candidates: Vec<(i64, i64)> = (-63..64).flat_map(|dx| (-63..64).map(move |dy| (dx, dy))).collect();

    c.bench_function("overlap_ncc_exhaustive_64", |bench| {
        bench.iter(|| best_overlap(black_box(&a), black_box(&b), &candidates, |s| s.overlap_area() >= 400))
    });
}

fn benchmark_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch_three_tiles");
    group.sample_size(10);

    let scene = block_scene(540, 200, 8);
    let tiles = vec![crop(&scene, 0, 240), crop(&scene, 150, 240), crop(&scene, 300, 240)];

    for mode in [StrategyMode::HolisticOnly, StrategyMode::PairwiseOnly] {
        let stitcher = Stitcher::new(StitchConfig::default().with_strategy(mode));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{mode:?}")), &tiles, |b, t| {
            b.iter(|| stitcher.stitch_images(black_box(t)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_orb,
    benchmark_match_and_estimate,
    benchmark_overlap_search,
    benchmark_stitch
);
criterion_main!(benches);
