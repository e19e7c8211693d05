use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use targetvision::config::{ContourConfig, TargetMode, TargetingConfig, ThresholdConfig};
use targetvision::contours::ContourExtractor;
use targetvision::frame::Frame;
use targetvision::pipeline::TargetDetector;
use targetvision::segment::ColorSegmenter;

/// 320x240 noisy background with two tape strips.
fn synthetic_frame(seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = RgbImage::from_fn(320, 240, |_, _| {
        let shade: u8 = rng.gen_range(10..70);
        Rgb([shade, shade, shade.saturating_add(20)])
    });
    for (x0, x1) in [(110u32, 122u32), (198, 210)] {
        for y in 70..150 {
            for x in x0..x1 {
                image.put_pixel(x, y, Rgb([40, 230, 60]));
            }
        }
    }
    Frame::new(image)
}

fn bench_stages(c: &mut Criterion) {
    let frame = synthetic_frame(3);
    let segmenter = ColorSegmenter::from_config(&ThresholdConfig::default());
    let extractor = ContourExtractor::from_config(&ContourConfig::default());
    let mask = segmenter.segment(&frame);

    c.bench_function("segment_320x240", |b| b.iter(|| segmenter.segment(black_box(&frame))));
    c.bench_function("extract_320x240", |b| b.iter(|| extractor.extract(black_box(&mask))));

    let mut config = TargetingConfig::default();
    config.geometry.mode = TargetMode::Dual;
    let detector = TargetDetector::from_config(&config);
    c.bench_function("detect_dual_320x240", |b| b.iter(|| detector.process(black_box(&frame))));
}

criterion_group!(benches, bench_stages);
criterion_main!(benches);
