use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tessera_core::GrayFloatImage;
use tessera_features::{descriptor_distances, RatioMatcher, Sift};

fn noise_image() -> GrayFloatImage {
    let mut rng = Pcg64::from_seed([3; 32]);
    let data = (0..320 * 240).map(|_| rng.gen_range(0.0..1.0)).collect();
    GrayFloatImage::from_raw(320, 240, data).unwrap()
}

fn extract(c: &mut Criterion) {
    let image = noise_image();
    let sift = Sift::default();
    c.bench_function("extract", |b| {
        b.iter(|| sift.extract_from_gray_float_image(&image))
    });
}

fn scale_space(c: &mut Criterion) {
    let image = noise_image();
    let sift = Sift::default();
    c.bench_function("scale_space", |b| b.iter(|| sift.build_scale_space(&image)));
}

criterion_group!(
    name = sift;
    config = Criterion::default().sample_size(10);
    targets = extract, scale_space
);

fn matching(c: &mut Criterion) {
    let features = Sift::default()
        .extract_from_gray_float_image(&noise_image())
        .unwrap();
    c.bench_function("descriptor_distances", |b| {
        b.iter(|| descriptor_distances(&features, &features))
    });
    let matcher = RatioMatcher::default();
    c.bench_function("match_features", |b| {
        b.iter(|| matcher.match_features(&features, &features))
    });
}

criterion_group!(
    name = matcher;
    config = Criterion::default().sample_size(10);
    targets = matching
);

criterion_main!(sift, matcher);
