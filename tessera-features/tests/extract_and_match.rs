use approx::assert_relative_eq;
use log::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tessera_core::GrayFloatImage;
use tessera_features::{RatioMatcher, Sift};

/// Smoothed uniform noise, `shift` pixels further to the left for every unit of `shift`.
fn noise(width: usize, height: usize, shift: usize) -> GrayFloatImage {
    let mut rng = Pcg64::from_seed([7; 32]);
    let source: Vec<f32> = (0..(width + shift) * height)
        .map(|_| rng.gen_range(0.0..1.0))
        .collect();
    let mut image = GrayFloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            image.put(x, y, source[y * (width + shift) + x + shift]);
        }
    }
    image
}

#[test]
fn descriptors_are_unit_length() {
    let _ = pretty_env_logger::try_init_timed();
    let features = Sift::default()
        .extract_from_gray_float_image(&noise(128, 96, 0))
        .unwrap();
    info!("Extracted {} features from noise", features.len());
    assert!(features.len() >= 50 && features.len() <= 500);
    for feature in &features {
        assert_relative_eq!(feature.descriptor.norm(), 1.0, epsilon = 1e-4);
        assert!(feature.orientation >= 0.0 && feature.orientation < std::f64::consts::TAU);
    }
    let responses: Vec<f64> = features
        .iter()
        .filter(|f| f.response != 0.0)
        .map(|f| f.response.abs())
        .collect();
    assert!(responses.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn image_matched_with_itself_matches_every_feature_to_itself() {
    let _ = pretty_env_logger::try_init_timed();
    let features = Sift::default()
        .extract_from_gray_float_image(&noise(96, 96, 0))
        .unwrap();
    let matches = RatioMatcher::default().match_features(&features, &features);
    assert_eq!(matches.len(), features.len());
    for m in &matches {
        assert_eq!(m.query, m.train);
        assert_eq!(m.distance, 0.0);
        assert_relative_eq!(m.confidence, 1.0);
    }
}

fn assert_self_matches(image: &GrayFloatImage) {
    let features = Sift::default().extract_from_gray_float_image(image).unwrap();
    assert!(!features.is_empty());
    let matches = RatioMatcher::default().match_features(&features, &features);
    assert_eq!(matches.len(), features.len());
    for m in &matches {
        assert_eq!(m.query, m.train);
        assert_eq!(m.distance, 0.0);
    }
}

#[test]
fn flat_image_matches_every_feature_to_itself() {
    let _ = pretty_env_logger::try_init_timed();
    let mut image = GrayFloatImage::new(64, 48);
    for y in 0..48 {
        for x in 0..64 {
            image.put(x, y, 0.5);
        }
    }
    assert_self_matches(&image);
}

#[test]
fn gradient_image_matches_every_feature_to_itself() {
    let _ = pretty_env_logger::try_init_timed();
    let mut image = GrayFloatImage::new(128, 96);
    for y in 0..96 {
        for x in 0..128 {
            image.put(x, y, x as f32 / 127.0);
        }
    }
    assert_self_matches(&image);
}

#[test]
fn shifted_image_matches_at_the_shift() {
    let _ = pretty_env_logger::try_init_timed();
    let sift = Sift::new(0.01);
    let a = sift.extract_from_gray_float_image(&noise(128, 96, 0)).unwrap();
    let b = sift.extract_from_gray_float_image(&noise(128, 96, 8)).unwrap();
    let matches = RatioMatcher::default().match_features(&a, &b);
    let consistent = matches
        .iter()
        .filter(|m| {
            let (pa, pb) = m.points(&a, &b);
            (pa.x - pb.x - 8.0).abs() < 1.0 && (pa.y - pb.y).abs() < 1.0
        })
        .count();
    info!("{} of {} matches agree with the shift", consistent, matches.len());
    assert!(consistent >= 20);
    assert!(2 * consistent >= matches.len());
}
