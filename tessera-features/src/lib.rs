//! Scale-space keypoints with gradient histogram descriptors, and ratio-test matching.
//!
//! [`Sift`] turns one image into at most `max_features` [`Feature`]s and never returns an empty
//! list for a decodable image: when the detector finds fewer than `min_features` extrema, the
//! remainder is filled from a regular grid. [`RatioMatcher`] pairs the features of two images.

mod descriptors;
mod extrema;
mod matcher;
mod scale_space;

pub use descriptors::normalize_descriptor;
pub use extrema::Candidate;
pub use matcher::*;
pub use scale_space::{Octave, ScaleSpace};

use float_ord::FloatOrd;
use image::DynamicImage;
use log::*;
use std::path::Path;
use tessera_core::nalgebra::Point2;
use tessera_core::{Error, Feature, GrayFloatImage, Result};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Configuration of the feature extractor.
///
/// The most important parameter is `threshold`, the minimum magnitude of the difference of
/// Gaussians at an extremum. Intensities are in `[0, 1]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sift {
    /// Number of octaves in the pyramid.
    pub octaves: usize,
    /// Blurred levels per octave.
    pub scales: usize,
    /// Blur already present in the input image, in pixels.
    pub assumed_blur: f32,
    /// Detector response threshold to accept an extremum.
    pub threshold: f32,
    /// At most this many features are kept, strongest response first.
    pub max_features: usize,
    /// Grid features are added until this many features exist.
    pub min_features: usize,
    pub orientation_bins: usize,
    /// Side of the square orientation window in pixels.
    pub orientation_window: usize,
}

impl Sift {
    /// Default configuration with a custom detector threshold.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    pub fn max_features(self, max_features: usize) -> Self {
        Self {
            max_features,
            ..self
        }
    }

    pub fn min_features(self, min_features: usize) -> Self {
        Self {
            min_features,
            ..self
        }
    }
}

impl Default for Sift {
    fn default() -> Self {
        Self {
            octaves: 4,
            scales: 5,
            assumed_blur: 0.5,
            threshold: 0.03,
            max_features: 500,
            min_features: 50,
            orientation_bins: 36,
            orientation_window: 16,
        }
    }
}

impl Sift {
    /// Extract features from a decoded image of any color type.
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<Feature>> {
        self.extract_from_gray_float_image(&GrayFloatImage::from_dynamic(image))
    }

    /// Extract features from an image on disk.
    ///
    /// Decode failures are the only way extraction fails for non-empty images.
    pub fn extract_path(&self, path: impl AsRef<Path>) -> Result<Vec<Feature>> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| {
            Error::FeatureExtractionFailed(format!("failed to decode {}: {}", path.display(), e))
        })?;
        self.extract(&image)
    }

    /// Extract features from an intensity image.
    ///
    /// This performs all operations end-to-end: pyramid, extrema, the strongest-first cap, the
    /// grid fallback, orientation and descriptors.
    pub fn extract_from_gray_float_image(&self, image: &GrayFloatImage) -> Result<Vec<Feature>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::FeatureExtractionFailed(format!(
                "image is {}x{}",
                image.width(),
                image.height()
            )));
        }
        let space = self.build_scale_space(image);
        let mut candidates = self.find_extrema(&space);
        candidates.sort_by_key(|c| std::cmp::Reverse(FloatOrd(c.response.abs())));
        candidates.truncate(self.max_features);
        if candidates.len() < self.min_features {
            let missing = self.min_features - candidates.len();
            warn!(
                "Only {} keypoints detected, adding {} grid features",
                candidates.len(),
                missing
            );
            candidates.extend(grid_candidates(
                missing,
                space.octaves[0].levels[0].width(),
                space.octaves[0].levels[0].height(),
            ));
        }
        let features = self.describe(&space, &candidates);
        info!("Extracted {} features", features.len());
        Ok(features)
    }

    /// Computes orientations and descriptors of `candidates`.
    pub fn describe(&self, space: &ScaleSpace, candidates: &[Candidate]) -> Vec<Feature> {
        #[cfg(not(feature = "rayon"))]
        {
            candidates
                .iter()
                .map(|candidate| self.describe_candidate(space, candidate))
                .collect()
        }
        #[cfg(feature = "rayon")]
        {
            candidates
                .par_iter()
                .map(|candidate| self.describe_candidate(space, candidate))
                .collect()
        }
    }

    fn describe_candidate(&self, space: &ScaleSpace, candidate: &Candidate) -> Feature {
        let octave = &space.octaves[candidate.octave];
        let level = &octave.levels[candidate.level];
        let orientation = self.dominant_orientation(level, candidate.x, candidate.y);
        let spacing = space.relative_sigma(candidate.level);
        let descriptor = self.descriptor(level, candidate.x, candidate.y, spacing, orientation);
        let ratio = octave.ratio();
        Feature {
            point: Point2::new(
                f64::from((candidate.x + 0.5) * ratio - 0.5),
                f64::from((candidate.y + 0.5) * ratio - 0.5),
            ),
            scale: f64::from(space.absolute_sigma(candidate.octave, candidate.level)),
            orientation: f64::from(orientation),
            response: f64::from(candidate.response),
            descriptor,
        }
    }
}

/// Up to `count` candidates on a regular grid of the first octave, row by row.
fn grid_candidates(count: usize, width: usize, height: usize) -> Vec<Candidate> {
    let side = (count as f64).sqrt().ceil().max(1.0) as usize;
    (0..side * side)
        .take(count)
        .map(|n| Candidate {
            octave: 0,
            level: 1,
            x: ((n % side) as f32 + 0.5) / side as f32 * width as f32 - 0.5,
            y: ((n / side) as f32 + 0.5) / side as f32 * height as f32 - 0.5,
            response: 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_fills_exactly_the_missing_count() {
        let grid = grid_candidates(50, 100, 80);
        assert_eq!(grid.len(), 50);
        assert!(grid
            .iter()
            .all(|c| c.x >= 0.0 && c.x < 100.0 && c.y >= 0.0 && c.y < 80.0));
        assert!(grid_candidates(0, 10, 10).is_empty());
    }

    #[test]
    fn empty_image_fails() {
        let image = GrayFloatImage::new(0, 0);
        assert!(matches!(
            Sift::default().extract_from_gray_float_image(&image),
            Err(Error::FeatureExtractionFailed(_))
        ));
    }

    #[test]
    fn flat_image_falls_back_to_the_grid() {
        let image = GrayFloatImage::new(64, 48);
        let features = Sift::default()
            .extract_from_gray_float_image(&image)
            .unwrap();
        assert_eq!(features.len(), 50);
        assert!(features.iter().all(|f| f.response == 0.0));
    }
}
