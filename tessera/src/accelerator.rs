use tessera_core::image::DynamicImage;
use tessera_core::{Error, Feature, GrayFloatImage, Result};
use tessera_stereo::{BlockMatcher, DisparityMap};

/// The hot kernels of a reconstruction, replaceable by hardware specific implementations.
///
/// Implementations must produce the same results as [`CpuAccelerator`] up to floating point
/// rounding, since downstream thresholds are tuned against it.
pub trait Accelerator: Send + Sync {
    /// Name shown in logs.
    fn name(&self) -> &str;

    /// Matrix of Euclidean distances, `distances[q][t]` between `query[q]` and `train[t]`.
    fn descriptor_distances(&self, query: &[Feature], train: &[Feature]) -> Vec<Vec<f32>>;

    /// Disparity of every pixel of `left` against `right`.
    fn block_match(
        &self,
        matcher: &BlockMatcher,
        left: &GrayFloatImage,
        right: &GrayFloatImage,
    ) -> Result<DisparityMap>;

    /// Enhances a single image before feature extraction.
    ///
    /// Needs a learned model, so the default reports that none is loaded and the pipeline keeps
    /// the original image.
    fn enhance(&self, _image: &DynamicImage) -> Result<DynamicImage> {
        Err(Error::ModelNotLoaded(format!(
            "{} has no image enhancement model",
            self.name()
        )))
    }
}

/// Portable reference implementation running on the CPU, in parallel with the `rayon` feature.
#[derive(Debug, Copy, Clone, Default)]
pub struct CpuAccelerator;

impl Accelerator for CpuAccelerator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn descriptor_distances(&self, query: &[Feature], train: &[Feature]) -> Vec<Vec<f32>> {
        tessera_features::descriptor_distances(query, train)
    }

    fn block_match(
        &self,
        matcher: &BlockMatcher,
        left: &GrayFloatImage,
        right: &GrayFloatImage,
    ) -> Result<DisparityMap> {
        matcher.compute(left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::image::RgbImage;

    #[test]
    fn cpu_has_no_enhancement_model() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let error = CpuAccelerator.enhance(&image).unwrap_err();
        assert!(matches!(error, Error::ModelNotLoaded(_)));
        assert!(error.is_soft());
    }

    #[test]
    fn identical_descriptors_are_at_distance_zero() {
        let feature = |x: f32| {
            let mut descriptor = tessera_core::Descriptor::zeros();
            descriptor.0[0] = x;
            descriptor.0[1] = (1.0 - x * x).sqrt();
            Feature {
                point: tessera_core::nalgebra::Point2::origin(),
                scale: 1.0,
                orientation: 0.0,
                response: 1.0,
                descriptor,
            }
        };
        let features = [feature(0.2), feature(0.9)];
        let distances = CpuAccelerator.descriptor_distances(&features, &features);
        assert_eq!(distances[0][0], 0.0);
        assert_eq!(distances[1][1], 0.0);
        assert!(distances[0][1] > 0.5);
    }
}
