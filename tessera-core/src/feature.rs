use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point2, Point3, UnitVector3};

/// Length of a [`Descriptor`].
pub const DESCRIPTOR_LEN: usize = 128;

/// A 4x4 grid of 8-bin gradient orientation histograms, L2-normalized.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct Descriptor(pub [f32; DESCRIPTOR_LEN]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0.0; DESCRIPTOR_LEN])
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn distance_squared(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// A point of interest detected in one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Pixel location with `+x` to the right and `+y` down from the top left corner.
    pub point: Point2<f64>,
    /// Gaussian scale (sigma in pixels of the input image) the feature was detected at.
    pub scale: f64,
    /// Dominant gradient orientation in radians.
    pub orientation: f64,
    /// Detector response. Grid fallback features have a response of zero.
    pub response: f64,
    pub descriptor: Descriptor,
}

/// A verified correspondence between feature `query` of one image and feature `train` of another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    /// Euclidean descriptor distance of the match.
    pub distance: f32,
    /// `1 - min(distance / 2, 1)`, in `[0, 1]`.
    pub confidence: f32,
}

impl FeatureMatch {
    /// Retrieves the matched pixel locations.
    pub fn points(&self, query: &[Feature], train: &[Feature]) -> (Point2<f64>, Point2<f64>) {
        (query[self.query].point, train[self.train].point)
    }
}

/// A pair of unit bearings observing the same point from camera `A` and camera `B`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BearingMatch(pub UnitVector3<f64>, pub UnitVector3<f64>);

/// A world point and its observation in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointProjection {
    pub world: Point3<f64>,
    pub normalized: Point2<f64>,
}
