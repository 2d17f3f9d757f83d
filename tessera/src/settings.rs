use tessera_core::CameraIntrinsics;
use tessera_features::{RatioMatcher, Sift};
use tessera_mesh::{MeshDecimator, TextureProjector, UvUnwrapper};
use tessera_optimize::BundleAdjuster;
use tessera_stereo::BlockMatcher;
use tessera_surface::{OutlierFilter, SurfaceReconstructor};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Every tunable of the reconstruction pipeline.
///
/// With the `serde-serialize` feature, fields missing from a serialized settings file take their
/// default values.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Settings {
    /// Minimum difference of Gaussians response of a keypoint, for intensities in `[0, 1]`
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_feature_threshold")
    )]
    pub feature_threshold: f32,
    /// At most this many features are kept per image
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_features"))]
    pub max_features: usize,
    /// Images with fewer detected features are padded with grid features up to this count
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_features"))]
    pub min_features: usize,
    /// Lowe's ratio between the best and the second best descriptor distance
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_match_ratio"))]
    pub match_ratio: f32,
    /// Focal length in pixels. Derived from the image size when absent.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub focal_length: Option<f64>,
    /// Focal length as a multiple of the larger image side, used without `focal_length`
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_focal_ratio"))]
    pub focal_ratio: f64,
    /// Iterations of every random sample consensus
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_ransac_iterations")
    )]
    pub ransac_iterations: usize,
    /// Inlier threshold of pose consensus, in pixels
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_threshold")
    )]
    pub consensus_threshold: f64,
    /// Views sharing fewer matches get a default pose instead of an estimated one
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_minimum_pose_matches")
    )]
    pub minimum_pose_matches: usize,
    /// Sine of the smallest angle between two rays for a point to be kept
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_parallax"))]
    pub min_parallax: f64,
    /// Largest mean reprojection error of a sparse point, in pixels
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_reprojection_error")
    )]
    pub max_reprojection_error: f64,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_bundle_iterations")
    )]
    pub bundle_iterations: usize,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_bundle_tolerance")
    )]
    pub bundle_tolerance: f64,
    /// Side of the square block matching window
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_stereo_window"))]
    pub stereo_window: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub min_disparity: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_disparity"))]
    pub max_disparity: usize,
    /// Every `stereo_stride`-th pixel of a depth map is lifted into the point cloud
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_stereo_stride"))]
    pub stereo_stride: usize,
    /// Neighbors of a point considered by outlier removal and normal estimation
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_neighbors"))]
    pub neighbors: usize,
    /// Points further than this many standard deviations above the mean neighbor distance are
    /// removed
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_outlier_std_ratio")
    )]
    pub outlier_std_ratio: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_octree_depth"))]
    pub octree_depth: usize,
    /// Cells per side of the grid the implicit function is solved on
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_grid_resolution")
    )]
    pub grid_resolution: usize,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_poisson_iterations")
    )]
    pub poisson_iterations: usize,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_smoothing_iterations")
    )]
    pub smoothing_iterations: usize,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_smoothing_lambda")
    )]
    pub smoothing_lambda: f64,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_unwrap_iterations")
    )]
    pub unwrap_iterations: usize,
    /// Side of the square texture atlas in pixels
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_texture_size"))]
    pub texture_size: u32,
    /// Fraction of triangles kept by decimation
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_decimation_ratio")
    )]
    pub decimation_ratio: f64,
    /// Run the accelerator's image enhancement before feature extraction
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub enhance: bool,
    /// Seed of the random number generator used by consensus
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_seed"))]
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feature_threshold: default_feature_threshold(),
            max_features: default_max_features(),
            min_features: default_min_features(),
            match_ratio: default_match_ratio(),
            focal_length: None,
            focal_ratio: default_focal_ratio(),
            ransac_iterations: default_ransac_iterations(),
            consensus_threshold: default_consensus_threshold(),
            minimum_pose_matches: default_minimum_pose_matches(),
            min_parallax: default_min_parallax(),
            max_reprojection_error: default_max_reprojection_error(),
            bundle_iterations: default_bundle_iterations(),
            bundle_tolerance: default_bundle_tolerance(),
            stereo_window: default_stereo_window(),
            min_disparity: 0,
            max_disparity: default_max_disparity(),
            stereo_stride: default_stereo_stride(),
            neighbors: default_neighbors(),
            outlier_std_ratio: default_outlier_std_ratio(),
            octree_depth: default_octree_depth(),
            grid_resolution: default_grid_resolution(),
            poisson_iterations: default_poisson_iterations(),
            smoothing_iterations: default_smoothing_iterations(),
            smoothing_lambda: default_smoothing_lambda(),
            unwrap_iterations: default_unwrap_iterations(),
            texture_size: default_texture_size(),
            decimation_ratio: default_decimation_ratio(),
            enhance: false,
            seed: default_seed(),
        }
    }
}

impl Settings {
    pub fn sift(&self) -> Sift {
        Sift::new(self.feature_threshold)
            .max_features(self.max_features)
            .min_features(self.min_features)
    }

    pub fn matcher(&self) -> RatioMatcher {
        RatioMatcher::new(self.match_ratio)
    }

    /// Intrinsics of an image of the given size.
    pub fn intrinsics(&self, width: u32, height: u32) -> CameraIntrinsics {
        let intrinsics = CameraIntrinsics::for_image(width, height, self.focal_ratio);
        match self.focal_length {
            Some(focal) => intrinsics.focal(focal),
            None => intrinsics,
        }
    }

    pub fn bundle_adjuster(&self) -> BundleAdjuster {
        BundleAdjuster::new()
            .max_iterations(self.bundle_iterations)
            .tolerance(self.bundle_tolerance)
    }

    pub fn block_matcher(&self) -> BlockMatcher {
        BlockMatcher::new()
            .window(self.stereo_window)
            .disparity_range(self.min_disparity, self.max_disparity)
    }

    pub fn outlier_filter(&self) -> OutlierFilter {
        OutlierFilter::new(self.neighbors, self.outlier_std_ratio)
    }

    pub fn surface_reconstructor(&self) -> SurfaceReconstructor {
        SurfaceReconstructor {
            max_iterations: self.poisson_iterations,
            ..Default::default()
        }
        .normal_neighbors(self.neighbors)
        .octree_depth(self.octree_depth)
        .grid_resolution(self.grid_resolution)
        .smoothing(self.smoothing_iterations, self.smoothing_lambda)
    }

    pub fn unwrapper(&self) -> UvUnwrapper {
        UvUnwrapper::new(self.unwrap_iterations)
    }

    pub fn texture_projector(&self) -> TextureProjector {
        TextureProjector::new(self.texture_size)
    }

    pub fn decimator(&self) -> MeshDecimator {
        MeshDecimator::new(self.decimation_ratio)
    }
}

fn default_feature_threshold() -> f32 {
    0.03
}

fn default_max_features() -> usize {
    500
}

fn default_min_features() -> usize {
    50
}

fn default_match_ratio() -> f32 {
    0.75
}

fn default_focal_ratio() -> f64 {
    1.2
}

fn default_ransac_iterations() -> usize {
    1000
}

fn default_consensus_threshold() -> f64 {
    1.0
}

fn default_minimum_pose_matches() -> usize {
    5
}

fn default_min_parallax() -> f64 {
    0.01
}

fn default_max_reprojection_error() -> f64 {
    4.0
}

fn default_bundle_iterations() -> usize {
    10
}

fn default_bundle_tolerance() -> f64 {
    1e-6
}

fn default_stereo_window() -> usize {
    7
}

fn default_max_disparity() -> usize {
    64
}

fn default_stereo_stride() -> usize {
    2
}

fn default_neighbors() -> usize {
    20
}

fn default_outlier_std_ratio() -> f64 {
    2.0
}

fn default_octree_depth() -> usize {
    7
}

fn default_grid_resolution() -> usize {
    32
}

fn default_poisson_iterations() -> usize {
    200
}

fn default_smoothing_iterations() -> usize {
    3
}

fn default_smoothing_lambda() -> f64 {
    0.5
}

fn default_unwrap_iterations() -> usize {
    50
}

fn default_texture_size() -> u32 {
    512
}

fn default_decimation_ratio() -> f64 {
    0.5
}

fn default_seed() -> u64 {
    0x7e55_e7a
}
