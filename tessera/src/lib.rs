//! # `tessera`
//!
//! Photographs in, textured mesh out.
//!
//! [`Pipeline`] chains the stage crates into a complete multi-view reconstruction:
//!
//! 1. scale invariant features per image ([`features`])
//! 2. ratio test matching between consecutive images
//! 3. incremental structure from motion with bundle adjustment ([`sfm`])
//! 4. block matching stereo on every adjacent pair ([`stereo`])
//! 5. statistical outlier removal and Poisson surface reconstruction ([`surface`])
//! 6. parameterization, texture baking and decimation ([`mesh`])
//! 7. image quality figures ([`quality`])
//!
//! Every tunable lives in [`Settings`]. Hot kernels run behind the [`Accelerator`] trait, with
//! [`CpuAccelerator`] as the portable implementation.
//!
//! ## Modules
//! * [`features`] - keypoint detection, description and matching
//! * [`geom`] - relative and absolute pose, consensus and triangulation
//! * [`optimize`] - bundle adjustment
//! * [`stereo`] - dense disparity and depth
//! * [`surface`] - point cloud filtering and surface reconstruction
//! * [`mesh`] - unwrapping, texturing and decimation
//! * [`export`] - PLY output

mod accelerator;
pub mod export;
mod pipeline;
mod progress;
pub mod quality;
mod settings;
pub mod sfm;

pub use accelerator::*;
pub use pipeline::*;
pub use progress::*;
pub use quality::QualityMetrics;
pub use settings::*;

pub use tessera_core::*;

/// Feature extraction and matching
pub mod features {
    pub use tessera_features::*;
}

/// Multiple view geometry
pub mod geom {
    pub use tessera_geom::*;
}

/// Non-linear refinement
pub mod optimize {
    pub use tessera_optimize::*;
}

/// Dense stereo
pub mod stereo {
    pub use tessera_stereo::*;
}

/// Surface reconstruction
pub mod surface {
    pub use tessera_surface::*;
}

/// Mesh processing
pub mod mesh {
    pub use tessera_mesh::*;
}
