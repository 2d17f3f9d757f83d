//! Non-linear refinement of reconstructed cameras.
//!
//! [`BundleAdjuster`] minimizes the pixel reprojection error of observed world points over the
//! poses of all cameras but the first with Levenberg-Marquardt. Failing to converge is a soft
//! condition: the best poses seen are returned together with a warning.

mod bundle_adjuster;

pub use bundle_adjuster::*;
