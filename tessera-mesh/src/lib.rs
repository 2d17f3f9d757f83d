//! Post-processing of reconstructed meshes.
//!
//! [`UvUnwrapper`] lays a mesh out in the unit square with one texture coordinate per triangle
//! corner, [`TextureProjector`] bakes an atlas for those coordinates from the source photographs
//! and [`MeshDecimator`] reduces the triangle count with quadric error metrics.

mod decimate;
mod quadric;
mod texture;
mod unwrap;

pub use decimate::*;
pub use quadric::*;
pub use texture::*;
pub use unwrap::*;
