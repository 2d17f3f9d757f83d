//! From a noisy point cloud to a closed triangle mesh.
//!
//! [`OutlierFilter`] drops points whose neighborhoods are unusually sparse. [`SurfaceReconstructor`]
//! then orients normals with [`estimate_normals`], bins the oriented samples into an [`Octree`],
//! solves for an indicator function with [`PoissonSolver`] and extracts its level set with
//! [`extract_isosurface`].

mod filter;
mod index;
mod isosurface;
mod normals;
mod octree;
mod poisson;
mod reconstructor;

pub use filter::*;
pub use index::*;
pub use isosurface::*;
pub use normals::*;
pub use octree::*;
pub use poisson::*;
pub use reconstructor::*;
