//! Two-view and multi-view geometry for the reconstruction pipeline.
//!
//! ## Relative pose
//!
//! Bearing matches between two images are fed to [`FivePoint`] inside [`Ransac`]. The winning
//! [`EssentialMatrix`] decomposes into four relative poses, of which
//! [`EssentialMatrix::pose_from_matches`] keeps the one placing the most triangulated points in
//! front of both cameras.
//!
//! ## Triangulation
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! ## Absolute pose
//!
//! Once points exist, further cameras are located from 2D-3D correspondences with [`DltPnp`].

mod essential;
mod five_point;
mod pnp;
mod ransac;
mod triangulation;

pub use essential::*;
pub use five_point::*;
pub use pnp::*;
pub use ransac::*;
pub use triangulation::*;
