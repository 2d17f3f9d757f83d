//! # Tessera Core
//!
//! Types shared by every stage of the tessera reconstruction pipeline: cameras and poses,
//! features and matches, point clouds, meshes, the float image used for intensity processing and
//! the [`Error`] type. Algorithms live in the stage crates; this crate only holds the data model
//! so that those crates can be combined freely.
//!
//! ## Coordinate conventions
//!
//! Pixels have their origin in the top left corner with `+x` to the right and `+y` down.
//! Camera frames follow the same orientation with `+z` pointing out of the lens, so a point in
//! front of a camera has positive depth. Normalized image coordinates are the intersection of a
//! bearing with the virtual image plane at `z = 1`.
//!
//! ```text
//!          +z (forward)
//!         /
//!        O-----> +x
//!        |
//!        v +y
//! ```

mod camera;
mod cloud;
mod error;
mod feature;
mod float_image;
mod mesh;
mod pose;

pub use camera::*;
pub use cloud::*;
pub use error::*;
pub use feature::*;
pub use float_image::*;
pub use mesh::*;
pub use pose::*;

pub use image;
pub use nalgebra;
pub use sample_consensus;
