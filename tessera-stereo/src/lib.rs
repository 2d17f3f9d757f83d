//! Dense depth from pairs of calibrated views.
//!
//! [`BlockMatcher`] searches every pixel of the left image along its row in the right image and
//! produces a [`DisparityMap`]. A [`StereoRig`] turns disparities into depths with
//! `baseline * focal / disparity` and lifts them into the world through the left camera.
//!
//! The pair is assumed to be rectified: both cameras share an orientation and are displaced
//! along their `x` axis. Pairs that deviate from this produce fewer valid disparities rather
//! than wrong ones, since ambiguous matches are rejected.

mod block_matching;
mod depth;

pub use block_matching::*;
pub use depth::*;
