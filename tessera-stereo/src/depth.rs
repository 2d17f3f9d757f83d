use crate::DisparityMap;
use log::*;
use tessera_core::nalgebra::{Point2, Point3};
use tessera_core::{Camera, Pose};

/// Per-pixel depth along the optical axis of the left camera of a [`StereoRig`].
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<Option<f64>>,
}

impl DepthMap {
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        self.data[y * self.width + x]
    }
}

/// Two cameras treated as a rectified pair, ordered so that `right` lies on the `+x` side of
/// `left`. Block matching then always searches for non-negative disparities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoRig {
    pub left: Camera,
    pub right: Camera,
    /// Set when the cameras were given right first. Callers must swap their images too.
    pub swapped: bool,
}

impl StereoRig {
    /// Orders two cameras into a rig, or `None` when their optical centers coincide.
    pub fn new(a: Camera, b: Camera) -> Option<Self> {
        let offset = a.world_to_camera().transform(b.position);
        if offset.coords.norm() <= f64::EPSILON {
            return None;
        }
        let swapped = offset.x < 0.0;
        if swapped {
            debug!("Second camera is left of the first, swapping stereo roles");
        }
        let (left, right) = if swapped { (b, a) } else { (a, b) };
        Some(Self {
            left,
            right,
            swapped,
        })
    }

    pub fn baseline(&self) -> f64 {
        (self.right.position - self.left.position).norm()
    }

    pub fn focal(&self) -> f64 {
        self.left.intrinsics.focals.x
    }

    /// `baseline * focal / disparity` for positive disparities.
    pub fn depth(&self, disparity: f32) -> Option<f64> {
        let disparity = f64::from(disparity);
        (disparity > 0.0 && disparity.is_finite())
            .then(|| self.baseline() * self.focal() / disparity)
    }

    pub fn depth_map(&self, disparity: &DisparityMap) -> DepthMap {
        DepthMap {
            width: disparity.width,
            height: disparity.height,
            data: disparity
                .data
                .iter()
                .map(|d| d.and_then(|d| self.depth(d)))
                .collect(),
        }
    }

    /// Lifts every `stride`-th pixel of the depth map into the world through the left camera.
    /// Pixels without depth are skipped.
    pub fn back_project(&self, depth: &DepthMap, stride: usize) -> Vec<Point3<f64>> {
        let stride = stride.max(1);
        let points: Vec<Point3<f64>> = (0..depth.height)
            .step_by(stride)
            .flat_map(|y| (0..depth.width).step_by(stride).map(move |x| (x, y)))
            .filter_map(|(x, y)| {
                let z = depth.get(x, y)?;
                Some(self.left.unproject(Point2::new(x as f64, y as f64), z))
            })
            .collect();
        debug!(
            "Back-projected {} points from a {}x{} depth map",
            points.len(),
            depth.width,
            depth.height
        );
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::UnitQuaternion;
    use tessera_core::CameraIntrinsics;

    fn camera(x: f64) -> Camera {
        Camera {
            position: Point3::new(x, 0.0, 0.0),
            orientation: UnitQuaternion::identity(),
            intrinsics: CameraIntrinsics::for_image(100, 80, 1.0),
        }
    }

    #[test]
    fn orders_cameras_left_to_right() {
        let rig = StereoRig::new(camera(1.0), camera(0.0)).unwrap();
        assert!(rig.swapped);
        assert_eq!(rig.left.position.x, 0.0);
        assert!(!StereoRig::new(camera(0.0), camera(1.0)).unwrap().swapped);
        assert!(StereoRig::new(camera(0.0), camera(0.0)).is_none());
    }

    #[test]
    fn zero_disparity_has_no_depth() {
        let rig = StereoRig::new(camera(0.0), camera(0.5)).unwrap();
        assert_eq!(rig.depth(0.0), None);
        assert_relative_eq!(rig.depth(10.0).unwrap(), 0.5 * 100.0 / 10.0);
    }

    #[test]
    fn back_projection_respects_stride_and_validity() {
        let rig = StereoRig::new(camera(0.0), camera(0.5)).unwrap();
        let mut disparity = DisparityMap::new(8, 8);
        disparity.data[0] = Some(10.0);
        disparity.data[1] = Some(10.0);
        disparity.data[2 * 8 + 2] = Some(5.0);
        let points = rig.back_project(&rig.depth_map(&disparity), 2);
        assert_eq!(points.len(), 2);
        assert_relative_eq!(points[0].z, 5.0, epsilon = 1e-12);
        assert_relative_eq!(points[1].z, 10.0, epsilon = 1e-12);
    }
}
