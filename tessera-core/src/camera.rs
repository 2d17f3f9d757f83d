use crate::{CameraToWorld, Pose, WorldToCamera};
use nalgebra::{
    Isometry3, Matrix3, Matrix3x4, Point2, Point3, Translation3, UnitQuaternion, UnitVector3,
    Vector2, Vector3,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Lens distortion is not modelled. The intrinsic matrix is upper triangular with positive focals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// A reasonable guess for an uncalibrated camera: square pixels, the principal point at the
    /// image center and a focal length of `focal_ratio * max(width, height)` pixels.
    pub fn for_image(width: u32, height: u32, focal_ratio: f64) -> Self {
        let focal = focal_ratio * f64::from(width.max(height));
        Self::identity()
            .focal(focal)
            .principal_point(Point2::new(f64::from(width) / 2.0, f64::from(height) / 2.0))
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Converts a pixel into normalized image coordinates (the virtual image plane at `z = 1`).
    ///
    /// ```
    /// use tessera_core::CameraIntrinsics;
    /// use tessera_core::nalgebra::{Point2, Vector2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let pixel = Point2::new(471.0, 322.0);
    /// let back = intrinsics.uncalibrate(intrinsics.calibrate(pixel));
    /// assert!((back - pixel).norm() < 1e-9);
    /// ```
    pub fn calibrate(&self, pixel: Point2<f64>) -> Point2<f64> {
        let centered = pixel - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point2::new(x, y)
    }

    /// Converts normalized image coordinates back into pixels.
    pub fn uncalibrate(&self, normalized: Point2<f64>) -> Point2<f64> {
        let y = normalized.y * self.focals.y;
        let x = normalized.x * self.focals.x + self.skew * normalized.y;
        Point2::new(x, y) + self.principal_point.coords
    }

    /// The unit bearing through a pixel.
    pub fn bearing(&self, pixel: Point2<f64>) -> UnitVector3<f64> {
        UnitVector3::new_normalize(self.calibrate(pixel).coords.push(1.0))
    }
}

/// A calibrated camera placed in the world.
///
/// `position` is the optical center and `orientation` rotates camera-frame directions into the
/// world. Both are refined by pose estimation and bundle adjustment and left untouched afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub intrinsics: CameraIntrinsics,
}

impl Camera {
    /// A camera at the world origin looking down `+z`.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
            intrinsics,
        }
    }

    pub fn from_pose(pose: WorldToCamera, intrinsics: CameraIntrinsics) -> Self {
        let CameraToWorld(isometry) = pose.inverse();
        Self {
            position: isometry.translation.vector.into(),
            orientation: isometry.rotation,
            intrinsics,
        }
    }

    pub fn camera_to_world(&self) -> CameraToWorld {
        CameraToWorld(Isometry3::from_parts(
            Translation3::from(self.position.coords),
            self.orientation,
        ))
    }

    pub fn world_to_camera(&self) -> WorldToCamera {
        self.camera_to_world().inverse()
    }

    /// The direction the camera looks in, in world coordinates.
    pub fn view_direction(&self) -> Vector3<f64> {
        self.orientation * Vector3::z()
    }

    /// The 3x4 projection matrix `K [R | t]`.
    pub fn projection_matrix(&self) -> Matrix3x4<f64> {
        self.intrinsics.matrix() * self.world_to_camera().matrix3x4()
    }

    /// Projects a world point into pixel coordinates, or `None` when it lies behind the camera.
    pub fn project(&self, point: Point3<f64>) -> Option<Point2<f64>> {
        let camera = self.world_to_camera().transform(point);
        if camera.z <= f64::EPSILON {
            return None;
        }
        Some(
            self.intrinsics
                .uncalibrate(Point2::from(camera.coords.xy() / camera.z)),
        )
    }

    /// Lifts a pixel with known depth along the optical axis back into the world.
    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let normalized = self.intrinsics.calibrate(pixel);
        let camera = Point3::new(normalized.x * depth, normalized.y * depth, depth);
        self.camera_to_world().transform(camera)
    }
}
