use crate::PointProjection;
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{Isometry3, Matrix3x4, Point3, Translation3, UnitQuaternion, Vector3, Vector6};
use sample_consensus::Model;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Implemented by the pose newtypes of this crate:
///
/// * [`WorldToCamera`] - Transforms world points into the camera frame
/// * [`CameraToWorld`] - Transforms camera-frame points into the world
/// * [`CameraToCamera`] - Transforms points from the frame of one camera into another
///
/// The camera frame has its origin at the optical center with `+x` right, `+y` down and `+z`
/// pointing forwards out of the lens.
pub trait Pose: From<Isometry3<f64>> + Clone + Copy {
    type Inverse: Pose;

    /// Retrieve the isometry.
    fn isometry(self) -> Isometry3<f64>;

    /// Creates a pose with no change in position or orientation.
    fn identity() -> Self {
        Isometry3::identity().into()
    }

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Applies a scale factor to the translation component.
    #[must_use]
    fn scale(self, scale: f64) -> Self {
        let mut isometry = self.isometry();
        isometry.translation.vector *= scale;
        isometry.into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Isometry3::from_parts(Translation3::from(translation), rotation).into()
    }

    /// The `[R | t]` matrix of the transform.
    fn matrix3x4(self) -> Matrix3x4<f64> {
        self.isometry().to_homogeneous().fixed_slice::<3, 4>(0, 0).into_owned()
    }

    /// The se(3) vector of the pose: translation followed by the scaled rotation axis.
    fn se3(self) -> Vector6<f64> {
        let isometry = self.isometry();
        let t = isometry.translation.vector;
        let r = isometry.rotation.scaled_axis();
        Vector6::new(t.x, t.y, t.z, r.x, r.y, r.z)
    }

    /// Inverse of [`Pose::se3`].
    fn from_se3(se3: Vector6<f64>) -> Self {
        let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(se3[3], se3[4], se3[5]));
        Self::from_parts(se3.xyz(), rotation)
    }

    fn transform(self, input: Point3<f64>) -> Point3<f64> {
        self.isometry().transform_point(&input)
    }
}

/// Transforms world points into the frame of a camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub Isometry3<f64>);

impl Pose for WorldToCamera {
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> Isometry3<f64> {
        self.into()
    }
}

impl Model<PointProjection> for WorldToCamera {
    /// Distance on the normalized image plane between the observation and the reprojected point.
    fn residual(&self, data: &PointProjection) -> f64 {
        let camera = self.transform(data.world);
        if camera.z <= f64::EPSILON {
            return f64::INFINITY;
        }
        (camera.coords.xy() / camera.z - data.normalized.coords).norm()
    }
}

/// Places a camera in the world: transforms camera-frame points into world coordinates.
/// The translation is the optical center of the camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub Isometry3<f64>);

impl Pose for CameraToWorld {
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> Isometry3<f64> {
        self.into()
    }
}

/// Transforms points from the frame of camera `A` into the frame of camera `B`.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToCamera(pub Isometry3<f64>);

impl Pose for CameraToCamera {
    type Inverse = CameraToCamera;

    #[inline(always)]
    fn isometry(self) -> Isometry3<f64> {
        self.into()
    }
}

impl CameraToCamera {
    /// The relative pose between two cameras placed in the same world.
    pub fn between(a: WorldToCamera, b: WorldToCamera) -> Self {
        Self(b.isometry() * a.isometry().inverse())
    }
}
