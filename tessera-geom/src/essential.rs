use crate::triangulation::triangulate_relative;
use tessera_core::nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3, SVD};
use tessera_core::sample_consensus::Model;
use tessera_core::{BearingMatch, CameraToCamera, Pose};

/// An essential matrix `E` satisfying the epipolar constraint
///
/// ```text
/// transpose(b) * E * a = 0
/// ```
///
/// for homogeneous normalized image coordinates `a` in camera `A` and `b` in camera `B`. For the
/// relative pose `b = R a + t` it equals `[t]x R`.
///
/// `E * a` is the normal of the epipolar plane through `a` expressed in camera `B`: every bearing
/// of camera `B` that can observe the same point is perpendicular to it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Finds the closest essential matrix in Frobenius norm by averaging the two largest
    /// singular values and zeroing the smallest.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let average = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = average;
        svd.singular_values[1] = average;
        svd.recompose().ok().map(Self)
    }

    /// The two rotations compatible with the matrix and the translation direction of unknown
    /// sign and length.
    ///
    /// `epsilon` and `max_iterations` bound the singular value decomposition.
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let svd = SVD::try_new(self.0, true, true, epsilon, max_iterations)?;
        let (mut u, mut v_t) = (svd.u?, svd.v_t?);
        // The last singular vectors are only determined up to sign since the singular values are
        // `(s, s, 0)`; flip them to get proper rotations.
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        if v_t.determinant() < 0.0 {
            v_t.row_mut(2).neg_mut();
        }
        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// All four relative poses the matrix decomposes into. Exactly one of them places observed
    /// points in front of both cameras; see [`EssentialMatrix::pose_from_matches`].
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                let rot_a = UnitQuaternion::from_rotation_matrix(&rot_a);
                let rot_b = UnitQuaternion::from_rotation_matrix(&rot_b);
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// Picks the decomposition that puts the most matches in front of both cameras.
    ///
    /// Returns the pose with a unit length translation and the number of matches that satisfied
    /// the cheirality constraint, or `None` if no pose has any point in front of both cameras.
    pub fn pose_from_matches(
        &self,
        matches: &[BearingMatch],
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(CameraToCamera, usize)> {
        let poses = self.possible_unscaled_poses(epsilon, max_iterations)?;
        poses
            .iter()
            .map(|&pose| (pose, count_in_front(pose, matches)))
            .filter(|&(_, count)| count > 0)
            .max_by_key(|&(_, count)| count)
    }
}

/// Number of matches triangulating to a point with positive depth in both cameras.
pub fn count_in_front(pose: CameraToCamera, matches: &[BearingMatch]) -> usize {
    matches
        .iter()
        .filter(|m| {
            let point = triangulate_relative(pose, m.0, m.1);
            point.z > 0.0 && pose.transform(point).z > 0.0
        })
        .count()
}

/// The essential matrix of a relative pose.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        let isometry = pose.isometry();
        let rotation = isometry.rotation.to_rotation_matrix();
        Self(isometry.translation.vector.cross_matrix() * rotation.matrix())
    }
}

impl Model<BearingMatch> for EssentialMatrix {
    /// Square root of the Sampson distance of the match on the normalized image planes.
    fn residual(&self, data: &BearingMatch) -> f64 {
        let &BearingMatch(a, b) = data;
        if a.z <= f64::EPSILON || b.z <= f64::EPSILON {
            return f64::INFINITY;
        }
        let a = a.into_inner() / a.z;
        let b = b.into_inner() / b.z;
        let ea = self.0 * a;
        let etb = self.0.transpose() * b;
        let numerator = b.dot(&ea);
        let denominator = ea.x * ea.x + ea.y * ea.y + etb.x * etb.x + etb.y * etb.y;
        if denominator <= f64::EPSILON * f64::EPSILON {
            return numerator.abs();
        }
        numerator.abs() / denominator.sqrt()
    }
}
