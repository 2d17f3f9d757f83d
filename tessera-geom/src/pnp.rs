use tessera_core::nalgebra::{
    Isometry3, Matrix3, Matrix3x4, Matrix4, Rotation3, SMatrix, Translation3, UnitQuaternion,
    Vector3,
};
use tessera_core::sample_consensus::Estimator;
use tessera_core::{PointProjection, WorldToCamera};

/// Perspective-n-point by the Direct Linear Transform.
///
/// Solves for the 3x4 matrix `P` with `x ~ P X` from at least six world points and their
/// normalized image coordinates, then projects the left 3x3 block onto the closest rotation.
/// World points are centered and scaled before solving to keep the system well conditioned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DltPnp {
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for DltPnp {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

impl DltPnp {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimates the pose from all given projections, or `None` for fewer than six or a
    /// degenerate configuration.
    pub fn solve(&self, projections: &[PointProjection]) -> Option<WorldToCamera> {
        if projections.len() < 6 {
            return None;
        }
        let n = projections.len() as f64;
        let centroid = projections
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.world.coords)
            / n;
        let spread = projections
            .iter()
            .map(|p| (p.world.coords - centroid).norm())
            .sum::<f64>()
            / n;
        if spread <= f64::EPSILON {
            return None;
        }
        let scale = 3f64.sqrt() / spread;

        // Normal equations of the 2n x 12 system, with `p` the rows of `P` concatenated.
        let mut normal = SMatrix::<f64, 12, 12>::zeros();
        for projection in projections {
            let world = ((projection.world.coords - centroid) * scale).push(1.0);
            let (x, y) = (projection.normalized.x, projection.normalized.y);
            let mut row_x = SMatrix::<f64, 1, 12>::zeros();
            let mut row_y = SMatrix::<f64, 1, 12>::zeros();
            for k in 0..4 {
                row_x[k] = world[k];
                row_x[8 + k] = -x * world[k];
                row_y[4 + k] = world[k];
                row_y[8 + k] = -y * world[k];
            }
            normal += row_x.transpose() * row_x + row_y.transpose() * row_y;
        }
        let svd = normal.try_svd(false, true, self.epsilon, self.max_iterations)?;
        let p = svd.v_t?.row(11).transpose();
        let mut projection = Matrix3x4::from_row_slice(p.as_slice());

        // Undo the normalization: P_world = P_normalized * T.
        let mut normalization = Matrix4::identity();
        normalization
            .fixed_slice_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * scale));
        normalization
            .fixed_slice_mut::<3, 1>(0, 3)
            .copy_from(&(-centroid * scale));
        projection *= normalization;

        let mut m: Matrix3<f64> = projection.fixed_slice::<3, 3>(0, 0).into_owned();
        if m.determinant() < 0.0 {
            projection = -projection;
            m = -m;
        }
        let svd = m.try_svd(true, true, self.epsilon, self.max_iterations)?;
        let (u, v_t) = (svd.u?, svd.v_t?);
        let factor = svd.singular_values.mean();
        if factor <= f64::EPSILON {
            return None;
        }
        let rotation = Rotation3::from_matrix_unchecked(u * v_t);
        let translation = projection.column(3).into_owned() / factor;
        let pose = WorldToCamera(Isometry3::from_parts(
            Translation3::from(translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        ));
        pose.0
            .translation
            .vector
            .iter()
            .all(|n| n.is_finite())
            .then(|| pose)
    }
}

impl Estimator<PointProjection> for DltPnp {
    type Model = WorldToCamera;
    type ModelIter = Option<WorldToCamera>;
    const MIN_SAMPLES: usize = 6;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = PointProjection> + Clone,
    {
        let projections: Vec<PointProjection> = data.collect();
        self.solve(&projections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::{Point2, Point3};
    use tessera_core::sample_consensus::Model;
    use tessera_core::Pose;

    fn scene(pose: WorldToCamera) -> Vec<PointProjection> {
        (0..12)
            .map(|i| {
                let world = Point3::new(
                    (i as f64 * 1.3).sin(),
                    (i as f64 * 0.7).cos(),
                    (i as f64 * 2.1).sin() * 0.5,
                );
                let camera = pose.transform(world);
                PointProjection {
                    world,
                    normalized: Point2::new(camera.x / camera.z, camera.y / camera.z),
                }
            })
            .collect()
    }

    #[test]
    fn recovers_an_exact_pose() {
        let pose = WorldToCamera::from_parts(
            Vector3::new(0.2, -0.1, 4.0),
            UnitQuaternion::from_euler_angles(0.1, -0.3, 0.2),
        );
        let projections = scene(pose);
        let found = DltPnp::new().solve(&projections).unwrap();
        assert_relative_eq!(found.0, pose.0, epsilon = 1e-6);
        assert!(projections.iter().all(|p| found.residual(p) < 1e-6));
    }

    #[test]
    fn needs_six_points() {
        let projections = scene(WorldToCamera::from_parts(
            Vector3::new(0.0, 0.0, 5.0),
            UnitQuaternion::identity(),
        ));
        assert!(DltPnp::new().solve(&projections[..5]).is_none());
    }
}
