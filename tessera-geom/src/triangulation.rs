use tessera_core::nalgebra::{DMatrix, Matrix3x4, Point2, Point3, UnitVector3, Vector3, Vector4};
use tessera_core::{Camera, CameraToCamera, Pose, WorldToCamera};

/// Points further away than this many baselines are treated as lying at infinity.
const FAR_BASELINES: f64 = 1e3;

/// Linear triangulation by the Direct Linear Transform.
///
/// Every observation contributes the rows of `[b]x P`, where `b` is the bearing and `P` the
/// `[R | t]` matrix of the camera, which vanish for the homogeneous point `X` on the bearing. The
/// point is the right singular vector of the smallest singular value of the stacked system.
/// Working on bearings instead of pixels keeps observations behind a camera meaningful, which the
/// cheirality check relies on.
///
/// When the rays are close to parallel the homogeneous solution approaches infinity. In that case
/// the midpoint of the closest approach of the first two rays is returned instead, which is always
/// finite, so callers should check [`parallax`] if they need well-conditioned points.
///
/// ```
/// use tessera_core::nalgebra::{Point3, UnitQuaternion, UnitVector3, Vector3};
/// use tessera_core::{CameraToCamera, Pose};
/// use tessera_geom::DltTriangulator;
///
/// let point = Point3::new(0.3, 0.1, 2.0);
/// let pose = CameraToCamera::from_parts(
///     Vector3::new(0.1, 0.1, 0.1),
///     UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.1, 0.1)),
/// );
/// let a = UnitVector3::new_normalize(point.coords);
/// let b = UnitVector3::new_normalize(pose.transform(point).coords);
/// let triangulated = DltTriangulator::new().triangulate_relative(pose, a, b);
/// assert!((triangulated - point).norm() < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct DltTriangulator {
    epsilon: f64,
    max_iterations: usize,
}

impl DltTriangulator {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used in the singular value decomposition.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations of the singular value decomposition.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Triangulates a point seen along bearing `a` from camera `A` at the origin and along `b`
    /// from camera `B`. The result is in the frame of camera `A`.
    pub fn triangulate_relative(
        &self,
        pose: CameraToCamera,
        a: UnitVector3<f64>,
        b: UnitVector3<f64>,
    ) -> Point3<f64> {
        let observations = [
            (WorldToCamera::identity(), a),
            (WorldToCamera(pose.isometry()), b),
        ];
        let [(pose_a, a), (pose_b, b)] = observations;
        self.triangulate_observations(&observations)
            .unwrap_or_else(|| ray_midpoint(pose_a, a, pose_b, b))
    }

    /// Triangulates a world point from the poses of the cameras that observed it and the bearings
    /// of the observations in each camera frame. Needs at least two observations.
    pub fn triangulate_observations(
        &self,
        observations: &[(WorldToCamera, UnitVector3<f64>)],
    ) -> Option<Point3<f64>> {
        if observations.len() < 2 {
            return None;
        }
        let mut system = DMatrix::zeros(3 * observations.len(), 4);
        for (i, (pose, bearing)) in observations.iter().enumerate() {
            let rows: Matrix3x4<f64> = bearing.cross_matrix() * pose.matrix3x4();
            system.fixed_slice_mut::<3, 4>(3 * i, 0).copy_from(&rows);
        }
        let solution = system
            .try_svd(false, true, self.epsilon, self.max_iterations)
            .and_then(|svd| svd.v_t)
            .map(|v_t| Vector4::from_iterator(v_t.row(3).iter().copied()));
        let fallback = || {
            let (pose_a, a) = observations[0];
            let (pose_b, b) = observations[1];
            ray_midpoint(pose_a, a, pose_b, b)
        };
        Some(match solution {
            Some(homogeneous) if is_finite_point(&homogeneous) => {
                let point = Point3::from(homogeneous.xyz() / homogeneous.w);
                if within_reach(point, observations) {
                    point
                } else {
                    fallback()
                }
            }
            _ => fallback(),
        })
    }

    /// Triangulates the world point observed at pixel `pa` in camera `a` and pixel `pb` in `b`.
    pub fn triangulate_cameras(
        &self,
        a: &Camera,
        pa: Point2<f64>,
        b: &Camera,
        pb: Point2<f64>,
    ) -> Point3<f64> {
        let observations = [
            (a.world_to_camera(), a.intrinsics.bearing(pa)),
            (b.world_to_camera(), b.intrinsics.bearing(pb)),
        ];
        let [(pose_a, a), (pose_b, b)] = observations;
        self.triangulate_observations(&observations)
            .unwrap_or_else(|| ray_midpoint(pose_a, a, pose_b, b))
    }
}

impl Default for DltTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

fn is_finite_point(homogeneous: &Vector4<f64>) -> bool {
    homogeneous.iter().all(|n| n.is_finite())
        && homogeneous.w.abs() > 1e-12 * homogeneous.xyz().norm()
}

fn optical_center(pose: WorldToCamera) -> Point3<f64> {
    pose.inverse().isometry().translation.vector.into()
}

fn world_direction(pose: WorldToCamera, bearing: UnitVector3<f64>) -> Vector3<f64> {
    pose.inverse().isometry().rotation * bearing.into_inner()
}

/// Largest distance between any two optical centers, or `1.0` when they coincide.
fn baseline(observations: &[(WorldToCamera, UnitVector3<f64>)]) -> f64 {
    let centers: Vec<Point3<f64>> = observations
        .iter()
        .map(|&(pose, _)| optical_center(pose))
        .collect();
    let longest = centers
        .iter()
        .flat_map(|a| centers.iter().map(move |b| (a - b).norm()))
        .fold(0.0, f64::max);
    if longest > f64::EPSILON {
        longest
    } else {
        1.0
    }
}

fn within_reach(point: Point3<f64>, observations: &[(WorldToCamera, UnitVector3<f64>)]) -> bool {
    let reach = FAR_BASELINES * baseline(observations);
    let center = optical_center(observations[0].0);
    (point - center).norm() <= reach
}

/// The midpoint of the shortest segment between two rays. Parallel rays meet far along their
/// mean direction, beyond which nothing is triangulated.
pub fn ray_midpoint(
    pose_a: WorldToCamera,
    a: UnitVector3<f64>,
    pose_b: WorldToCamera,
    b: UnitVector3<f64>,
) -> Point3<f64> {
    let (ca, cb) = (optical_center(pose_a), optical_center(pose_b));
    let (da, db) = (world_direction(pose_a, a), world_direction(pose_b, b));
    let w0 = ca - cb;
    let (ab, ad, bd) = (da.dot(&db), da.dot(&w0), db.dot(&w0));
    let denominator = 1.0 - ab * ab;
    let reach = FAR_BASELINES * (ca - cb).norm().max(1.0);
    let midpoint = Point3::from((ca.coords + cb.coords) / 2.0);
    if denominator < 1e-12 {
        let direction = (da + db).try_normalize(0.0).unwrap_or(da);
        return midpoint + direction * reach;
    }
    let s = ((ab * bd - ad) / denominator).clamp(-reach, reach);
    let t = ((bd - ab * ad) / denominator).clamp(-reach, reach);
    Point3::from(((ca + da * s).coords + (cb + db * t).coords) / 2.0)
}

/// Sine of the angle between the rays of two observations of a world point.
pub fn parallax(point: Point3<f64>, a: &Camera, b: &Camera) -> f64 {
    let (ra, rb) = (point - a.position, point - b.position);
    match (ra.try_normalize(0.0), rb.try_normalize(0.0)) {
        (Some(ra), Some(rb)) => ra.cross(&rb).norm(),
        _ => 0.0,
    }
}

/// Convenience for [`DltTriangulator::triangulate_relative`] with default settings.
pub fn triangulate_relative(
    pose: CameraToCamera,
    a: UnitVector3<f64>,
    b: UnitVector3<f64>,
) -> Point3<f64> {
    DltTriangulator::new().triangulate_relative(pose, a, b)
}
