use average::Mean;
use itertools::Itertools;
use levenberg_marquardt::{differentiate_numerically, LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use tessera_core::nalgebra::{
    dimension::{Dynamic, U1},
    DMatrix, DVector, Point2, Point3, VecStorage, Vector6,
};
use tessera_core::{Camera, CameraIntrinsics, Error, Pose, Result, WorldToCamera};

/// Residual in pixels assigned to both coordinates of an observation whose point falls behind
/// the camera. Constant, so it only pushes the step acceptance and never the gradient.
const BEHIND_PENALTY: f64 = 1e3;

/// A world point seen by a camera at a pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub camera: usize,
    pub point: usize,
    pub pixel: Point2<f64>,
}

/// The outcome of [`BundleAdjuster::adjust`].
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub cameras: Vec<Camera>,
    /// Root mean square reprojection error in pixels before refinement.
    pub initial_rms: f64,
    /// Root mean square reprojection error in pixels of the returned cameras.
    pub final_rms: f64,
    /// Solver rounds spent, at most [`BundleAdjuster::max_iterations`].
    pub iterations: usize,
    /// Set when the solver ran out of iterations. The cameras are still the best ones seen.
    pub warning: Option<Error>,
}

/// Refines camera poses by Levenberg-Marquardt minimization of the squared reprojection error.
///
/// The first camera defines the world frame and is held fixed; every other camera contributes
/// its se(3) vector to the parameters. Points are held fixed as well, so callers alternate
/// adjustment with re-triangulation.
///
/// The solve runs in at most `max_iterations` rounds, each a Levenberg-Marquardt run allowed one
/// Jacobian's worth of evaluations. It has converged once a round improves the RMS error by no
/// more than `tolerance` relative to the previous round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleAdjuster {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub max_observations: usize,
}

impl Default for BundleAdjuster {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-6,
            max_observations: 2000,
        }
    }
}

impl BundleAdjuster {
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Relative reduction of the total error below which the solver stops.
    #[must_use]
    pub fn tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    /// Observations beyond this count are thinned out evenly before solving.
    #[must_use]
    pub fn max_observations(self, max_observations: usize) -> Self {
        Self {
            max_observations,
            ..self
        }
    }

    /// Refines every camera but the first against the given observations.
    ///
    /// Observations that reference a missing camera or point are ignored. Fails only when no
    /// camera is given at all.
    pub fn adjust(
        &self,
        cameras: &[Camera],
        points: &[Point3<f64>],
        observations: &[Observation],
    ) -> Result<Adjustment> {
        let first = cameras.first().ok_or(Error::InsufficientData {
            stage: "bundle adjustment",
            required: 1,
            found: 0,
        })?;
        let valid = observations
            .iter()
            .filter(|o| o.camera < cameras.len() && o.point < points.len())
            .copied()
            .collect_vec();
        let step = (valid.len() + self.max_observations.max(1) - 1) / self.max_observations.max(1);
        let observations = valid.into_iter().step_by(step.max(1)).collect_vec();

        let mut problem = ReprojectionProblem {
            fixed: first.world_to_camera(),
            poses: cameras[1..].iter().map(Camera::world_to_camera).collect(),
            intrinsics: cameras.iter().map(|c| c.intrinsics).collect(),
            points,
            observations,
        };
        let initial_rms = problem.rms();
        if cameras.len() < 2 || problem.observations.is_empty() {
            debug!("Nothing to adjust, keeping {} cameras", cameras.len());
            return Ok(Adjustment {
                cameras: cameras.to_vec(),
                initial_rms,
                final_rms: initial_rms,
                iterations: 0,
                warning: None,
            });
        }
        debug!(
            "Adjusting {} cameras against {} observations, initial RMS {:.4} px",
            cameras.len(),
            problem.observations.len(),
            initial_rms
        );

        let initial_poses = problem.poses.clone();
        let mut rounds = 0;
        let mut evaluations = 0;
        let mut converged = false;
        let mut before = initial_rms;
        while !converged && rounds < self.max_iterations.max(1) {
            let (solved, report) = LevenbergMarquardt::new()
                .with_ftol(self.tolerance)
                .with_patience(1)
                .minimize(problem);
            problem = solved;
            rounds += 1;
            evaluations += report.number_of_evaluations;
            let after = problem.rms();
            trace!(
                "Round {} ended with {:?}, RMS {:.6} px",
                rounds,
                report.termination,
                after
            );
            converged = after == 0.0 || before - after <= self.tolerance * before;
            before = after;
        }
        info!(
            "Levenberg-Marquardt ran {} rounds with {} evaluations",
            rounds, evaluations
        );

        let mut final_rms = problem.rms();
        if !final_rms.is_finite() || final_rms > initial_rms {
            problem.poses = initial_poses;
            final_rms = initial_rms;
        }
        let warning = (!converged).then(|| {
            warn!(
                "Bundle adjustment did not converge in {} rounds, keeping best poses (RMS {:.4} px)",
                rounds, final_rms
            );
            Error::NumericalNonConvergence {
                stage: "bundle adjustment",
                iterations: rounds,
            }
        });

        let cameras = std::iter::once(*first)
            .chain(
                problem
                    .poses
                    .iter()
                    .zip(&cameras[1..])
                    .map(|(&pose, camera)| Camera::from_pose(pose, camera.intrinsics)),
            )
            .collect();
        Ok(Adjustment {
            cameras,
            initial_rms,
            final_rms,
            iterations: rounds,
            warning,
        })
    }
}

#[derive(Clone)]
struct ReprojectionProblem<'a> {
    fixed: WorldToCamera,
    poses: Vec<WorldToCamera>,
    intrinsics: Vec<CameraIntrinsics>,
    points: &'a [Point3<f64>],
    observations: Vec<Observation>,
}

impl ReprojectionProblem<'_> {
    fn pose(&self, camera: usize) -> WorldToCamera {
        if camera == 0 {
            self.fixed
        } else {
            self.poses[camera - 1]
        }
    }

    fn reprojection(&self, observation: &Observation) -> [f64; 2] {
        let camera = self
            .pose(observation.camera)
            .transform(self.points[observation.point]);
        if camera.z <= f64::EPSILON {
            return [BEHIND_PENALTY; 2];
        }
        let pixel = self.intrinsics[observation.camera]
            .uncalibrate(Point2::from(camera.coords.xy() / camera.z));
        let delta = pixel - observation.pixel;
        [delta.x, delta.y]
    }

    fn rms(&self) -> f64 {
        if self.observations.is_empty() {
            return 0.0;
        }
        let mean: Mean = self
            .observations
            .iter()
            .map(|o| {
                let [x, y] = self.reprojection(o);
                x * x + y * y
            })
            .collect();
        mean.mean().sqrt()
    }
}

impl LeastSquaresProblem<f64, Dynamic, Dynamic> for ReprojectionProblem<'_> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        for (ix, pose) in self.poses.iter_mut().enumerate() {
            *pose = Pose::from_se3(params.fixed_rows::<6>(6 * ix).into_owned());
        }
    }

    fn params(&self) -> DVector<f64> {
        let se3s: Vec<Vector6<f64>> = self.poses.iter().map(|p| p.se3()).collect();
        DVector::from_iterator(
            6 * self.poses.len(),
            se3s.iter().flat_map(|se3| se3.iter().copied()),
        )
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(DVector::from_iterator(
            2 * self.observations.len(),
            self.observations.iter().flat_map(|o| self.reprojection(o)),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut clone = self.clone();
        differentiate_numerically(&mut clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::{UnitQuaternion, Vector2, Vector3};

    fn scene() -> (Vec<Camera>, Vec<Point3<f64>>, Vec<Observation>) {
        let intrinsics = CameraIntrinsics::for_image(640, 480, 1.2);
        let cameras: Vec<Camera> = (0..3)
            .map(|i| Camera {
                position: Point3::new(i as f64, 0.1 * i as f64, 0.0),
                orientation: UnitQuaternion::from_euler_angles(0.0, -0.08 * i as f64, 0.0),
                intrinsics,
            })
            .collect();
        let points: Vec<Point3<f64>> = (0..40)
            .map(|i| {
                Point3::new(
                    (i as f64 * 0.61).sin() * 1.5 + 1.0,
                    (i as f64 * 1.13).cos(),
                    5.0 + (i as f64 * 0.37).sin(),
                )
            })
            .collect();
        let observations = cameras
            .iter()
            .enumerate()
            .flat_map(|(c, camera)| {
                points.iter().enumerate().filter_map(move |(p, &point)| {
                    Some(Observation {
                        camera: c,
                        point: p,
                        pixel: camera.project(point)?,
                    })
                })
            })
            .collect();
        (cameras, points, observations)
    }

    #[test]
    fn recovers_perturbed_cameras() {
        let (truth, points, observations) = scene();
        let mut cameras = truth.clone();
        cameras[1].position += Vector3::new(0.05, -0.03, 0.04);
        cameras[2].orientation *= UnitQuaternion::from_euler_angles(0.01, 0.02, -0.01);
        let adjustment = BundleAdjuster::new()
            .max_iterations(50)
            .adjust(&cameras, &points, &observations)
            .unwrap();
        assert!(adjustment.final_rms < 1e-3 * adjustment.initial_rms.max(1.0));
        assert_eq!(adjustment.cameras[0], truth[0]);
        for (found, truth) in adjustment.cameras.iter().zip(&truth) {
            assert_relative_eq!(found.position, truth.position, epsilon = 1e-4);
        }
    }

    #[test]
    fn never_worsens_the_error() {
        let (mut cameras, points, observations) = scene();
        cameras[2].position.x += 0.2;
        let adjustment = BundleAdjuster::new()
            .max_iterations(1)
            .adjust(&cameras, &points, &observations)
            .unwrap();
        assert!(adjustment.final_rms <= adjustment.initial_rms);
        assert_eq!(adjustment.cameras.len(), 3);
    }

    #[test]
    fn single_camera_is_returned_unchanged() {
        let (cameras, points, observations) = scene();
        let adjustment = BundleAdjuster::new()
            .adjust(&cameras[..1], &points, &observations)
            .unwrap();
        assert_eq!(adjustment.cameras, cameras[..1].to_vec());
        assert!(adjustment.warning.is_none());
        assert!(BundleAdjuster::new().adjust(&[], &points, &[]).is_err());
    }

    #[test]
    fn thins_out_observations() {
        let (cameras, points, observations) = scene();
        let adjustment = BundleAdjuster::new()
            .max_observations(30)
            .adjust(&cameras, &points, &observations)
            .unwrap();
        assert!(adjustment.final_rms < 1e-6);
    }

    #[test]
    fn stops_at_the_round_cap_with_a_warning() {
        let (truth, points, observations) = scene();
        let observations = observations
            .into_iter()
            .enumerate()
            .map(|(ix, mut o)| {
                o.pixel += Vector2::new((ix as f64 * 0.7).sin(), (ix as f64 * 1.3).cos());
                o
            })
            .collect_vec();
        let mut cameras = truth;
        cameras[1].position.x += 0.2;
        cameras[2].orientation *= UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0);
        let adjustment = BundleAdjuster::new()
            .max_iterations(1)
            .tolerance(1e-12)
            .adjust(&cameras, &points, &observations)
            .unwrap();
        assert_eq!(adjustment.iterations, 1);
        assert!(adjustment.final_rms < adjustment.initial_rms);
        assert!(matches!(
            adjustment.warning,
            Some(Error::NumericalNonConvergence { iterations: 1, .. })
        ));
    }

    #[test]
    fn converged_solve_stays_under_the_cap() {
        let (truth, points, observations) = scene();
        let mut cameras = truth;
        cameras[1].position += Vector3::new(0.02, 0.0, -0.01);
        let adjustment = BundleAdjuster::new()
            .max_iterations(50)
            .adjust(&cameras, &points, &observations)
            .unwrap();
        assert!(adjustment.iterations < 50);
        assert!(adjustment.warning.is_none());
    }
}
