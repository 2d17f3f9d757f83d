//! Incremental structure from motion over an ordered sequence of views.

use crate::Settings;
use itertools::Itertools;
use log::*;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::collections::HashMap;
use tessera_core::nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use tessera_core::sample_consensus::Consensus;
use tessera_core::{
    BearingMatch, Camera, CameraIntrinsics, CameraToCamera, Error, Feature, FeatureMatch,
    PointProjection, Pose, Result, WorldToCamera,
};
use tessera_geom::{parallax, DltPnp, DltTriangulator, EssentialMatrix, FivePoint, Ransac};
use tessera_optimize::Observation;

const SVD_EPSILON: f64 = 1e-12;
const SVD_ITERATIONS: usize = 1000;

/// One feature followed through consecutive views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    /// `(view, feature)` pairs in view order.
    pub observations: Vec<(usize, usize)>,
}

/// Chains the matches between consecutive views into tracks.
///
/// `matches[i]` holds the matches from view `i` (query) to view `i + 1` (train). A feature is
/// part of at most one track.
pub fn build_tracks(matches: &[Vec<FeatureMatch>]) -> Vec<Track> {
    let mut tracks: Vec<Track> = Vec::new();
    let mut lookup: HashMap<(usize, usize), usize> = HashMap::new();
    for (view, view_matches) in matches.iter().enumerate() {
        for m in view_matches {
            let next = (view + 1, m.train);
            if lookup.contains_key(&next) {
                continue;
            }
            let track = match lookup.get(&(view, m.query)) {
                Some(&track) => track,
                None => {
                    tracks.push(Track {
                        observations: vec![(view, m.query)],
                    });
                    lookup.insert((view, m.query), tracks.len() - 1);
                    tracks.len() - 1
                }
            };
            tracks[track].observations.push(next);
            lookup.insert(next, track);
        }
    }
    debug!(
        "Chained {} matches into {} tracks",
        matches.iter().map(Vec::len).sum::<usize>(),
        tracks.len()
    );
    tracks
}

/// Cameras and sparse points recovered from feature matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseReconstruction {
    pub cameras: Vec<Camera>,
    pub tracks: Vec<Track>,
    /// Triangulated position of every track, parallel to `tracks`.
    pub points: Vec<Option<Point3<f64>>>,
    /// Soft conditions met on the way.
    pub warnings: Vec<String>,
}

impl SparseReconstruction {
    /// Triangulated points together with the first view observing each.
    pub fn points_with_origins(&self) -> impl Iterator<Item = (Point3<f64>, usize)> + '_ {
        self.tracks
            .iter()
            .zip(&self.points)
            .filter_map(|(track, point)| Some(((*point)?, track.observations.first()?.0)))
    }

    pub fn point_count(&self) -> usize {
        self.points.iter().flatten().count()
    }
}

/// Incremental reconstruction: relative pose for the first pair, absolute pose for every later
/// view, then bundle adjustment and a final triangulation of every track.
pub struct StructureFromMotion<'a> {
    settings: &'a Settings,
    features: &'a [Vec<Feature>],
    matches: &'a [Vec<FeatureMatch>],
    intrinsics: &'a [CameraIntrinsics],
    triangulator: DltTriangulator,
    rng: Pcg64,
}

impl<'a> StructureFromMotion<'a> {
    /// `matches[i]` connects `features[i]` to `features[i + 1]`.
    pub fn new(
        settings: &'a Settings,
        features: &'a [Vec<Feature>],
        matches: &'a [Vec<FeatureMatch>],
        intrinsics: &'a [CameraIntrinsics],
    ) -> Self {
        Self {
            settings,
            features,
            matches,
            intrinsics,
            triangulator: DltTriangulator::new(),
            rng: Pcg64::seed_from_u64(settings.seed),
        }
    }

    pub fn reconstruct(mut self) -> Result<SparseReconstruction> {
        let views = self.features.len();
        if views < 2 || self.intrinsics.len() != views || self.matches.len() + 1 < views {
            return Err(Error::InsufficientData {
                stage: "structure from motion",
                required: 2,
                found: views.min(self.intrinsics.len()),
            });
        }
        let mut reconstruction = SparseReconstruction {
            tracks: build_tracks(self.matches),
            ..Default::default()
        };
        reconstruction.points = vec![None; reconstruction.tracks.len()];

        let first = Camera::new(self.intrinsics[0]);
        let second = match self.relative_pose(0) {
            Some(pose) => Camera::from_pose(WorldToCamera(pose.isometry()), self.intrinsics[1]),
            None => {
                reconstruction
                    .warnings
                    .push("too few matches between views 0 and 1, assumed a unit baseline".into());
                default_camera(&first, 1.0, self.intrinsics[1])
            }
        };
        reconstruction.cameras = vec![first, second];
        self.triangulate_new(&mut reconstruction);
        info!(
            "Initialized reconstruction with {} points from the first pair",
            reconstruction.point_count()
        );

        for view in 2..views {
            let camera = self.register_view(&mut reconstruction, view);
            reconstruction.cameras.push(camera);
            self.triangulate_new(&mut reconstruction);
            info!(
                "Registered view {}, {} points in total",
                view,
                reconstruction.point_count()
            );
        }

        self.bundle_adjust(&mut reconstruction)?;
        self.triangulate_all(&mut reconstruction);
        info!(
            "Reconstructed {} cameras and {} points",
            reconstruction.cameras.len(),
            reconstruction.point_count()
        );
        Ok(reconstruction)
    }

    /// Pose of view `view + 1` relative to `view`, with a unit length translation.
    fn relative_pose(&mut self, view: usize) -> Option<CameraToCamera> {
        let (a, b) = (&self.features[view], &self.features[view + 1]);
        let (ia, ib) = (self.intrinsics[view], self.intrinsics[view + 1]);
        let bearings = self.matches[view]
            .iter()
            .map(|m| {
                let (pa, pb) = m.points(a, b);
                BearingMatch(ia.bearing(pa), ib.bearing(pb))
            })
            .collect_vec();
        if bearings.len() < self.settings.minimum_pose_matches.max(5) {
            warn!(
                "Only {} matches between views {} and {}, not estimating their relative pose",
                bearings.len(),
                view,
                view + 1
            );
            return None;
        }
        debug!("Estimating essential matrix on {} matches", bearings.len());
        let threshold = self.settings.consensus_threshold / ia.focals.x.max(f64::EPSILON);
        let mut consensus = Ransac::new(self.settings.ransac_iterations, threshold, &mut self.rng);
        let (essential, inliers): (EssentialMatrix, _) =
            consensus.model_inliers(&FivePoint, bearings.iter().copied())?;
        let inliers = inliers.into_iter().map(|ix| bearings[ix]).collect_vec();
        let (pose, in_front) = essential.pose_from_matches(&inliers, SVD_EPSILON, SVD_ITERATIONS)?;
        info!(
            "Relative pose of views {} and {} from {} inliers, {} in front of both cameras",
            view,
            view + 1,
            inliers.len(),
            in_front
        );
        Some(pose)
    }

    /// Locates a view from its tracked points, falling back to its relative pose to the previous
    /// view and then to a default step along the previous camera's `+x` axis.
    fn register_view(&mut self, reconstruction: &mut SparseReconstruction, view: usize) -> Camera {
        let intrinsics = self.intrinsics[view];
        let projections = reconstruction
            .tracks
            .iter()
            .zip(&reconstruction.points)
            .filter_map(|(track, point)| {
                let &(_, feature) = track.observations.iter().find(|(v, _)| *v == view)?;
                Some(PointProjection {
                    world: (*point)?,
                    normalized: intrinsics.calibrate(self.features[view][feature].point),
                })
            })
            .collect_vec();
        let required = self.settings.minimum_pose_matches.max(6);
        if projections.len() >= required {
            let threshold =
                self.settings.consensus_threshold / intrinsics.focals.x.max(f64::EPSILON);
            let mut consensus =
                Ransac::new(self.settings.ransac_iterations, threshold, &mut self.rng);
            if let Some((pose, inliers)) =
                consensus.model_inliers(&DltPnp::new(), projections.iter().copied())
            {
                let inliers = inliers.into_iter().map(|ix| projections[ix]).collect_vec();
                let pose = DltPnp::new().solve(&inliers).unwrap_or(pose);
                debug!(
                    "Located view {} from {} of {} tracked points",
                    view,
                    inliers.len(),
                    projections.len()
                );
                return Camera::from_pose(pose, intrinsics);
            }
        }
        let placed = reconstruction.cameras.len();
        let (before, previous) = (
            reconstruction.cameras[placed - 2],
            reconstruction.cameras[placed - 1],
        );
        let step = (previous.position - before.position).norm().max(f64::EPSILON);
        warn!(
            "View {} shares {} located points, {} needed; chaining its relative pose",
            view,
            projections.len(),
            required
        );
        match self.relative_pose(view - 1) {
            Some(relative) => {
                reconstruction.warnings.push(format!(
                    "view {view} was placed by chaining its relative pose"
                ));
                let relative = relative.scale(step).isometry();
                let pose = relative * previous.world_to_camera().isometry();
                Camera::from_pose(WorldToCamera(pose), intrinsics)
            }
            None => {
                reconstruction
                    .warnings
                    .push(format!("view {view} could not be located, assumed a default pose"));
                default_camera(&previous, step, intrinsics)
            }
        }
    }

    /// Triangulates a track from every placed camera that observes it, or `None` when the result
    /// fails the parallax, cheirality or reprojection checks.
    fn triangulate_track(&self, cameras: &[Camera], track: &Track) -> Option<Point3<f64>> {
        let observed = track
            .observations
            .iter()
            .filter(|&&(view, _)| view < cameras.len())
            .map(|&(view, feature)| (&cameras[view], self.features[view][feature].point))
            .collect_vec();
        if observed.len() < 2 {
            return None;
        }
        let rays = observed
            .iter()
            .map(|(camera, pixel)| (camera.world_to_camera(), camera.intrinsics.bearing(*pixel)))
            .collect_vec();
        let point = self.triangulator.triangulate_observations(&rays)?;
        let (first, last) = (observed[0].0, observed[observed.len() - 1].0);
        if parallax(point, first, last) < self.settings.min_parallax {
            trace!("Rejected point {:?} with too little parallax", point);
            return None;
        }
        let errors = observed
            .iter()
            .map(|(camera, pixel)| camera.project(point).map(|p| (p - pixel).norm()))
            .collect::<Option<Vec<f64>>>()?;
        let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
        (mean_error <= self.settings.max_reprojection_error).then(|| point)
    }

    fn triangulate_new(&self, reconstruction: &mut SparseReconstruction) {
        let cameras = &reconstruction.cameras;
        for (track, point) in reconstruction.tracks.iter().zip(&mut reconstruction.points) {
            if point.is_none() {
                *point = self.triangulate_track(cameras, track);
            }
        }
    }

    fn triangulate_all(&self, reconstruction: &mut SparseReconstruction) {
        let cameras = &reconstruction.cameras;
        for (track, point) in reconstruction.tracks.iter().zip(&mut reconstruction.points) {
            *point = self.triangulate_track(cameras, track);
        }
    }

    fn bundle_adjust(&self, reconstruction: &mut SparseReconstruction) -> Result<()> {
        let mut points = Vec::new();
        let mut observations = Vec::new();
        for (track, point) in reconstruction.tracks.iter().zip(&reconstruction.points) {
            if let Some(point) = point {
                for &(camera, feature) in &track.observations {
                    observations.push(Observation {
                        camera,
                        point: points.len(),
                        pixel: self.features[camera][feature].point,
                    });
                }
                points.push(*point);
            }
        }
        let adjustment =
            self.settings
                .bundle_adjuster()
                .adjust(&reconstruction.cameras, &points, &observations)?;
        info!(
            "Bundle adjustment moved the reprojection RMS from {:.3} to {:.3} px",
            adjustment.initial_rms, adjustment.final_rms
        );
        if let Some(warning) = adjustment.warning {
            warn!("{}", warning);
            reconstruction.warnings.push(warning.to_string());
        }
        reconstruction.cameras = adjustment.cameras;
        Ok(())
    }
}

/// A camera `step` units along the `+x` axis of `previous`, with the same orientation.
fn default_camera(previous: &Camera, step: f64, intrinsics: CameraIntrinsics) -> Camera {
    let shift = Isometry3::from_parts(
        Translation3::from(Vector3::new(-step, 0.0, 0.0)),
        UnitQuaternion::identity(),
    );
    let pose = shift * previous.world_to_camera().isometry();
    Camera::from_pose(WorldToCamera(pose), intrinsics)
}

/// Pixel distance between every observation of a triangulated point and its reprojection.
pub fn reprojection_errors(
    reconstruction: &SparseReconstruction,
    features: &[Vec<Feature>],
) -> Vec<f64> {
    reconstruction
        .tracks
        .iter()
        .zip(&reconstruction.points)
        .filter_map(|(track, point)| Some((track, (*point)?)))
        .flat_map(|(track, point)| {
            track.observations.iter().filter_map(move |&(view, feature)| {
                let camera = reconstruction.cameras.get(view)?;
                let pixel: Point2<f64> = features[view][feature].point;
                Some((camera.project(point)? - pixel).norm())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;
    use tessera_core::Descriptor;

    fn feature(point: Point2<f64>) -> Feature {
        Feature {
            point,
            scale: 1.0,
            orientation: 0.0,
            response: 1.0,
            descriptor: Descriptor::zeros(),
        }
    }

    fn fm(query: usize, train: usize) -> FeatureMatch {
        FeatureMatch {
            query,
            train,
            distance: 0.0,
            confidence: 1.0,
        }
    }

    /// Points in a box in front of cameras spaced one unit apart along `+x`.
    fn scene(views: usize) -> (Vec<Camera>, Vec<Vec<Feature>>, Vec<Vec<FeatureMatch>>) {
        let mut rng = Pcg64::seed_from_u64(11);
        let intrinsics = CameraIntrinsics::for_image(640, 480, 1.2);
        let cameras = (0..views)
            .map(|i| Camera {
                position: Point3::new(i as f64, 0.0, 0.0),
                orientation: UnitQuaternion::from_euler_angles(0.0, -0.02 * i as f64, 0.0),
                intrinsics,
            })
            .collect_vec();
        let points = (0..150)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-2.0..(views as f64 + 1.0)),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(6.0..10.0),
                )
            })
            .collect_vec();
        let features = cameras
            .iter()
            .map(|camera| {
                points
                    .iter()
                    .map(|&p| feature(camera.project(p).unwrap_or_else(|| Point2::origin())))
                    .collect_vec()
            })
            .collect_vec();
        let visible = |camera: &Camera, p: Point3<f64>| {
            camera.project(p).map_or(false, |px| {
                (0.0..640.0).contains(&px.x) && (0.0..480.0).contains(&px.y)
            })
        };
        let matches = cameras
            .windows(2)
            .map(|pair| {
                points
                    .iter()
                    .enumerate()
                    .filter(|&(_, &p)| visible(&pair[0], p) && visible(&pair[1], p))
                    .map(|(ix, _)| fm(ix, ix))
                    .collect_vec()
            })
            .collect_vec();
        (cameras, features, matches)
    }

    #[test]
    fn tracks_follow_consecutive_matches() {
        let matches = vec![vec![fm(0, 3), fm(1, 4)], vec![fm(3, 7), fm(5, 8)]];
        let tracks = build_tracks(&matches);
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].observations, vec![(0, 0), (1, 3), (2, 7)]);
        assert_eq!(tracks[1].observations, vec![(0, 1), (1, 4)]);
        assert_eq!(tracks[2].observations, vec![(1, 5), (2, 8)]);
    }

    #[test]
    fn recovers_cameras_with_unit_baseline() {
        let (truth, features, matches) = scene(4);
        let intrinsics = truth.iter().map(|c| c.intrinsics).collect_vec();
        let settings = Settings::default();
        let reconstruction = StructureFromMotion::new(&settings, &features, &matches, &intrinsics)
            .reconstruct()
            .unwrap();
        assert_eq!(reconstruction.cameras.len(), 4);
        assert!(reconstruction.point_count() > 50);
        for (found, truth) in reconstruction.cameras.iter().zip(&truth) {
            assert_relative_eq!(found.position, truth.position, epsilon = 1e-3);
        }
        let errors = reprojection_errors(&reconstruction, &features);
        assert!(errors.iter().all(|&e| e < 0.1));
    }

    #[test]
    fn sparse_matches_fall_back_to_a_default_pose() {
        let intrinsics = vec![CameraIntrinsics::for_image(64, 64, 1.2); 2];
        let features = vec![vec![feature(Point2::new(10.0, 10.0))]; 2];
        let matches = vec![vec![fm(0, 0)]];
        let settings = Settings::default();
        let reconstruction = StructureFromMotion::new(&settings, &features, &matches, &intrinsics)
            .reconstruct()
            .unwrap();
        assert_relative_eq!(
            reconstruction.cameras[1].position.coords,
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-9
        );
        assert_eq!(reconstruction.warnings.len(), 1);
        assert_eq!(reconstruction.point_count(), 0);
    }

    #[test]
    fn one_view_is_not_enough() {
        let intrinsics = vec![CameraIntrinsics::for_image(64, 64, 1.2)];
        let features = vec![Vec::new()];
        let settings = Settings::default();
        assert!(matches!(
            StructureFromMotion::new(&settings, &features, &[], &intrinsics).reconstruct(),
            Err(Error::InsufficientData { .. })
        ));
    }
}
