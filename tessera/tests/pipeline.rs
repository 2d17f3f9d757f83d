use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tessera::image::{DynamicImage, Rgb, RgbImage};
use tessera::nalgebra::{Point2, Point3, UnitQuaternion, Vector3};
use tessera::{Camera, Error, Pipeline, Settings, Stage};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;
const LATTICE: usize = 64;
const CELL: f64 = 0.15;
const BACKGROUND_DEPTH: f64 = 10.0;

/// A cube of side 2 turned about the vertical axis in front of a wall, both covered in the same
/// 3D value noise.
struct Scene {
    lattice: Vec<f64>,
    center: Point3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl Scene {
    fn new() -> Self {
        let mut rng = Pcg64::from_seed([7; 32]);
        Self {
            lattice: (0..LATTICE.pow(3)).map(|_| rng.gen()).collect(),
            center: Point3::new(0.0, 0.0, 5.0),
            rotation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.4),
        }
    }

    fn noise(&self, point: Point3<f64>) -> f64 {
        let q = point.coords / CELL;
        let base = q.map(f64::floor);
        let f = (q - base).map(|t| t * t * (3.0 - 2.0 * t));
        let wrap = |b: f64, d: usize| (b as i64 + d as i64).rem_euclid(LATTICE as i64) as usize;
        (0..8)
            .map(|corner| {
                let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
                let weight = |d: usize, t: f64| if d == 1 { t } else { 1.0 - t };
                let ix = (wrap(base.x, dx) * LATTICE + wrap(base.y, dy)) * LATTICE
                    + wrap(base.z, dz);
                weight(dx, f.x) * weight(dy, f.y) * weight(dz, f.z) * self.lattice[ix]
            })
            .sum()
    }

    /// First surface hit by the ray, the wall when the cube is missed.
    fn hit(&self, origin: Point3<f64>, direction: Vector3<f64>) -> Point3<f64> {
        let inverse = self.rotation.inverse();
        let o = inverse * (origin - self.center);
        let d = inverse * direction;
        let (mut near, mut far) = (f64::NEG_INFINITY, f64::INFINITY);
        let mut missed = false;
        for axis in 0..3 {
            if d[axis].abs() < 1e-12 {
                missed |= o[axis].abs() > 1.0;
            } else {
                let (t1, t2) = ((-1.0 - o[axis]) / d[axis], (1.0 - o[axis]) / d[axis]);
                near = near.max(t1.min(t2));
                far = far.min(t1.max(t2));
            }
        }
        if !missed && near > 0.0 && near <= far {
            return origin + direction * near;
        }
        origin + direction * ((BACKGROUND_DEPTH - origin.z) / direction.z)
    }

    fn render(&self, camera: &Camera) -> DynamicImage {
        let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let bearing = camera
                .intrinsics
                .bearing(Point2::new(f64::from(x), f64::from(y)));
            let direction = camera.orientation * bearing.into_inner();
            let intensity = 0.38 + 0.25 * self.noise(self.hit(camera.position, direction));
            Rgb([
                (255.0 * intensity) as u8,
                (242.0 * intensity) as u8,
                (230.0 * intensity) as u8,
            ])
        });
        DynamicImage::ImageRgb8(image)
    }
}

fn settings() -> Settings {
    Settings {
        feature_threshold: 0.005,
        ransac_iterations: 300,
        octree_depth: 6,
        grid_resolution: 24,
        texture_size: 128,
        ..Default::default()
    }
}

/// Views one unit apart along `+x`, centered on the cube.
fn views(count: usize) -> (Vec<Camera>, Vec<DynamicImage>) {
    let scene = Scene::new();
    let intrinsics = settings().intrinsics(WIDTH, HEIGHT);
    let cameras: Vec<Camera> = (0..count)
        .map(|i| Camera {
            position: Point3::new(i as f64 - (count - 1) as f64 / 2.0, 0.0, 0.0),
            orientation: UnitQuaternion::identity(),
            intrinsics,
        })
        .collect();
    let images = cameras.iter().map(|camera| scene.render(camera)).collect();
    (cameras, images)
}

#[test]
fn one_image_is_insufficient() {
    let _ = pretty_env_logger::try_init_timed();
    let (_, images) = views(1);
    assert!(matches!(
        Pipeline::new(settings()).run(&images),
        Err(Error::InsufficientData { found: 1, .. })
    ));
}

#[test]
fn two_images_make_a_mesh_and_report_progress() {
    let _ = pretty_env_logger::try_init_timed();
    let (_, images) = views(2);
    let (sender, receiver) = std::sync::mpsc::channel();
    let reconstruction = Pipeline::new(settings())
        .on_progress(move |p| sender.send((p.stage, p.fraction)).unwrap())
        .run(&images)
        .unwrap();
    assert!(!reconstruction.mesh.is_empty());
    assert!(reconstruction.mesh.validate());
    assert_eq!(reconstruction.cameras.len(), 2);

    let reports: Vec<(Stage, f64)> = receiver.try_iter().collect();
    assert_eq!(reports.len(), 8);
    assert!(reports.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(reports.first(), Some(&(Stage::Features, 0.1)));
    assert_eq!(reports.last(), Some(&(Stage::Complete, 1.0)));
}

#[test]
fn spawned_pipeline_streams_progress() {
    let _ = pretty_env_logger::try_init_timed();
    let (_, images) = views(2);
    let handle = Pipeline::new(settings()).spawn(images);
    let fractions: Vec<f64> = handle.progress.iter().map(|p| p.fraction).collect();
    assert!(handle.join().is_ok());
    assert!(fractions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(fractions.last(), Some(&1.0));
}

#[test]
fn textured_cube_from_five_views() {
    let _ = pretty_env_logger::try_init_timed();
    let (truth, images) = views(5);
    let reconstruction = Pipeline::new(settings()).run(&images).unwrap();
    let metrics = &reconstruction.metrics;
    assert!(metrics.point_count > 500, "{} points", metrics.point_count);
    assert!(metrics.triangle_count > 100, "{} triangles", metrics.triangle_count);
    assert!(metrics.psnr > 20.0, "PSNR {} dB", metrics.psnr);
    assert!(metrics.ssim <= 1.0);
    assert_eq!(metrics.texture_resolution, 128);

    let mesh = &reconstruction.mesh;
    assert!(mesh.validate());
    assert_eq!(mesh.triangle_count(), metrics.triangle_count);
    assert!(mesh
        .uvs
        .iter()
        .all(|uv| (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)));

    let cameras = &reconstruction.cameras;
    assert_eq!(cameras.len(), truth.len());
    let baseline = (cameras[1].position - cameras[0].position).norm();
    assert!((baseline - 1.0).abs() < 0.1, "baseline {}", baseline);
}

#[test]
fn cancelled_pipeline_stops() {
    let _ = pretty_env_logger::try_init_timed();
    let (_, images) = views(2);
    let pipeline = Pipeline::new(settings());
    pipeline.token().cancel();
    assert_eq!(pipeline.run(&images).unwrap_err(), Error::Cancelled);
}
