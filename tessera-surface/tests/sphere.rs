use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use tessera_core::nalgebra::{Point3, Vector3};
use tessera_core::{Error, PointCloud};
use tessera_surface::{OutlierFilter, SurfaceReconstructor};

/// Points on the unit sphere along a Fibonacci spiral.
fn fibonacci_sphere(count: usize) -> Vec<Point3<f64>> {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..count)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / count as f64;
            let r = (1.0 - z * z).sqrt();
            let theta = golden * i as f64;
            Point3::new(r * theta.cos(), r * theta.sin(), z)
        })
        .collect()
}

#[test]
fn sphere_surface_stays_near_the_samples() {
    let _ = pretty_env_logger::try_init_timed();
    let center = Vector3::new(0.5, -1.0, 3.0);
    let points = fibonacci_sphere(2000)
        .into_iter()
        .map(|p| p + center)
        .collect();
    let surface = SurfaceReconstructor::default()
        .reconstruct(&PointCloud::from_points(points))
        .unwrap();
    let mesh = surface.mesh;
    assert!(mesh.validate());
    assert!(mesh.triangle_count() > 100);
    assert_eq!(mesh.normals.as_ref().map(Vec::len), Some(mesh.vertex_count()));

    let errors: Vec<f64> = mesh
        .vertices
        .iter()
        .map(|v| ((v - center).coords.norm() - 1.0).abs())
        .collect();
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    assert!(mean < 0.08, "mean radial error {}", mean);
    assert!(errors.iter().all(|&e| e < 0.2));

    // Vertex normals point away from the center.
    let normals = mesh.normals.unwrap();
    let outward = mesh
        .vertices
        .iter()
        .zip(&normals)
        .filter(|(v, n)| n.dot(&(*v - center).coords) > 0.0)
        .count();
    assert!(outward as f64 > 0.95 * mesh.vertices.len() as f64);
}

#[test]
fn noisy_sphere_survives_filtering() {
    let mut rng = Pcg64::from_seed([5; 32]);
    let mut points: Vec<Point3<f64>> = fibonacci_sphere(1500)
        .into_iter()
        .map(|p| p * (1.0 + rng.gen_range(-0.01..0.01)))
        .collect();
    for _ in 0..15 {
        points.push(Point3::new(
            rng.gen_range(4.0..8.0),
            rng.gen_range(-8.0..8.0),
            rng.gen_range(-8.0..8.0),
        ));
    }
    let mut cloud = PointCloud::from_points(points);
    let removed = OutlierFilter::default().filter(&mut cloud);
    assert!(removed >= 15);
    assert!(cloud.points.iter().all(|p| p.coords.norm() < 1.5));

    let mesh = SurfaceReconstructor::default()
        .reconstruct(&cloud)
        .unwrap()
        .mesh;
    assert!(mesh.triangle_count() > 100);
}

#[test]
fn two_points_are_not_a_surface() {
    let cloud = PointCloud::from_points(vec![Point3::origin(), Point3::new(0.0, 1.0, 0.0)]);
    match SurfaceReconstructor::default().reconstruct(&cloud) {
        Err(Error::ReconstructionFailed(_)) => {}
        other => panic!("unexpected result {:?}", other),
    }
}
