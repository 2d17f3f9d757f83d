use crate::PointIndex;
use log::*;
use tessera_core::nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use tessera_core::PointCloud;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Estimates a unit normal for every point from the principal axes of its `k` nearest neighbors
/// and stores them in `cloud.normals`.
///
/// A normal is oriented towards the camera that produced its point. Without a known origin the
/// nearest camera is used, and a cloud without cameras gets normals pointing away from its
/// centroid.
pub fn estimate_normals(cloud: &mut PointCloud, k: usize) {
    let centroid = match cloud.centroid() {
        Some(centroid) => centroid,
        None => {
            cloud.normals = Some(Vec::new());
            return;
        }
    };
    let index = PointIndex::new(&cloud.points);
    let cloud_ref = &*cloud;
    let normal_at = |ix: usize| {
        let point = cloud_ref.points[ix];
        let neighbors: Vec<Point3<f64>> = index
            .nearest(point, k.max(3))
            .into_iter()
            .map(|(n, _)| cloud_ref.points[n])
            .collect();
        let normal = pca_normal(&neighbors).unwrap_or_else(|| {
            (point - centroid)
                .try_normalize(f64::EPSILON)
                .unwrap_or_else(Vector3::z)
        });
        let viewpoint = match cloud_ref.origin_camera(ix) {
            Some(camera) => Some(camera.position),
            None => cloud_ref
                .cameras
                .iter()
                .map(|c| c.position)
                .min_by(|a, b| (a - point).norm().total_cmp(&(b - point).norm())),
        };
        let outward = match viewpoint {
            Some(viewpoint) => viewpoint - point,
            None => point - centroid,
        };
        if normal.dot(&outward) < 0.0 {
            -normal
        } else {
            normal
        }
    };
    #[cfg(not(feature = "rayon"))]
    let normals = (0..cloud.len()).map(normal_at).collect();
    #[cfg(feature = "rayon")]
    let normals = (0..cloud.len()).into_par_iter().map(normal_at).collect();
    debug!("Estimated {} normals from {} neighbors each", cloud.len(), k);
    cloud.normals = Some(normals);
}

/// The eigenvector of the smallest eigenvalue of the neighborhood covariance, or `None` when the
/// neighborhood does not span a plane.
pub fn pca_normal(neighbors: &[Point3<f64>]) -> Option<Vector3<f64>> {
    if neighbors.len() < 3 {
        return None;
    }
    let n = neighbors.len() as f64;
    let mean = neighbors
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;
    let covariance = neighbors.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p.coords - mean;
        acc + d * d.transpose()
    }) / n;
    let eigen = SymmetricEigen::new(covariance);
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let mut sorted: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    // Collinear neighborhoods have two vanishing eigenvalues.
    if sorted[1] <= 1e-12 * sorted[2].max(f64::MIN_POSITIVE) {
        return None;
    }
    eigen
        .eigenvectors
        .column(smallest)
        .into_owned()
        .try_normalize(f64::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::UnitQuaternion;
    use tessera_core::{Camera, CameraIntrinsics};

    #[test]
    fn plane_normals_face_the_camera() {
        let points: Vec<Point3<f64>> = (0..100)
            .map(|i| Point3::new((i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 4.0))
            .collect();
        let mut cloud = PointCloud::from_points(points);
        cloud.cameras.push(Camera {
            position: Point3::new(0.5, 0.5, 0.0),
            orientation: UnitQuaternion::identity(),
            intrinsics: CameraIntrinsics::identity(),
        });
        estimate_normals(&mut cloud, 8);
        for normal in cloud.normals.unwrap() {
            assert_relative_eq!(normal, -Vector3::z(), epsilon = 1e-9);
        }
    }

    #[test]
    fn sphere_normals_point_outwards_without_cameras() {
        let points: Vec<Point3<f64>> = (0..200)
            .map(|i| {
                let theta = i as f64 * 2.399_963;
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / 200.0;
                let r = (1.0 - z * z).sqrt();
                Point3::new(r * theta.cos(), r * theta.sin(), z)
            })
            .collect();
        let mut cloud = PointCloud::from_points(points.clone());
        estimate_normals(&mut cloud, 10);
        for (normal, point) in cloud.normals.unwrap().iter().zip(&points) {
            assert!(normal.dot(&point.coords) > 0.9);
        }
    }

    #[test]
    fn collinear_points_have_no_pca_normal() {
        let line: Vec<Point3<f64>> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert!(pca_normal(&line).is_none());
    }
}
