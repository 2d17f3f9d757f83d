use crate::{estimate_normals, extract_isosurface, Octree, PoissonSolver};
use average::Mean;
use log::*;
use tessera_core::nalgebra::{Point3, Vector3};
use tessera_core::{Error, Mesh, PointCloud, Result};

/// Poisson surface reconstruction of an oriented point cloud.
///
/// The cloud is enclosed in a cube `padding` times its largest extent. Samples are binned into an
/// octree of depth `octree_depth`, the indicator function is solved on a grid with
/// `grid_resolution` cells per side and its level set through the samples is extracted, smoothed
/// and given vertex normals.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SurfaceReconstructor {
    /// Neighbors used for normal estimation when the cloud has no normals.
    pub normal_neighbors: usize,
    pub octree_depth: usize,
    pub grid_resolution: usize,
    pub padding: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub smoothing_iterations: usize,
    pub smoothing_lambda: f64,
}

impl Default for SurfaceReconstructor {
    fn default() -> Self {
        Self {
            normal_neighbors: 20,
            octree_depth: 7,
            grid_resolution: 32,
            padding: 1.5,
            max_iterations: 200,
            tolerance: 1e-4,
            smoothing_iterations: 3,
            smoothing_lambda: 0.5,
        }
    }
}

/// A reconstructed mesh with the soft condition hit on the way, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub mesh: Mesh,
    pub warning: Option<Error>,
}

impl SurfaceReconstructor {
    pub fn octree_depth(self, octree_depth: usize) -> Self {
        Self {
            octree_depth,
            ..self
        }
    }

    pub fn grid_resolution(self, grid_resolution: usize) -> Self {
        Self {
            grid_resolution,
            ..self
        }
    }

    pub fn smoothing(self, iterations: usize, lambda: f64) -> Self {
        Self {
            smoothing_iterations: iterations,
            smoothing_lambda: lambda,
            ..self
        }
    }

    pub fn normal_neighbors(self, normal_neighbors: usize) -> Self {
        Self {
            normal_neighbors,
            ..self
        }
    }

    /// Reconstructs a surface from `cloud`, estimating normals first when it has none.
    pub fn reconstruct(&self, cloud: &PointCloud) -> Result<Surface> {
        if cloud.len() < 3 {
            return Err(Error::ReconstructionFailed(format!(
                "{} points cannot define a surface",
                cloud.len()
            )));
        }
        let mut cloud = cloud.clone();
        if cloud.normals.as_ref().map_or(true, |n| n.len() != cloud.len()) {
            estimate_normals(&mut cloud, self.normal_neighbors);
        }
        let normals = cloud.normals.clone().unwrap_or_default();

        let (lo, hi) = match cloud.bounds() {
            Some(bounds) => bounds,
            None => return Err(Error::ReconstructionFailed("empty point cloud".into())),
        };
        let extent = (hi - lo).max();
        if extent <= f64::EPSILON {
            return Err(Error::ReconstructionFailed(
                "all points coincide".to_string(),
            ));
        }
        let size = extent * self.padding.max(1.0);
        let center = Point3::from((lo.coords + hi.coords) / 2.0);
        let origin = center - Vector3::repeat(size / 2.0);

        let resolution = self.grid_resolution.max(2);
        let depth = self
            .octree_depth
            .max((resolution as f64).log2().ceil() as usize);
        let mut tree = Octree::new(origin, size, depth);
        for (&point, &normal) in cloud.points.iter().zip(&normals) {
            tree.insert(point, normal);
        }
        debug!(
            "Octree of depth {} holds {} points in {} nodes",
            depth,
            cloud.len(),
            tree.node_count()
        );

        let solver = PoissonSolver {
            grid_resolution: resolution,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        };
        let (function, warning) = solver.solve(&tree);
        let iso: Mean = cloud.points.iter().map(|&p| function.evaluate(p)).collect();
        let mut mesh = extract_isosurface(&function, iso.mean());
        mesh.remove_degenerate_triangles();
        mesh.compact();
        if mesh.is_empty() {
            return Err(Error::ReconstructionFailed(
                "the implicit function has no level set through the samples".to_string(),
            ));
        }

        laplacian_smooth(&mut mesh, self.smoothing_iterations, self.smoothing_lambda);
        mesh.remove_degenerate_triangles();
        mesh.compact();
        if mesh.is_empty() {
            return Err(Error::ReconstructionFailed(
                "smoothing collapsed every triangle".to_string(),
            ));
        }
        mesh.recompute_normals();
        info!(
            "Reconstructed surface with {} vertices and {} triangles",
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(Surface { mesh, warning })
    }
}

/// Moves every vertex `lambda` of the way towards the mean of its neighbors, `iterations` times.
/// Vertices without neighbors stay in place.
pub fn laplacian_smooth(mesh: &mut Mesh, iterations: usize, lambda: f64) {
    let neighbors = mesh.vertex_neighbors();
    for _ in 0..iterations {
        let smoothed: Vec<Point3<f64>> = mesh
            .vertices
            .iter()
            .zip(&neighbors)
            .map(|(&vertex, adjacent)| {
                if adjacent.is_empty() {
                    return vertex;
                }
                let mean = adjacent
                    .iter()
                    .fold(Vector3::zeros(), |acc, &n| acc + mesh.vertices[n].coords)
                    / adjacent.len() as f64;
                vertex + (mean - vertex.coords) * lambda
            })
            .collect();
        mesh.vertices = smoothed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn too_few_points_fail() {
        let cloud = PointCloud::from_points(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(
            SurfaceReconstructor::default().reconstruct(&cloud),
            Err(Error::ReconstructionFailed(_))
        ));
    }

    #[test]
    fn coincident_points_fail() {
        let cloud = PointCloud::from_points(vec![Point3::new(1.0, 2.0, 3.0); 10]);
        assert!(matches!(
            SurfaceReconstructor::default().reconstruct(&cloud),
            Err(Error::ReconstructionFailed(_))
        ));
    }

    #[test]
    fn smoothing_pulls_a_spike_in() {
        let mut mesh = Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.3, 0.3, 3.0),
                Point3::new(9.0, 9.0, 9.0),
            ],
            vec![[0, 1, 3], [1, 2, 3], [2, 0, 3]],
        );
        laplacian_smooth(&mut mesh, 1, 0.5);
        assert_relative_eq!(mesh.vertices[3].z, 1.5, epsilon = 1e-12);
        assert_eq!(mesh.vertices[4], Point3::new(9.0, 9.0, 9.0));
    }
}
