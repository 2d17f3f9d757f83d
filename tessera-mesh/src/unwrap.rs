use log::*;
use tessera_core::nalgebra::{Matrix3, Point2, SymmetricEigen, Vector2, Vector3};
use tessera_core::Mesh;

/// Spring relaxation parameterization of a mesh into the unit square.
///
/// Vertices start at their projection onto the two principal axes of the mesh. The two vertices
/// furthest apart along the first axis are pinned and every other vertex is moved, `iterations`
/// times, so that the 2D length of each edge approaches its 3D length. The result is scaled
/// uniformly into `[0, 1]^2` and written as one coordinate per triangle corner.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct UvUnwrapper {
    pub iterations: usize,
    /// Fraction of the accumulated spring correction applied per iteration.
    pub step: f64,
}

impl Default for UvUnwrapper {
    fn default() -> Self {
        Self {
            iterations: 50,
            step: 0.5,
        }
    }
}

impl UvUnwrapper {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Per-vertex coordinates in the unit square.
    pub fn vertex_uvs(&self, mesh: &Mesh) -> Vec<Point2<f64>> {
        if mesh.vertices.is_empty() {
            return Vec::new();
        }
        let mut uvs = principal_projection(mesh);
        let anchors = anchors(&uvs);
        let edges = edges(mesh);
        for _ in 0..self.iterations {
            let mut correction = vec![Vector2::zeros(); uvs.len()];
            let mut springs = vec![0usize; uvs.len()];
            for &(a, b, rest) in &edges {
                let delta = uvs[b] - uvs[a];
                let length = delta.norm();
                if length <= f64::EPSILON {
                    continue;
                }
                let push = delta * ((length - rest) / length * 0.5);
                correction[a] += push;
                correction[b] -= push;
                springs[a] += 1;
                springs[b] += 1;
            }
            for (v, uv) in uvs.iter_mut().enumerate() {
                if springs[v] > 0 && !anchors.contains(&v) {
                    *uv += correction[v] * (self.step / springs[v] as f64);
                }
            }
        }
        normalize(&mut uvs);
        uvs
    }

    /// Replaces `mesh.uvs` with per-corner coordinates.
    pub fn unwrap(&self, mesh: &mut Mesh) {
        let vertex_uvs = self.vertex_uvs(mesh);
        mesh.uvs = mesh
            .triangles
            .iter()
            .flat_map(|triangle| triangle.map(|v| vertex_uvs[v]))
            .collect();
        debug!(
            "Unwrapped {} vertices over {} spring iterations",
            vertex_uvs.len(),
            self.iterations
        );
    }
}

/// Projects every vertex onto the plane of the two largest principal axes.
fn principal_projection(mesh: &Mesh) -> Vec<Point2<f64>> {
    let n = mesh.vertices.len() as f64;
    let mean = mesh
        .vertices
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;
    let covariance = mesh.vertices.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p.coords - mean;
        acc + d * d.transpose()
    });
    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0, 1, 2];
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));
    let u: Vector3<f64> = eigen.eigenvectors.column(order[0]).into_owned();
    let v: Vector3<f64> = eigen.eigenvectors.column(order[1]).into_owned();
    mesh.vertices
        .iter()
        .map(|p| {
            let d = p.coords - mean;
            Point2::new(d.dot(&u), d.dot(&v))
        })
        .collect()
}

/// The vertices with the smallest and largest first coordinate.
fn anchors(uvs: &[Point2<f64>]) -> [usize; 2] {
    let mut low = 0;
    let mut high = 0;
    for (i, uv) in uvs.iter().enumerate() {
        if uv.x < uvs[low].x {
            low = i;
        }
        if uv.x > uvs[high].x {
            high = i;
        }
    }
    [low, high]
}

/// Unique edges with their 3D rest length.
fn edges(mesh: &Mesh) -> Vec<(usize, usize, f64)> {
    let mut pairs: Vec<(usize, usize)> = mesh
        .triangles
        .iter()
        .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
        .map(|(u, v)| (u.min(v), u.max(v)))
        .filter(|(u, v)| u != v)
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs
        .into_iter()
        .map(|(a, b)| (a, b, (mesh.vertices[b] - mesh.vertices[a]).norm()))
        .collect()
}

/// Uniformly scales the coordinates into the unit square, anchored at the origin.
fn normalize(uvs: &mut [Point2<f64>]) {
    let (lo, hi) = match uvs.first() {
        Some(&first) => uvs
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.inf(p), hi.sup(p))),
        None => return,
    };
    let extent = (hi - lo).max();
    let scale = if extent > f64::EPSILON { 1.0 / extent } else { 1.0 };
    for uv in uvs {
        let scaled = (*uv - lo) * scale;
        *uv = Point2::new(scaled.x.clamp(0.0, 1.0), scaled.y.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::Point3;

    fn tetrahedron() -> Mesh {
        Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        )
    }

    #[test]
    fn coordinates_are_per_corner_and_in_the_unit_square() {
        let mut mesh = tetrahedron();
        UvUnwrapper::default().unwrap(&mut mesh);
        assert_eq!(mesh.uvs.len(), 12);
        assert!(mesh
            .uvs
            .iter()
            .all(|uv| (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)));
        // Corners sharing a vertex share a coordinate.
        assert_eq!(mesh.uvs[0], mesh.uvs[3]);
        assert!(mesh.validate());
    }

    #[test]
    fn flat_square_keeps_its_shape() {
        let mut mesh = Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 2.0),
                Point3::new(2.0, 0.0, 2.0),
                Point3::new(2.0, 2.0, 2.0),
                Point3::new(0.0, 2.0, 2.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let uvs = UvUnwrapper::default().vertex_uvs(&mesh);
        let side = (uvs[1] - uvs[0]).norm();
        assert_relative_eq!((uvs[2] - uvs[1]).norm(), side, epsilon = 1e-6);
        assert_relative_eq!((uvs[2] - uvs[0]).norm(), side * 2f64.sqrt(), epsilon = 1e-6);
        UvUnwrapper::default().unwrap(&mut mesh);
        assert_eq!(mesh.uvs.len(), 6);
    }

    #[test]
    fn empty_mesh_has_no_coordinates() {
        let mut mesh = Mesh::default();
        UvUnwrapper::default().unwrap(&mut mesh);
        assert!(mesh.uvs.is_empty());
    }
}
