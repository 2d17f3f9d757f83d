use image::RgbImage;
use nalgebra::{Point2, Point3, Vector3};

/// Triangles with less area than this are treated as degenerate.
pub const DEGENERATE_AREA: f64 = 1e-12;

/// An indexed triangle mesh, the persisted output of a reconstruction.
///
/// Texture coordinates are stored per triangle corner: `uvs[3 * t + c]` belongs to corner `c` of
/// triangle `t`. `uvs` is empty until the mesh has been unwrapped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[usize; 3]>,
    pub uvs: Vec<Point2<f64>>,
    pub texture: Option<RgbImage>,
    pub normals: Option<Vec<Vector3<f64>>>,
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            triangles,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn corners(&self, triangle: usize) -> [Point3<f64>; 3] {
        self.triangles[triangle].map(|v| self.vertices[v])
    }

    /// Unnormalized face normal (its length is twice the triangle area).
    pub fn face_normal_unnormalized(&self, triangle: usize) -> Vector3<f64> {
        let [a, b, c] = self.corners(triangle);
        (b - a).cross(&(c - a))
    }

    pub fn face_normal(&self, triangle: usize) -> Vector3<f64> {
        self.face_normal_unnormalized(triangle)
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn triangle_area(&self, triangle: usize) -> f64 {
        0.5 * self.face_normal_unnormalized(triangle).norm()
    }

    pub fn centroid(&self, triangle: usize) -> Point3<f64> {
        let [a, b, c] = self.corners(triangle);
        Point3::from((a.coords + b.coords + c.coords) / 3.0)
    }

    pub fn corner_uvs(&self, triangle: usize) -> Option<[Point2<f64>; 3]> {
        let base = 3 * triangle;
        let uvs = self.uvs.get(base..base + 3)?;
        Some([uvs[0], uvs[1], uvs[2]])
    }

    /// Averages the area-weighted normals of the faces around every vertex.
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for (t, triangle) in self.triangles.iter().enumerate() {
            let face = self.face_normal_unnormalized(t);
            for &v in triangle {
                normals[v] += face;
            }
        }
        for normal in &mut normals {
            *normal = normal.try_normalize(0.0).unwrap_or_else(Vector3::zeros);
        }
        self.normals = Some(normals);
    }

    /// Drops triangles with repeated indices or an area below [`DEGENERATE_AREA`].
    /// Per-corner texture coordinates of the surviving triangles are kept.
    pub fn remove_degenerate_triangles(&mut self) -> usize {
        let keep: Vec<bool> = (0..self.triangles.len())
            .map(|t| {
                let [a, b, c] = self.triangles[t];
                a != b && b != c && a != c && self.triangle_area(t) > DEGENERATE_AREA
            })
            .collect();
        let before = self.triangles.len();
        if self.uvs.len() == 3 * before {
            let mut flags = keep.iter().flat_map(|&k| [k, k, k]);
            self.uvs.retain(|_| flags.next().unwrap_or(false));
        }
        let mut flags = keep.iter();
        self.triangles
            .retain(|_| flags.next().copied().unwrap_or(false));
        before - self.triangles.len()
    }

    /// Removes vertices not referenced by any triangle and re-indexes the triangles.
    pub fn compact(&mut self) {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        let mut normals = self.normals.as_ref().map(|_| Vec::new());
        for triangle in &mut self.triangles {
            for v in triangle.iter_mut() {
                if remap[*v] == usize::MAX {
                    remap[*v] = vertices.len();
                    vertices.push(self.vertices[*v]);
                    if let (Some(out), Some(source)) = (&mut normals, &self.normals) {
                        out.push(source[*v]);
                    }
                }
                *v = remap[*v];
            }
        }
        self.vertices = vertices;
        self.normals = normals;
    }

    /// Checks the structural invariants: every index in range, no degenerate triangles and
    /// either no texture coordinates or exactly three per triangle.
    pub fn validate(&self) -> bool {
        let indices_ok = self
            .triangles
            .iter()
            .all(|t| t.iter().all(|&v| v < self.vertices.len()));
        indices_ok
            && (0..self.triangles.len()).all(|t| self.triangle_area(t) > DEGENERATE_AREA)
            && (self.uvs.is_empty() || self.uvs.len() == 3 * self.triangles.len())
            && self
                .normals
                .as_ref()
                .map_or(true, |n| n.len() == self.vertices.len())
    }

    /// Vertex adjacency derived from triangle edges, without duplicates.
    pub fn vertex_neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.vertices.len()];
        for &[a, b, c] in &self.triangles {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                if !neighbors[u].contains(&v) {
                    neighbors[u].push(v);
                }
                if !neighbors[v].contains(&u) {
                    neighbors[v].push(u);
                }
            }
        }
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(5.0, 5.0, 5.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn normals_point_along_winding() {
        let mut mesh = quad();
        mesh.recompute_normals();
        let normals = mesh.normals.as_ref().unwrap();
        assert_relative_eq!(normals[0], Vector3::z(), epsilon = 1e-12);
        assert_eq!(normals[4], Vector3::zeros());
        assert_relative_eq!(mesh.triangle_area(0), 0.5);
    }

    #[test]
    fn degenerate_triangles_and_their_uvs_are_removed() {
        let mut mesh = quad();
        mesh.triangles.push([0, 1, 1]);
        mesh.triangles.push([0, 1, 0]);
        mesh.uvs = (0..12).map(|i| Point2::new(i as f64, 0.0)).collect();
        assert_eq!(mesh.remove_degenerate_triangles(), 2);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.uvs.len(), 6);
        assert_eq!(mesh.uvs[5], Point2::new(5.0, 0.0));
        assert!(mesh.validate());
    }

    #[test]
    fn compact_drops_unreferenced_vertices() {
        let mut mesh = quad();
        mesh.recompute_normals();
        mesh.compact();
        assert_eq!(mesh.vertex_count(), 4);
        assert!(mesh.validate());
    }
}
