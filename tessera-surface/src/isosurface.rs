//! Isosurface extraction from a sampled [`ImplicitFunction`].
//!
//! Every grid cube is split into six tetrahedra and each tetrahedron is polygonized on its own.
//! This is the marching tetrahedra variant of marching cubes: it needs no case table for
//! ambiguous faces and always yields a crack-free surface.

use crate::ImplicitFunction;
use log::*;
use std::collections::HashMap;
use tessera_core::nalgebra::{Point3, Vector3};
use tessera_core::Mesh;

/// Unit cube corners in the order the tetrahedra refer to them.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Six tetrahedra around the diagonal from corner 0 to corner 6. Neighboring cubes split their
/// shared face along the same diagonal, so the surface has no cracks.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 5, 1, 6],
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
];

#[derive(Clone, Copy)]
struct Corner {
    node: usize,
    position: Point3<f64>,
    value: f64,
}

struct Extraction<'a> {
    iso: f64,
    mesh: Mesh,
    edges: HashMap<(usize, usize), usize>,
    function: &'a ImplicitFunction,
}

impl Extraction<'_> {
    fn edge_vertex(&mut self, a: Corner, b: Corner) -> usize {
        let key = (a.node.min(b.node), a.node.max(b.node));
        if let Some(&vertex) = self.edges.get(&key) {
            return vertex;
        }
        let delta = b.value - a.value;
        let t = if delta.abs() <= f64::EPSILON {
            0.5
        } else {
            ((self.iso - a.value) / delta).clamp(0.0, 1.0)
        };
        let vertex = self.mesh.vertices.len();
        self.mesh
            .vertices
            .push(a.position + (b.position - a.position) * t);
        self.edges.insert(key, vertex);
        vertex
    }

    /// Adds a triangle wound so that its normal points along `outward`.
    fn triangle(&mut self, vertices: [usize; 3], outward: Vector3<f64>) {
        let [a, b, c] = vertices.map(|v| self.mesh.vertices[v]);
        if (b - a).cross(&(c - a)).dot(&outward) < 0.0 {
            self.mesh.triangles.push([vertices[0], vertices[2], vertices[1]]);
        } else {
            self.mesh.triangles.push(vertices);
        }
    }

    fn tetrahedron(&mut self, corners: [Corner; 4]) {
        let (inside, outside): (Vec<Corner>, Vec<Corner>) =
            corners.into_iter().partition(|c| c.value < self.iso);
        let mean = |cs: &[Corner]| {
            cs.iter().fold(Vector3::zeros(), |acc, c| acc + c.position.coords) / cs.len() as f64
        };
        match (inside.as_slice(), outside.as_slice()) {
            (&[a], &[b, c, d]) => {
                let outward = mean(&outside) - a.position.coords;
                let v = [
                    self.edge_vertex(a, b),
                    self.edge_vertex(a, c),
                    self.edge_vertex(a, d),
                ];
                self.triangle(v, outward);
            }
            (&[a, b, c], &[d]) => {
                let outward = d.position.coords - mean(&inside);
                let v = [
                    self.edge_vertex(a, d),
                    self.edge_vertex(b, d),
                    self.edge_vertex(c, d),
                ];
                self.triangle(v, outward);
            }
            (&[a, b], &[c, d]) => {
                let outward = mean(&outside) - mean(&inside);
                let ac = self.edge_vertex(a, c);
                let ad = self.edge_vertex(a, d);
                let bd = self.edge_vertex(b, d);
                let bc = self.edge_vertex(b, c);
                self.triangle([ac, ad, bd], outward);
                self.triangle([ac, bd, bc], outward);
            }
            _ => {}
        }
    }

    fn corner(&self, i: usize, j: usize, k: usize) -> Corner {
        let n = self.function.resolution() + 1;
        Corner {
            node: (i * n + j) * n + k,
            position: self.function.node_position(i, j, k),
            value: self.function.values[[i, j, k]],
        }
    }
}

/// Extracts the level set `function = iso` as a triangle mesh with marching tetrahedra.
///
/// Values below `iso` are inside and triangles are wound counter-clockwise when seen from the
/// outside. Vertices on a grid edge are shared between all triangles crossing that edge.
pub fn extract_isosurface(function: &ImplicitFunction, iso: f64) -> Mesh {
    let mut extraction = Extraction {
        iso,
        mesh: Mesh::default(),
        edges: HashMap::new(),
        function,
    };
    let n = function.resolution();
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let cube = CORNERS.map(|[di, dj, dk]| extraction.corner(i + di, j + dj, k + dk));
                for tetrahedron in TETRAHEDRA {
                    extraction.tetrahedron(tetrahedron.map(|c| cube[c]));
                }
            }
        }
    }
    debug!(
        "Extracted {} vertices and {} triangles at iso value {:.6}",
        extraction.mesh.vertex_count(),
        extraction.mesh.triangle_count(),
        iso
    );
    extraction.mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sphere_function(resolution: usize) -> ImplicitFunction {
        let size = 3.0;
        let origin = Point3::new(-1.5, -1.5, -1.5);
        let h = size / resolution as f64;
        let values = Array3::from_shape_fn(
            (resolution + 1, resolution + 1, resolution + 1),
            |(i, j, k)| (Vector3::new(i as f64, j as f64, k as f64) * h + origin.coords).norm(),
        );
        ImplicitFunction {
            origin,
            size,
            values,
        }
    }

    #[test]
    fn sphere_level_set_is_closed_and_outward() {
        let mesh = extract_isosurface(&sphere_function(16), 1.0);
        assert!(mesh.triangle_count() > 100);
        for vertex in &mesh.vertices {
            assert!((vertex.coords.norm() - 1.0).abs() < 0.05);
        }
        let outward = (0..mesh.triangle_count())
            .filter(|&t| mesh.face_normal(t).dot(&mesh.centroid(t).coords) > 0.0)
            .count();
        assert!(outward as f64 > 0.95 * mesh.triangle_count() as f64);
        // Closed: every edge is shared by exactly two triangles.
        let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
        for &[a, b, c] in &mesh.triangles {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *edges.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }
        assert!(edges.values().all(|&count| count == 2));
    }

    #[test]
    fn no_crossing_no_triangles() {
        let mesh = extract_isosurface(&sphere_function(4), -1.0);
        assert!(mesh.is_empty());
        assert!(mesh.vertices.is_empty());
    }
}
