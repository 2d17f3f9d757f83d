use crate::Quadric;
use float_ord::FloatOrd;
use log::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tessera_core::nalgebra::{center, Point3};
use tessera_core::{Mesh, DEGENERATE_AREA};

/// Quadric error metric edge collapse.
///
/// Every vertex carries the quadric of the planes of its incident triangles. Edges are collapsed
/// to their midpoint in order of the summed quadric error there, cheapest first, until at most
/// `floor(ratio * n)` of the `n` input triangles remain or no edge can be collapsed without
/// flipping a neighboring triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshDecimator {
    pub ratio: f64,
}

impl Default for MeshDecimator {
    fn default() -> Self {
        Self { ratio: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    cost: Reverse<FloatOrd<f64>>,
    a: usize,
    b: usize,
    /// Versions of `a` and `b` when the cost was computed.
    stamps: (usize, usize),
}

struct Collapser {
    vertices: Vec<Point3<f64>>,
    triangles: Vec<[usize; 3]>,
    alive: Vec<bool>,
    live: usize,
    removed: Vec<bool>,
    versions: Vec<usize>,
    quadrics: Vec<Quadric>,
    incident: Vec<Vec<usize>>,
    heap: BinaryHeap<Candidate>,
}

impl Collapser {
    fn new(mesh: &Mesh) -> Self {
        let n = mesh.vertex_count();
        let mut quadrics = vec![Quadric::default(); n];
        let mut incident = vec![Vec::new(); n];
        for (t, triangle) in mesh.triangles.iter().enumerate() {
            if let Some(q) = Quadric::from_triangle(mesh.corners(t)) {
                for &v in triangle {
                    quadrics[v] += q;
                }
            }
            for &v in triangle {
                incident[v].push(t);
            }
        }
        let mut collapser = Self {
            vertices: mesh.vertices.clone(),
            triangles: mesh.triangles.clone(),
            alive: vec![true; mesh.triangle_count()],
            live: mesh.triangle_count(),
            removed: vec![false; n],
            versions: vec![0; n],
            quadrics,
            incident,
            heap: BinaryHeap::new(),
        };
        let mut edges: Vec<(usize, usize)> = mesh
            .triangles
            .iter()
            .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
            .filter(|(u, v)| u != v)
            .map(|(u, v)| (u.min(v), u.max(v)))
            .collect();
        edges.sort_unstable();
        edges.dedup();
        for (a, b) in edges {
            collapser.push(a, b);
        }
        collapser
    }

    fn push(&mut self, a: usize, b: usize) {
        let midpoint = center(&self.vertices[a], &self.vertices[b]);
        let cost = (self.quadrics[a] + self.quadrics[b]).error(midpoint);
        self.heap.push(Candidate {
            cost: Reverse(FloatOrd(cost)),
            a,
            b,
            stamps: (self.versions[a], self.versions[b]),
        });
    }

    fn is_stale(&self, candidate: &Candidate) -> bool {
        self.removed[candidate.a]
            || self.removed[candidate.b]
            || candidate.stamps != (self.versions[candidate.a], self.versions[candidate.b])
    }

    fn area_normal(&self, triangle: [usize; 3], moved: usize, position: Point3<f64>) -> [f64; 4] {
        let [a, b, c] = triangle.map(|v| if v == moved { position } else { self.vertices[v] });
        let normal = (b - a).cross(&(c - a));
        [normal.x, normal.y, normal.z, 0.5 * normal.norm()]
    }

    /// Collapses `b` into `a` at `position`, unless that would flip or flatten a triangle that
    /// survives the collapse.
    fn collapse(&mut self, a: usize, b: usize, position: Point3<f64>) -> bool {
        let mut affected: Vec<usize> = self.incident[a]
            .iter()
            .chain(&self.incident[b])
            .copied()
            .filter(|&t| self.alive[t])
            .collect();
        affected.sort_unstable();
        affected.dedup();

        let (vanishing, surviving): (Vec<usize>, Vec<usize>) = affected
            .into_iter()
            .partition(|&t| self.triangles[t].contains(&a) && self.triangles[t].contains(&b));
        for &t in &surviving {
            let moved = if self.triangles[t].contains(&a) { a } else { b };
            let before = self.area_normal(self.triangles[t], moved, self.vertices[moved]);
            let after = self.area_normal(self.triangles[t], moved, position);
            let dot = before[0] * after[0] + before[1] * after[1] + before[2] * after[2];
            if dot <= 0.0 || after[3] <= DEGENERATE_AREA {
                return false;
            }
        }

        for t in vanishing {
            self.alive[t] = false;
            self.live -= 1;
        }
        for &t in &surviving {
            for v in self.triangles[t].iter_mut() {
                if *v == b {
                    *v = a;
                }
            }
        }
        self.vertices[a] = position;
        let qb = self.quadrics[b];
        self.quadrics[a] += qb;
        self.removed[b] = true;
        self.versions[a] += 1;
        let moved = std::mem::take(&mut self.incident[b]);
        self.incident[a].extend(moved);
        self.incident[a].retain(|&t| self.alive[t]);
        self.incident[a].sort_unstable();
        self.incident[a].dedup();

        let mut neighbors: Vec<usize> = self.incident[a]
            .iter()
            .flat_map(|&t| self.triangles[t])
            .filter(|&v| v != a)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        for n in neighbors {
            self.push(a.min(n), a.max(n));
        }
        true
    }

    fn run(&mut self, target: usize) -> usize {
        let mut collapses = 0;
        while self.live > target {
            let candidate = match self.heap.pop() {
                Some(candidate) => candidate,
                None => break,
            };
            if self.is_stale(&candidate) {
                continue;
            }
            let position = center(&self.vertices[candidate.a], &self.vertices[candidate.b]);
            if self.collapse(candidate.a, candidate.b, position) {
                collapses += 1;
                trace!(
                    "Collapsed {} into {}, {} triangles left",
                    candidate.b,
                    candidate.a,
                    self.live
                );
            }
        }
        collapses
    }
}

/// The outcome of [`MeshDecimator::decimate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decimation {
    pub mesh: Mesh,
    /// Largest triangle count the decimator aimed for.
    pub target: usize,
}

impl Decimation {
    /// Triangles left above the target because no remaining edge could be collapsed.
    pub fn shortfall(&self) -> usize {
        self.mesh.triangle_count().saturating_sub(self.target)
    }
}

impl MeshDecimator {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    /// Largest triangle count allowed in the output for `triangles` input triangles.
    pub fn target(&self, triangles: usize) -> usize {
        (triangles as f64 * self.ratio.clamp(0.0, 1.0)).floor() as usize
    }

    /// Simplifies `mesh`. Per-corner texture coordinates follow their triangles and vertex
    /// normals are recomputed when the input had them.
    pub fn decimate(&self, mesh: &Mesh) -> Decimation {
        let target = self.target(mesh.triangle_count());
        if target >= mesh.triangle_count() {
            return Decimation {
                mesh: mesh.clone(),
                target,
            };
        }
        let mut collapser = Collapser::new(mesh);
        let collapses = collapser.run(target);

        let has_uvs = mesh.uvs.len() == 3 * mesh.triangle_count();
        let mut out = Mesh {
            vertices: collapser.vertices,
            texture: mesh.texture.clone(),
            ..Default::default()
        };
        for (t, triangle) in collapser.triangles.into_iter().enumerate() {
            if !collapser.alive[t] {
                continue;
            }
            out.triangles.push(triangle);
            if has_uvs {
                out.uvs.extend_from_slice(&mesh.uvs[3 * t..3 * t + 3]);
            }
        }
        out.remove_degenerate_triangles();
        out.compact();
        if mesh.normals.is_some() {
            out.recompute_normals();
        }
        info!(
            "Decimated {} triangles to {} with {} collapses (target {})",
            mesh.triangle_count(),
            out.triangle_count(),
            collapses,
            target
        );
        let decimation = Decimation { mesh: out, target };
        if decimation.shortfall() > 0 {
            warn!(
                "No edge left to collapse, {} triangles above the target",
                decimation.shortfall()
            );
        }
        decimation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::Point2;

    /// A flat `n` by `n` grid of quads in the `z = 0` plane.
    fn grid(n: usize) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(Point3::new(x as f64, y as f64, 0.0));
            }
        }
        let index = |x: usize, y: usize| y * (n + 1) + x;
        let mut triangles = Vec::new();
        for y in 0..n {
            for x in 0..n {
                triangles.push([index(x, y), index(x + 1, y), index(x + 1, y + 1)]);
                triangles.push([index(x, y), index(x + 1, y + 1), index(x, y + 1)]);
            }
        }
        Mesh::new(vertices, triangles)
    }

    #[test]
    fn halves_a_flat_grid_without_moving_off_the_plane() {
        let mut mesh = grid(10);
        mesh.uvs = (0..3 * mesh.triangle_count())
            .map(|i| Point2::new(i as f64, 0.0))
            .collect();
        mesh.recompute_normals();
        let decimation = MeshDecimator::default().decimate(&mesh);
        assert_eq!((decimation.target, decimation.shortfall()), (100, 0));
        let out = decimation.mesh;
        assert!(out.triangle_count() <= 100);
        assert!(out.triangle_count() > 0);
        assert!(out.validate());
        assert_eq!(out.uvs.len(), 3 * out.triangle_count());
        for v in &out.vertices {
            assert_relative_eq!(v.z, 0.0);
        }
        for normal in out.normals.as_ref().unwrap() {
            assert_relative_eq!(normal.z, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn ratio_one_is_identity() {
        let mesh = grid(3);
        assert_eq!(MeshDecimator::new(1.0).decimate(&mesh).mesh, mesh);
    }

    #[test]
    fn target_is_floor() {
        let decimator = MeshDecimator::default();
        assert_eq!(decimator.target(7), 3);
        assert_eq!(decimator.target(0), 0);
    }

    #[test]
    fn stops_when_every_collapse_is_rejected() {
        // Every collapse of a collinear strip flattens a surviving triangle.
        let vertices = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let mesh = Mesh::new(vertices, vec![[0, 1, 2], [1, 3, 2], [2, 3, 4]]);
        let mut collapser = Collapser::new(&mesh);
        assert_eq!(collapser.run(0), 0);
        assert_eq!(collapser.live, 3);
        assert!(collapser.heap.is_empty());
    }

    #[test]
    fn shortfall_counts_triangles_over_the_target() {
        let decimation = Decimation {
            mesh: grid(2),
            target: 5,
        };
        assert_eq!(decimation.shortfall(), 3);
    }
}
