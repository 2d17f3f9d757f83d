use crate::Octree;
use log::*;
use ndarray::Array3;
use tessera_core::nalgebra::{Point3, Vector3};
use tessera_core::Error;

/// A scalar function sampled on the nodes of a regular grid over a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitFunction {
    pub origin: Point3<f64>,
    pub size: f64,
    /// `(n + 1)^3` node values for `n` cells per side, indexed `[x, y, z]`.
    pub values: Array3<f64>,
}

impl ImplicitFunction {
    fn zeros(origin: Point3<f64>, size: f64, resolution: usize) -> Self {
        Self {
            origin,
            size,
            values: Array3::zeros((resolution + 1, resolution + 1, resolution + 1)),
        }
    }

    /// Number of cells per side.
    pub fn resolution(&self) -> usize {
        self.values.dim().0 - 1
    }

    pub fn spacing(&self) -> f64 {
        self.size / self.resolution() as f64
    }

    pub fn node_position(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.origin + Vector3::new(i as f64, j as f64, k as f64) * self.spacing()
    }

    /// Trilinear interpolation, clamped to the cube.
    pub fn evaluate(&self, point: Point3<f64>) -> f64 {
        let grid = (point - self.origin) / self.spacing();
        trilinear(&self.values, grid.x, grid.y, grid.z)
    }
}

fn trilinear(values: &Array3<f64>, x: f64, y: f64, z: f64) -> f64 {
    let n = values.dim().0 - 1;
    if n == 0 {
        return values[[0, 0, 0]];
    }
    let split = |v: f64| {
        let v = v.clamp(0.0, n as f64);
        let base = (v.floor() as usize).min(n - 1);
        (base, v - base as f64)
    };
    let ((i, fx), (j, fy), (k, fz)) = (split(x), split(y), split(z));
    let mut sum = 0.0;
    for (di, wx) in [(0, 1.0 - fx), (1, fx)] {
        for (dj, wy) in [(0, 1.0 - fy), (1, fy)] {
            for (dk, wz) in [(0, 1.0 - fz), (1, fz)] {
                sum += wx * wy * wz * values[[i + di, j + dj, k + dk]];
            }
        }
    }
    sum
}

/// Solves the Poisson equation `laplacian(f) = div(V)` for the vector field `V` of the oriented
/// samples of an [`Octree`], with `f = 0` on the faces of the cube.
///
/// The deepest octree level is splatted onto the finest grid, whose divergence is then restricted
/// bottom-up to every coarser grid with full weighting. The solve then runs top-down from the
/// coarsest grid to `grid_resolution` cells per side, halving the cell size at every level. Each
/// level starts from the interpolated coarser solution and relaxes with Gauss-Seidel until the
/// largest update drops below `tolerance` relative to the largest value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonSolver {
    pub grid_resolution: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PoissonSolver {
    fn default() -> Self {
        Self {
            grid_resolution: 32,
            max_iterations: 200,
            tolerance: 1e-4,
        }
    }
}

impl PoissonSolver {
    /// Grid resolutions from the coarsest to `grid_resolution`.
    pub fn levels(&self) -> Vec<usize> {
        let mut levels = vec![self.grid_resolution.max(1)];
        while let Some(&coarsest) = levels.last() {
            if coarsest % 2 != 0 || coarsest / 2 < 4 {
                break;
            }
            levels.push(coarsest / 2);
        }
        levels.reverse();
        levels
    }

    /// Returns the solution on the finest grid and a warning when its relaxation ran out of
    /// iterations before converging.
    pub fn solve(&self, tree: &Octree) -> (ImplicitFunction, Option<Error>) {
        let root = tree.root();
        let levels = self.levels();
        let finest = ImplicitFunction::zeros(root.origin, root.size, self.grid_resolution.max(1));
        let mut rhs = vec![divergence(&splat(tree, &finest), finest.spacing())];
        for _ in 1..levels.len() {
            if let Some(fine) = rhs.last() {
                rhs.push(restrict(fine));
            }
        }
        rhs.reverse();
        trace!(
            "Restricted the divergence of octree depth {} to {} levels",
            tree.max_depth(),
            rhs.len()
        );

        let mut solution: Option<ImplicitFunction> = None;
        let mut warning = None;
        for (resolution, divergence) in levels.into_iter().zip(&rhs) {
            let mut function = ImplicitFunction::zeros(root.origin, root.size, resolution);
            if let Some(coarse) = &solution {
                prolong(&coarse.values, &mut function.values);
            }
            let h = function.spacing();
            let (iterations, converged) = self.relax(&mut function.values, divergence, h);
            debug!(
                "Poisson level {}^3 relaxed in {} iterations (converged: {})",
                resolution, iterations, converged
            );
            warning = (!converged).then(|| Error::NumericalNonConvergence {
                stage: "poisson solve",
                iterations,
            });
            solution = Some(function);
        }
        if warning.is_some() {
            warn!(
                "Poisson solve did not converge within {} iterations",
                self.max_iterations
            );
        }
        let function =
            solution.unwrap_or_else(|| ImplicitFunction::zeros(root.origin, root.size, 1));
        (function, warning)
    }

    fn relax(&self, values: &mut Array3<f64>, divergence: &Array3<f64>, h: f64) -> (usize, bool) {
        let n = values.dim().0;
        if n < 3 {
            return (0, true);
        }
        let h2 = h * h;
        for iteration in 1..=self.max_iterations {
            let mut max_update = 0.0f64;
            let mut max_value = 0.0f64;
            for i in 1..n - 1 {
                for j in 1..n - 1 {
                    for k in 1..n - 1 {
                        let neighbors = values[[i - 1, j, k]]
                            + values[[i + 1, j, k]]
                            + values[[i, j - 1, k]]
                            + values[[i, j + 1, k]]
                            + values[[i, j, k - 1]]
                            + values[[i, j, k + 1]];
                        let updated = (neighbors - h2 * divergence[[i, j, k]]) / 6.0;
                        max_update = max_update.max((updated - values[[i, j, k]]).abs());
                        max_value = max_value.max(updated.abs());
                        values[[i, j, k]] = updated;
                    }
                }
            }
            if max_update <= self.tolerance * max_value || max_value == 0.0 {
                return (iteration, true);
            }
        }
        (self.max_iterations, false)
    }
}

/// Distributes the normal sums of the deepest octree cells onto the grid nodes as a density.
fn splat(tree: &Octree, function: &ImplicitFunction) -> Array3<Vector3<f64>> {
    let resolution = function.resolution();
    let n = resolution + 1;
    let volume = function.spacing().powi(3);
    let mut field = Array3::from_elem((n, n, n), Vector3::zeros());
    for node in tree.level(tree.max_depth()) {
        let grid = (node.centroid() - function.origin) / function.spacing();
        let clamp = |v: f64| v.clamp(0.0, resolution as f64);
        let (x, y, z) = (clamp(grid.x), clamp(grid.y), clamp(grid.z));
        let base = |v: f64| (v.floor() as usize).min(resolution.saturating_sub(1));
        let (i, j, k) = (base(x), base(y), base(z));
        let (fx, fy, fz) = (x - i as f64, y - j as f64, z - k as f64);
        for (di, wx) in [(0, 1.0 - fx), (1, fx)] {
            for (dj, wy) in [(0, 1.0 - fy), (1, fy)] {
                for (dk, wz) in [(0, 1.0 - fz), (1, fz)] {
                    field[[i + di, j + dj, k + dk]] += node.normal_sum * (wx * wy * wz / volume);
                }
            }
        }
    }
    field
}

/// Central difference divergence on the interior nodes. Boundary nodes get zero.
fn divergence(field: &Array3<Vector3<f64>>, h: f64) -> Array3<f64> {
    let n = field.dim().0;
    let mut divergence = Array3::zeros((n, n, n));
    for i in 1..n.saturating_sub(1) {
        for j in 1..n - 1 {
            for k in 1..n - 1 {
                let dx = field[[i + 1, j, k]].x - field[[i - 1, j, k]].x;
                let dy = field[[i, j + 1, k]].y - field[[i, j - 1, k]].y;
                let dz = field[[i, j, k + 1]].z - field[[i, j, k - 1]].z;
                divergence[[i, j, k]] = (dx + dy + dz) / (2.0 * h);
            }
        }
    }
    divergence
}

/// Full weighting onto a grid with half the resolution. Boundary nodes stay zero.
fn restrict(fine: &Array3<f64>) -> Array3<f64> {
    let n = (fine.dim().0 - 1) / 2 + 1;
    let mut coarse = Array3::zeros((n, n, n));
    let weight = |d: usize| if d == 1 { 1.0 } else { 0.5 };
    for i in 1..n.saturating_sub(1) {
        for j in 1..n - 1 {
            for k in 1..n - 1 {
                let mut sum = 0.0;
                for di in 0..3 {
                    for dj in 0..3 {
                        for dk in 0..3 {
                            sum += weight(di)
                                * weight(dj)
                                * weight(dk)
                                * fine[[2 * i + di - 1, 2 * j + dj - 1, 2 * k + dk - 1]];
                        }
                    }
                }
                coarse[[i, j, k]] = sum / 8.0;
            }
        }
    }
    coarse
}

/// Interpolates a coarse solution onto a grid with twice the resolution.
fn prolong(coarse: &Array3<f64>, fine: &mut Array3<f64>) {
    let coarse_n = coarse.dim().0 - 1;
    let fine_n = fine.dim().0 - 1;
    let scale = coarse_n as f64 / fine_n as f64;
    for ((i, j, k), value) in fine.indexed_iter_mut() {
        *value = trilinear(coarse, i as f64 * scale, j as f64 * scale, k as f64 * scale);
    }
}
