//! The minimal five-point relative pose solver of Stewenius, Engels and Nister,
//! "Recent developments on direct relative orientation".

use crate::EssentialMatrix;
use arrayvec::ArrayVec;
use float_ord::FloatOrd;
use tessera_core::nalgebra::{
    self,
    dimension::{U10, U20, U4, U5, U9},
    DimName, Matrix3, OMatrix, OVector, UnitVector3, Vector3, Vector4,
};
use tessera_core::sample_consensus::Estimator;
use tessera_core::BearingMatch;

const BASIS_XXX: usize = 0;
const BASIS_XXY: usize = 1;
const BASIS_XYY: usize = 2;
const BASIS_YYY: usize = 3;
const BASIS_XXZ: usize = 4;
const BASIS_XYZ: usize = 5;
const BASIS_YYZ: usize = 6;
const BASIS_XZZ: usize = 7;
const BASIS_YZZ: usize = 8;
const BASIS_ZZZ: usize = 9;
const BASIS_XX: usize = 10;
const BASIS_XY: usize = 11;
const BASIS_YY: usize = 12;
const BASIS_XZ: usize = 13;
const BASIS_YZ: usize = 14;
const BASIS_ZZ: usize = 15;
const BASIS_X: usize = 16;
const BASIS_Y: usize = 17;
const BASIS_Z: usize = 18;
const BASIS_1: usize = 19;

const EIGEN_CONVERGENCE: f64 = 1e-12;
const EIGEN_ITERATIONS: usize = 1000;
const EIGEN_THRESHOLD: f64 = 1e-12;
const SVD_CONVERGENCE: f64 = 1e-12;
const SVD_ITERATIONS: usize = 1000;
/// Singular values below this count as the null space of the action matrix.
const SVD_NULL_THRESHOLD: f64 = 1e-8;

/// Coefficients of a cubic polynomial in `x`, `y`, `z`, indexed by the `BASIS_*` constants.
type PolyBasisVec = OVector<f64, U20>;
type NullspaceMat = OMatrix<f64, U9, U4>;
type ConstraintMat = OMatrix<f64, U10, U20>;
type Square10 = OMatrix<f64, U10, U10>;

/// One row per match holding the coefficients of `transpose(b) * E * a` in the entries of `E`.
fn encode_epipolar_equation(
    a: &[UnitVector3<f64>; 5],
    b: &[UnitVector3<f64>; 5],
) -> OMatrix<f64, U5, U9> {
    let mut out: OMatrix<f64, U5, U9> = nalgebra::zero();
    for i in 0..U5::dim() {
        let ap = a[i].into_inner();
        let bp = b[i].into_inner();
        for j in 0..3 {
            let v = ap[j] * bp;
            out.fixed_slice_mut::<1, 3>(i, 3 * j).copy_from(&v.transpose());
        }
    }
    out
}

/// The four dimensional null space of the epipolar equations, or `None` when the sample is
/// degenerate.
fn five_points_nullspace_basis(
    a: &[UnitVector3<f64>; 5],
    b: &[UnitVector3<f64>; 5],
) -> Option<NullspaceMat> {
    let epipolar_constraint = encode_epipolar_equation(a, b);
    let ee = epipolar_constraint.transpose() * epipolar_constraint;
    let eigen = ee.try_symmetric_eigen(EIGEN_CONVERGENCE, EIGEN_ITERATIONS)?;
    let mut sources = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    sources.sort_unstable_by_key(|&ix| FloatOrd(eigen.eigenvalues[ix]));
    let nullity = sources
        .iter()
        .map(|&i| eigen.eigenvalues[i])
        .position(|e| e > EIGEN_THRESHOLD)?;
    if nullity != 4 {
        return None;
    }
    let mut nullspace = NullspaceMat::zeros();
    for (&ix, mut column) in sources.iter().zip(nullspace.column_iter_mut()) {
        column.copy_from(&eigen.eigenvectors.column(ix));
    }
    Some(nullspace)
}

/// Product of two linear polynomials.
fn o1(a: Vector4<f64>, b: Vector4<f64>) -> PolyBasisVec {
    let mut res = PolyBasisVec::zeros();
    res[BASIS_XX] = a.x * b.x;
    res[BASIS_XY] = a.x * b.y + a.y * b.x;
    res[BASIS_XZ] = a.x * b.z + a.z * b.x;
    res[BASIS_YY] = a.y * b.y;
    res[BASIS_YZ] = a.y * b.z + a.z * b.y;
    res[BASIS_ZZ] = a.z * b.z;
    res[BASIS_X] = a.x * b.w + a.w * b.x;
    res[BASIS_Y] = a.y * b.w + a.w * b.y;
    res[BASIS_Z] = a.z * b.w + a.w * b.z;
    res[BASIS_1] = a.w * b.w;
    res
}

/// Product of a quadratic and a linear polynomial.
fn o2(a: PolyBasisVec, b: Vector4<f64>) -> PolyBasisVec {
    let mut res = PolyBasisVec::zeros();
    res[BASIS_XXX] = a[BASIS_XX] * b.x;
    res[BASIS_XXY] = a[BASIS_XX] * b.y + a[BASIS_XY] * b.x;
    res[BASIS_XXZ] = a[BASIS_XX] * b.z + a[BASIS_XZ] * b.x;
    res[BASIS_XYY] = a[BASIS_XY] * b.y + a[BASIS_YY] * b.x;
    res[BASIS_XYZ] = a[BASIS_XY] * b.z + a[BASIS_YZ] * b.x + a[BASIS_XZ] * b.y;
    res[BASIS_XZZ] = a[BASIS_XZ] * b.z + a[BASIS_ZZ] * b.x;
    res[BASIS_YYY] = a[BASIS_YY] * b.y;
    res[BASIS_YYZ] = a[BASIS_YY] * b.z + a[BASIS_YZ] * b.y;
    res[BASIS_YZZ] = a[BASIS_YZ] * b.z + a[BASIS_ZZ] * b.y;
    res[BASIS_ZZZ] = a[BASIS_ZZ] * b.z;
    res[BASIS_XX] = a[BASIS_XX] * b.w + a[BASIS_X] * b.x;
    res[BASIS_XY] = a[BASIS_XY] * b.w + a[BASIS_X] * b.y + a[BASIS_Y] * b.x;
    res[BASIS_XZ] = a[BASIS_XZ] * b.w + a[BASIS_X] * b.z + a[BASIS_Z] * b.x;
    res[BASIS_YY] = a[BASIS_YY] * b.w + a[BASIS_Y] * b.y;
    res[BASIS_YZ] = a[BASIS_YZ] * b.w + a[BASIS_Y] * b.z + a[BASIS_Z] * b.y;
    res[BASIS_ZZ] = a[BASIS_ZZ] * b.w + a[BASIS_Z] * b.z;
    res[BASIS_X] = a[BASIS_X] * b.w + a[BASIS_1] * b.x;
    res[BASIS_Y] = a[BASIS_Y] * b.w + a[BASIS_1] * b.y;
    res[BASIS_Z] = a[BASIS_Z] * b.w + a[BASIS_1] * b.z;
    res[BASIS_1] = a[BASIS_1] * b.w;
    res
}

/// The ten cubic constraints on `E = x E0 + y E1 + z E2 + E3`: the determinant and the nine
/// entries of `2 E transpose(E) E - trace(E transpose(E)) E`.
fn five_points_polynomial_constraints(nullspace: &NullspaceMat) -> ConstraintMat {
    let mut e_poly = [[Vector4::zeros(); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            e_poly[i][j] = nullspace.row(3 * i + j).transpose();
        }
    }

    let mut m = ConstraintMat::zeros();
    m.row_mut(0).copy_from(
        &(o2(
            o1(e_poly[0][1], e_poly[1][2]) - o1(e_poly[0][2], e_poly[1][1]),
            e_poly[2][0],
        ) + o2(
            o1(e_poly[0][2], e_poly[1][0]) - o1(e_poly[0][0], e_poly[1][2]),
            e_poly[2][1],
        ) + o2(
            o1(e_poly[0][0], e_poly[1][1]) - o1(e_poly[0][1], e_poly[1][0]),
            e_poly[2][2],
        ))
        .transpose(),
    );

    // `E transpose(E)` is symmetric.
    let mut eet = [[PolyBasisVec::zeros(); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            eet[i][j] = if i <= j {
                o1(e_poly[i][0], e_poly[j][0])
                    + o1(e_poly[i][1], e_poly[j][1])
                    + o1(e_poly[i][2], e_poly[j][2])
            } else {
                eet[j][i]
            };
        }
    }

    let mut l = eet;
    let trace = 0.5 * (eet[0][0] + eet[1][1] + eet[2][2]);
    #[allow(clippy::needless_range_loop)]
    for i in 0..3 {
        l[i][i] -= trace;
    }

    #[allow(clippy::needless_range_loop)]
    for i in 0..3 {
        for j in 0..3 {
            let leij =
                o2(l[i][0], e_poly[0][j]) + o2(l[i][1], e_poly[1][j]) + o2(l[i][2], e_poly[2][j]);
            m.row_mut(1 + i * 3 + j).copy_from(&leij.transpose());
        }
    }

    m
}

fn compute_eigenvector(m: &Square10, lambda: f64) -> Option<OVector<f64, U10>> {
    let svd = (m - Square10::from_diagonal_element(lambda)).try_svd(
        false,
        true,
        SVD_CONVERGENCE,
        SVD_ITERATIONS,
    )?;
    if svd.singular_values[9] < SVD_NULL_THRESHOLD * svd.singular_values[0].max(1.0) {
        Some(svd.v_t?.row(9).transpose())
    } else {
        None
    }
}

/// Every real eigenvalue of the action matrix gives one essential matrix.
fn essentials_from_action_basis(
    at: &Square10,
    basis: &NullspaceMat,
) -> ArrayVec<EssentialMatrix, 10> {
    let eigenvalues = at.complex_eigenvalues();
    eigenvalues
        .iter()
        .filter(|e| e.im.abs() <= 1e-12 * e.re.abs().max(1.0))
        .filter_map(|e| compute_eigenvector(at, e.re))
        .map(|v| v.fixed_rows::<4>(5).into_owned())
        .map(|xyzw| Matrix3::from_iterator((basis * xyzw).iter().copied()))
        .map(EssentialMatrix)
        .take(10)
        .collect()
}

/// All essential matrices compatible with five bearing correspondences.
pub fn five_points_relative_pose(
    a: &[UnitVector3<f64>; 5],
    b: &[UnitVector3<f64>; 5],
) -> ArrayVec<EssentialMatrix, 10> {
    let basis = match five_points_nullspace_basis(a, b) {
        Some(basis) => basis,
        None => return ArrayVec::new(),
    };
    let constraints = five_points_polynomial_constraints(&basis);

    // Gauss-Jordan elimination of the constraints through an LU decomposition.
    let lu = constraints.fixed_slice::<10, 10>(0, 0).full_piv_lu();
    let m = match lu.solve(&constraints.fixed_slice::<10, 10>(0, 10).into_owned()) {
        Some(m) => m,
        None => return ArrayVec::new(),
    };

    let mut at = Square10::zeros();
    at.fixed_slice_mut::<3, 10>(0, 0)
        .copy_from(&m.fixed_slice::<3, 10>(0, 0));
    at.row_mut(3).copy_from(&m.row(4));
    at.row_mut(4).copy_from(&m.row(5));
    at.row_mut(5).copy_from(&m.row(7));
    at[(6, 0)] = -1.0;
    at[(7, 1)] = -1.0;
    at[(8, 3)] = -1.0;
    at[(9, 6)] = -1.0;

    essentials_from_action_basis(&at, &basis)
}

/// Minimal estimator of essential matrices from five [`BearingMatch`]es.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FivePoint;

impl Estimator<BearingMatch> for FivePoint {
    type Model = EssentialMatrix;
    type ModelIter = ArrayVec<EssentialMatrix, 10>;
    const MIN_SAMPLES: usize = 5;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = BearingMatch> + Clone,
    {
        let mut a = [UnitVector3::new_unchecked(Vector3::z()); 5];
        let mut b = [UnitVector3::new_unchecked(Vector3::z()); 5];
        let mut count = 0;
        for ((a, b), m) in a.iter_mut().zip(b.iter_mut()).zip(data) {
            *a = m.0;
            *b = m.1;
            count += 1;
        }
        if count < Self::MIN_SAMPLES {
            return ArrayVec::new();
        }
        five_points_relative_pose(&a, &b)
    }
}
