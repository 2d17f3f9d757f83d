use derive_more::{Add, AddAssign};
use tessera_core::nalgebra::{Matrix4, Point3, Vector3, Vector4};

/// Sum of squared distances to a set of planes, as the symmetric matrix `sum(p * p^T)` over the
/// planes `p = (a, b, c, d)` with `ax + by + cz + d = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Add, AddAssign)]
pub struct Quadric(pub Matrix4<f64>);

impl Default for Quadric {
    fn default() -> Self {
        Self(Matrix4::zeros())
    }
}

impl Quadric {
    /// The quadric of the plane through `point` with unit `normal`.
    pub fn from_plane(normal: Vector3<f64>, point: Point3<f64>) -> Self {
        let plane = Vector4::new(normal.x, normal.y, normal.z, -normal.dot(&point.coords));
        Self(plane * plane.transpose())
    }

    /// The quadric of a triangle's plane, or `None` for a degenerate triangle.
    pub fn from_triangle([a, b, c]: [Point3<f64>; 3]) -> Option<Self> {
        let normal = (b - a).cross(&(c - a)).try_normalize(f64::EPSILON)?;
        Some(Self::from_plane(normal, a))
    }

    /// Sum of squared plane distances of `point`.
    pub fn error(&self, point: Point3<f64>) -> f64 {
        let v = point.to_homogeneous();
        (v.transpose() * self.0 * v)[0].max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn error_is_squared_plane_distance() {
        let q = Quadric::from_triangle([
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ])
        .unwrap();
        assert_relative_eq!(q.error(Point3::new(4.0, -2.0, 3.0)), 4.0, epsilon = 1e-12);
        let sum = q + Quadric::from_plane(Vector3::x(), Point3::origin());
        assert_relative_eq!(sum.error(Point3::new(2.0, 0.0, 1.0)), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_triangles_have_no_plane() {
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(Quadric::from_triangle([p, p, Point3::origin()]).is_none());
    }
}
