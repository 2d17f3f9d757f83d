use crate::Camera;
use nalgebra::{Point3, Vector3};

/// An ordered set of reconstructed points.
///
/// `normals` and `origins` are parallel to `points` when present. `origins` holds the index into
/// `cameras` of the view that produced each point and may be empty when that is unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,
    pub normals: Option<Vec<Vector3<f64>>>,
    pub origins: Vec<usize>,
    pub cameras: Vec<Camera>,
}

impl PointCloud {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self {
            cameras,
            ..Default::default()
        }
    }

    pub fn from_points(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Adds a point produced by camera `origin`.
    ///
    /// Any normals already present are dropped since they no longer cover every point.
    pub fn push(&mut self, point: Point3<f64>, origin: usize) {
        if self.origins.len() == self.points.len() {
            self.origins.push(origin);
        }
        self.points.push(point);
        self.normals = None;
    }

    /// Keeps only the points whose flag is set, preserving the order of the rest.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.points.len());
        if self.origins.len() == self.points.len() {
            retain_flagged(&mut self.origins, keep);
        } else {
            self.origins.clear();
        }
        if let Some(normals) = &mut self.normals {
            retain_flagged(normals, keep);
        }
        retain_flagged(&mut self.points, keep);
    }

    /// The camera that observed point `index`, if known.
    pub fn origin_camera(&self, index: usize) -> Option<&Camera> {
        self.origins
            .get(index)
            .and_then(|&camera| self.cameras.get(camera))
    }

    /// Axis aligned bounds as `(min, max)`, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (lo.inf(p), hi.sup(p))
        }))
    }

    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some((sum / self.points.len() as f64).into())
    }
}

fn retain_flagged<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut flags = keep.iter();
    items.retain(|_| flags.next().copied().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_mask_keeps_parallel_lists_aligned() {
        let mut cloud = PointCloud::default();
        for i in 0..4 {
            cloud.push(Point3::new(i as f64, 0.0, 0.0), i);
        }
        cloud.normals = Some(vec![Vector3::x(), Vector3::y(), Vector3::z(), -Vector3::x()]);
        cloud.retain_mask(&[true, false, true, false]);
        assert_eq!(cloud.points, vec![Point3::origin(), Point3::new(2.0, 0.0, 0.0)]);
        assert_eq!(cloud.origins, vec![0, 2]);
        assert_eq!(cloud.normals, Some(vec![Vector3::x(), Vector3::z()]));
    }

    #[test]
    fn bounds_cover_all_points() {
        let cloud = PointCloud::from_points(vec![
            Point3::new(1.0, -2.0, 0.5),
            Point3::new(-1.0, 3.0, 0.0),
        ]);
        let (lo, hi) = cloud.bounds().unwrap();
        assert_eq!(lo, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(hi, Point3::new(1.0, 3.0, 0.5));
        assert!(PointCloud::default().bounds().is_none());
    }
}
