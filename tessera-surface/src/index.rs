use rstar::primitives::PointWithData;
use rstar::RTree;
use tessera_core::nalgebra::Point3;

type IndexedPoint = PointWithData<usize, [f64; 3]>;

/// Nearest neighbor queries over a fixed set of points.
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(points: &[Point3<f64>]) -> Self {
        let indexed = points
            .iter()
            .enumerate()
            .map(|(ix, p)| IndexedPoint::new(ix, [p.x, p.y, p.z]))
            .collect();
        Self {
            tree: RTree::bulk_load(indexed),
        }
    }

    /// The `k` points closest to `query` as `(index, distance)`, nearest first. A query at an
    /// indexed point finds that point first.
    pub fn nearest(&self, query: Point3<f64>, k: usize) -> Vec<(usize, f64)> {
        let position = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor_iter(&position)
            .take(k)
            .map(|neighbor| {
                let p = neighbor.position();
                let distance = Point3::new(p[0], p[1], p[2]) - query;
                (neighbor.data, distance.norm())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
