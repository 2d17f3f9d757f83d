use tessera_core::nalgebra::{Point3, Vector3};

/// A node of an [`Octree`]. Every node aggregates the samples inserted below it.
#[derive(Debug, Clone, PartialEq)]
pub struct OctreeNode {
    pub depth: usize,
    /// Minimum corner of the cell.
    pub origin: Point3<f64>,
    pub size: f64,
    pub count: usize,
    pub position_sum: Vector3<f64>,
    pub normal_sum: Vector3<f64>,
    children: [Option<usize>; 8],
}

impl OctreeNode {
    fn new(depth: usize, origin: Point3<f64>, size: f64) -> Self {
        Self {
            depth,
            origin,
            size,
            count: 0,
            position_sum: Vector3::zeros(),
            normal_sum: Vector3::zeros(),
            children: [None; 8],
        }
    }

    /// Mean position of the samples in the cell.
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from(self.position_sum / self.count.max(1) as f64)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    fn child_slot(&self, point: Point3<f64>) -> usize {
        let center = self.origin + Vector3::repeat(self.size / 2.0);
        usize::from(point.x >= center.x)
            | (usize::from(point.y >= center.y) << 1)
            | (usize::from(point.z >= center.z) << 2)
    }

    fn child_origin(&self, slot: usize) -> Point3<f64> {
        let half = self.size / 2.0;
        self.origin
            + Vector3::new(
                (slot & 1) as f64 * half,
                ((slot >> 1) & 1) as f64 * half,
                ((slot >> 2) & 1) as f64 * half,
            )
    }
}

/// A sparse octree over a cube, holding oriented samples.
///
/// Nodes live in an arena and only cells that received a sample exist. Sums are accumulated on
/// the way down, so every node holds the totals of its subtree and a level of the tree can be
/// read without visiting the levels below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    max_depth: usize,
}

impl Octree {
    /// An empty tree over the cube at `origin` with side `size`, subdivided `max_depth` times.
    pub fn new(origin: Point3<f64>, size: f64, max_depth: usize) -> Self {
        Self {
            nodes: vec![OctreeNode::new(0, origin, size)],
            max_depth,
        }
    }

    pub fn root(&self) -> &OctreeNode {
        &self.nodes[0]
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Inserts a sample down to the deepest level. Samples outside the cube are clamped into it.
    pub fn insert(&mut self, point: Point3<f64>, normal: Vector3<f64>) {
        let root = self.root();
        let top = root.origin + Vector3::repeat(root.size);
        let point = Point3::new(
            point.x.clamp(root.origin.x, top.x),
            point.y.clamp(root.origin.y, top.y),
            point.z.clamp(root.origin.z, top.z),
        );
        let mut current = 0;
        loop {
            let node = &mut self.nodes[current];
            node.count += 1;
            node.position_sum += point.coords;
            node.normal_sum += normal;
            if node.depth == self.max_depth {
                break;
            }
            let slot = node.child_slot(point);
            current = match node.children[slot] {
                Some(child) => child,
                None => {
                    let child =
                        OctreeNode::new(node.depth + 1, node.child_origin(slot), node.size / 2.0);
                    let ix = self.nodes.len();
                    self.nodes[current].children[slot] = Some(ix);
                    self.nodes.push(child);
                    ix
                }
            };
        }
    }

    /// Every occupied cell at `depth`.
    pub fn level(&self, depth: usize) -> impl Iterator<Item = &OctreeNode> + '_ {
        self.nodes.iter().filter(move |node| node.depth == depth)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &OctreeNode> + '_ {
        self.nodes.iter().filter(|node| node.is_leaf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn levels_aggregate_their_subtrees() {
        let mut tree = Octree::new(Point3::origin(), 1.0, 3);
        tree.insert(Point3::new(0.1, 0.1, 0.1), Vector3::x());
        tree.insert(Point3::new(0.11, 0.1, 0.1), Vector3::y());
        tree.insert(Point3::new(0.9, 0.9, 0.9), Vector3::z());
        assert_eq!(tree.root().count, 3);
        assert_relative_eq!(tree.root().normal_sum, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(tree.level(1).count(), 2);
        let deepest: Vec<&OctreeNode> = tree.level(3).collect();
        assert_eq!(deepest.len(), 2);
        assert_eq!(deepest.iter().map(|n| n.count).sum::<usize>(), 3);
        assert_eq!(tree.leaves().count(), 2);
        assert_relative_eq!(deepest[0].size, 0.125);
        assert_relative_eq!(
            deepest[0].centroid(),
            Point3::new(0.105, 0.1, 0.1),
            epsilon = 1e-12
        );
    }

    #[test]
    fn outside_samples_are_clamped() {
        let mut tree = Octree::new(Point3::origin(), 1.0, 2);
        tree.insert(Point3::new(5.0, -1.0, 0.5), Vector3::x());
        let leaf = tree.level(2).next().unwrap();
        assert_relative_eq!(leaf.origin, Point3::new(0.75, 0.0, 0.5));
    }
}
