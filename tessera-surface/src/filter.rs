use crate::PointIndex;
use average::Variance;
use log::*;
use tessera_core::PointCloud;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Statistical outlier removal.
///
/// Every point gets the mean distance to its `k` nearest neighbors. Points whose mean distance
/// exceeds the mean over all points by more than `std_ratio` standard deviations are dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OutlierFilter {
    pub k: usize,
    pub std_ratio: f64,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self {
            k: 20,
            std_ratio: 2.0,
        }
    }
}

impl OutlierFilter {
    pub fn new(k: usize, std_ratio: f64) -> Self {
        Self { k, std_ratio }
    }

    /// Mean distance from every point to its `k` nearest other points.
    pub fn mean_distances(&self, cloud: &PointCloud) -> Vec<f64> {
        let index = PointIndex::new(&cloud.points);
        let mean_distance = |point| {
            let neighbors = index.nearest(point, self.k + 1);
            // The first neighbor is the point itself.
            let others = &neighbors[1.min(neighbors.len())..];
            if others.is_empty() {
                0.0
            } else {
                others.iter().map(|&(_, d)| d).sum::<f64>() / others.len() as f64
            }
        };
        #[cfg(not(feature = "rayon"))]
        let distances = cloud.points.iter().copied().map(mean_distance).collect();
        #[cfg(feature = "rayon")]
        let distances = cloud.points.par_iter().copied().map(mean_distance).collect();
        distances
    }

    /// Removes the outliers from `cloud` and returns how many were removed.
    pub fn filter(&self, cloud: &mut PointCloud) -> usize {
        if cloud.len() <= 2 || self.k == 0 {
            return 0;
        }
        let distances = self.mean_distances(cloud);
        let variance: Variance = distances.iter().copied().collect();
        let cutoff = variance.mean() + self.std_ratio * variance.population_variance().sqrt();
        let keep: Vec<bool> = distances.iter().map(|&d| d <= cutoff).collect();
        let before = cloud.len();
        cloud.retain_mask(&keep);
        let removed = before - cloud.len();
        info!(
            "Outlier filter removed {} of {} points (cutoff {:.4})",
            removed, before, cutoff
        );
        removed
    }
}
