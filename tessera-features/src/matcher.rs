use float_ord::FloatOrd;
use log::*;
use tessera_core::{Feature, FeatureMatch};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Full matrix of Euclidean descriptor distances, `distances[q][t]` between `query[q]` and
/// `train[t]`. Rows are computed in parallel with the `rayon` feature.
pub fn descriptor_distances(query: &[Feature], train: &[Feature]) -> Vec<Vec<f32>> {
    let row = |q: &Feature| -> Vec<f32> {
        train
            .iter()
            .map(|t| q.descriptor.distance(&t.descriptor))
            .collect()
    };
    #[cfg(not(feature = "rayon"))]
    {
        query.iter().map(row).collect()
    }
    #[cfg(feature = "rayon")]
    {
        query.par_iter().map(row).collect()
    }
}

/// Nearest neighbor matching with Lowe's ratio test.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RatioMatcher {
    /// A match is kept only if its distance is below `ratio` times the second best distance.
    pub ratio: f32,
}

impl Default for RatioMatcher {
    fn default() -> Self {
        Self { ratio: 0.75 }
    }
}

impl RatioMatcher {
    pub fn new(ratio: f32) -> Self {
        Self { ratio }
    }

    /// Matches every feature of `query` against `train`.
    pub fn match_features(&self, query: &[Feature], train: &[Feature]) -> Vec<FeatureMatch> {
        self.match_distances_between(&descriptor_distances(query, train), query, train)
    }

    /// Applies the ratio test to a precomputed distance matrix.
    ///
    /// A row with a single candidate has no second neighbor and is accepted on its own. Candidates
    /// at distance zero carry the same descriptor as the best one and are not counted as a second
    /// neighbor, so an exact duplicate always matches. Ties go to the lowest train index.
    pub fn match_distances(&self, distances: &[Vec<f32>]) -> Vec<FeatureMatch> {
        self.match_rows(distances, |_, _| 0.0)
    }

    /// Like [`RatioMatcher::match_distances`], but ties between equally distant candidates go to
    /// the train feature closest to the query feature in position and scale.
    pub fn match_distances_between(
        &self,
        distances: &[Vec<f32>],
        query: &[Feature],
        train: &[Feature],
    ) -> Vec<FeatureMatch> {
        self.match_rows(distances, |q, t| {
            let (a, b) = (&query[q], &train[t]);
            (a.point - b.point).norm() + (a.scale - b.scale).abs()
        })
    }

    fn match_rows(
        &self,
        distances: &[Vec<f32>],
        nearness: impl Fn(usize, usize) -> f64,
    ) -> Vec<FeatureMatch> {
        let matches: Vec<FeatureMatch> = distances
            .iter()
            .enumerate()
            .filter_map(|(query, row)| self.select(query, row, |train| nearness(query, train)))
            .collect();
        debug!(
            "Ratio test kept {} of {} features",
            matches.len(),
            distances.len()
        );
        matches
    }

    fn select(
        &self,
        query: usize,
        row: &[f32],
        nearness: impl Fn(usize) -> f64,
    ) -> Option<FeatureMatch> {
        let distance = row.iter().copied().fold(f32::INFINITY, f32::min);
        if !distance.is_finite() {
            return None;
        }
        let train = (0..row.len())
            .filter(|&train| row[train] == distance)
            .min_by_key(|&train| (FloatOrd(nearness(train)), train))?;
        let second = row
            .iter()
            .enumerate()
            .filter(|&(other, &d)| other != train && !(distance == 0.0 && d == 0.0))
            .map(|(_, &d)| d)
            .fold(f32::INFINITY, f32::min);
        trace!(
            "Feature {} best {} at {}, second best {}",
            query,
            distance,
            train,
            second
        );
        if !(distance < self.ratio * second) {
            return None;
        }
        Some(FeatureMatch {
            query,
            train,
            distance,
            confidence: 1.0 - (distance / 2.0).min(1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tessera_core::nalgebra::Point2;
    use tessera_core::{Descriptor, DESCRIPTOR_LEN};

    fn feature(hot: usize, weight: f32) -> Feature {
        let mut descriptor = Descriptor::zeros();
        descriptor.0[hot] = weight;
        descriptor.0[(hot + 1) % DESCRIPTOR_LEN] = (1.0 - weight * weight).sqrt();
        Feature {
            point: Point2::new(hot as f64, 0.0),
            scale: 1.0,
            orientation: 0.0,
            response: 1.0,
            descriptor,
        }
    }

    #[test]
    fn empty_inputs_give_no_matches() {
        let features = vec![feature(0, 1.0)];
        assert!(RatioMatcher::default().match_features(&[], &features).is_empty());
        assert!(RatioMatcher::default().match_features(&features, &[]).is_empty());
    }

    #[test]
    fn ambiguous_matches_are_rejected() {
        let query = vec![feature(0, 1.0)];
        let train = vec![feature(0, 0.9), feature(0, 0.89)];
        assert!(RatioMatcher::default()
            .match_features(&query, &train)
            .is_empty());
    }

    #[test]
    fn distinct_matches_are_accepted_with_confidence() {
        let query = vec![feature(0, 1.0), feature(10, 1.0)];
        let train = vec![feature(10, 0.99), feature(0, 1.0), feature(50, 1.0)];
        let matches = RatioMatcher::default().match_features(&query, &train);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].query, matches[0].train), (0, 1));
        assert_relative_eq!(matches[0].confidence, 1.0);
        assert_eq!((matches[1].query, matches[1].train), (1, 0));
        assert!(matches[1].confidence < 1.0 && matches[1].confidence > 0.9);
    }

    #[test]
    fn single_candidate_is_accepted() {
        let matches =
            RatioMatcher::default().match_features(&[feature(3, 1.0)], &[feature(90, 1.0)]);
        assert_eq!(matches.len(), 1);
        assert_relative_eq!(matches[0].confidence, 1.0 - 2f32.sqrt() / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn duplicate_descriptors_match_the_nearest_feature() {
        let mut features: Vec<Feature> = (0..4).map(|_| feature(7, 1.0)).collect();
        for (ix, f) in features.iter_mut().enumerate() {
            f.point = Point2::new(10.0 * ix as f64, 5.0);
        }
        let matches = RatioMatcher::default().match_features(&features, &features);
        assert_eq!(matches.len(), 4);
        for m in &matches {
            assert_eq!(m.query, m.train);
            assert_eq!(m.distance, 0.0);
        }
    }

    #[test]
    fn duplicates_without_positions_go_to_the_lowest_index() {
        let distances = vec![vec![0.0, 0.0, 0.5], vec![0.3, 0.3, 1.0]];
        let matches = RatioMatcher::default().match_distances(&distances);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].query, matches[0].train), (0, 0));
    }
}
