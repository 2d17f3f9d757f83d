use log::*;
use rand::{seq::index::sample, Rng};
use tessera_core::sample_consensus::{Consensus, Estimator, Model};

/// Classic random sample consensus with a fixed number of iterations.
///
/// Every iteration draws `MIN_SAMPLES` distinct data points, estimates all models they admit and
/// scores each by the number of points whose residual is below `inlier_threshold`. Ties are broken
/// by the lower sum of inlier residuals.
#[derive(Debug, Clone)]
pub struct Ransac<R> {
    pub iterations: usize,
    pub inlier_threshold: f64,
    rng: R,
}

impl<R: Rng> Ransac<R> {
    pub fn new(iterations: usize, inlier_threshold: f64, rng: R) -> Self {
        Self {
            iterations,
            inlier_threshold,
            rng,
        }
    }

    fn inliers<M, Data>(&self, model: &M, data: &[Data]) -> (Vec<usize>, f64)
    where
        M: Model<Data>,
    {
        let mut cost = 0.0;
        let inliers = data
            .iter()
            .enumerate()
            .filter_map(|(ix, datum)| {
                let residual = model.residual(datum);
                (residual < self.inlier_threshold).then(|| {
                    cost += residual;
                    ix
                })
            })
            .collect();
        (inliers, cost)
    }
}

impl<E, R, Data> Consensus<E, Data> for Ransac<R>
where
    E: Estimator<Data>,
    R: Rng,
    Data: Clone,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        if data.len() < E::MIN_SAMPLES {
            debug!(
                "Consensus needs {} samples, only {} given",
                E::MIN_SAMPLES,
                data.len()
            );
            return None;
        }
        let mut best: Option<(E::Model, Vec<usize>, f64)> = None;
        for _ in 0..self.iterations {
            let indices: Vec<usize> = sample(&mut self.rng, data.len(), E::MIN_SAMPLES).into_vec();
            let models = estimator.estimate(indices.iter().map(|&ix| data[ix].clone()));
            for model in models {
                let (inliers, cost) = self.inliers(&model, &data);
                let better = match &best {
                    None => !inliers.is_empty(),
                    Some((_, best_inliers, best_cost)) => {
                        inliers.len() > best_inliers.len()
                            || (inliers.len() == best_inliers.len() && cost < *best_cost)
                    }
                };
                if better {
                    best = Some((model, inliers, cost));
                }
            }
            if best
                .as_ref()
                .map_or(false, |(_, inliers, _)| inliers.len() == data.len())
            {
                trace!("Every datum is an inlier, stopping early");
                break;
            }
        }
        if let Some((_, inliers, _)) = &best {
            debug!("Consensus found {} of {} inliers", inliers.len(), data.len());
        }
        best.map(|(model, inliers, _)| (model, inliers))
    }
}
