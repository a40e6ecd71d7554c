use std::collections::BTreeSet;
use std::fmt;

use super::likelihood::{LabelLikelihood, LabeledSequence};
use super::model::{feature_indices, CrfModel, Layout};
use super::optimizer::{Lbfgs, Optimizer, StochasticGradient};
use super::pool::GradientPool;
use super::CrfAlgorithm;
use crate::errors::{Result, SparseTcError};
use crate::indexer::Indexer;
use crate::sparse::SparseRecord;

const LBFGS_HISTORY: usize = 5;

/// Terminal state of a training run.
///
/// The states before it are not modelled by an enum: a [`TaggerTrainer`] is an untrained
/// configuration, [`TaggerTrainer::train()`] borrows it for the duration of training, and the
/// model only exists once a [`TrainedTagger`] is returned. An error during training returns no
/// model at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrainingState {
    /// The optimizer reported convergence.
    Converged,

    /// The iteration budget ran out first. The model is usable but may be under-trained.
    IterationLimitReached,
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Converged => "converged",
            Self::IterationLimitReached => "iteration limit reached",
        })
    }
}

/// Result of [`TaggerTrainer::train()`].
#[derive(Clone, Debug)]
pub struct TrainedTagger {
    pub model: CrfModel,
    pub state: TrainingState,
    pub iterations: usize,
}

/// Trainer of [`CrfModel`]s.
///
/// # Examples
///
/// ```
/// use sparsetc::crf::{CrfAlgorithm, TaggerTrainer};
/// use sparsetc::SparseRecord;
///
/// let groups: Vec<Vec<SparseRecord>> = vec![vec![
///     "0\t1:1\t2:1".parse().unwrap(),
///     "1\t1:1\t3:1".parse().unwrap(),
/// ]];
/// let trained = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood)
///     .max_iterations(50)
///     .train(&groups)
///     .unwrap();
/// assert_eq!(vec!["0", "1"], trained.model.predict(&groups[0]));
/// ```
#[derive(Clone, Debug)]
pub struct TaggerTrainer {
    algorithm: CrfAlgorithm,
    variance: f64,
    max_iterations: usize,
    tolerance: f64,
    learning_rate: f64,
}

impl TaggerTrainer {
    pub const fn new(algorithm: CrfAlgorithm) -> Self {
        Self {
            algorithm,
            variance: 10.0,
            max_iterations: 100,
            tolerance: 1e-4,
            learning_rate: 0.1,
        }
    }

    /// Variance of the Gaussian prior on the weights.
    pub const fn prior_variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    pub const fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Relative objective change below which training is considered converged.
    pub const fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Initial learning rate of [`CrfAlgorithm::StochasticGradient`].
    pub const fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Trains on sequences of encoded records. Outcomes of the records become the labels.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if there is no training record or a
    /// parameter is out of range.
    pub fn train(&self, groups: &[Vec<SparseRecord>]) -> Result<TrainedTagger> {
        if !(self.variance > 0.0) {
            return Err(SparseTcError::invalid_config(
                "prior variance must be positive",
            ));
        }
        if let CrfAlgorithm::ThreadedLabelLikelihood { threads: 0 } = self.algorithm {
            return Err(SparseTcError::invalid_config(
                "the number of threads must be positive",
            ));
        }
        let groups: Vec<&Vec<SparseRecord>> = groups.iter().filter(|g| !g.is_empty()).collect();
        if groups.is_empty() {
            return Err(SparseTcError::invalid_config("no training sequences"));
        }

        let outcomes: BTreeSet<&str> = groups
            .iter()
            .flat_map(|g| g.iter().map(|r| r.outcome.as_str()))
            .collect();
        let mut labels = Indexer::new();
        for outcome in outcomes {
            labels.get_id(outcome);
        }
        let n_features = groups
            .iter()
            .flat_map(|g| g.iter().flat_map(|r| r.entries.iter().map(|&(fid, _)| fid)))
            .max()
            .map_or(Ok(0), usize::try_from)?;
        let layout = Layout::new(n_features, labels.len());
        let seqs: Vec<LabeledSequence> = groups
            .iter()
            .map(|g| LabeledSequence {
                xs: g.iter().map(feature_indices).collect(),
                ys: g
                    .iter()
                    .map(|r| labels.get(r.outcome.as_str()).unwrap_or_default())
                    .collect(),
            })
            .collect();
        log::info!(
            "training CRF ({:?}) on {} sequences, {} labels, {} features",
            self.algorithm,
            seqs.len(),
            layout.n_labels,
            layout.n_features
        );

        let mut params = vec![0.0; layout.len()];
        let (state, iterations) = match self.algorithm {
            CrfAlgorithm::LabelLikelihood => {
                let objective = LabelLikelihood::new(layout, &seqs, self.variance);
                let mut optimizer = Lbfgs::new(objective, LBFGS_HISTORY, self.tolerance);
                self.iterate(&mut optimizer, &mut params)?
            }
            CrfAlgorithm::StochasticGradient => {
                let mut optimizer = StochasticGradient::new(
                    layout,
                    &seqs,
                    self.variance,
                    self.tolerance,
                    self.learning_rate,
                );
                self.iterate(&mut optimizer, &mut params)?
            }
            CrfAlgorithm::ThreadedLabelLikelihood { threads } => {
                std::thread::scope(|scope| {
                    let pool = GradientPool::new(scope, threads, layout, &seqs, self.variance);
                    let mut optimizer = Lbfgs::new(pool, LBFGS_HISTORY, self.tolerance);
                    self.iterate(&mut optimizer, &mut params)
                })?
            }
        };

        let model = CrfModel::new(labels.keys().to_vec(), layout, params)?;
        Ok(TrainedTagger {
            model,
            state,
            iterations,
        })
    }

    /// Runs one optimizer step per iteration until convergence or the iteration limit.
    fn iterate<O>(&self, optimizer: &mut O, params: &mut [f64]) -> Result<(TrainingState, usize)>
    where
        O: Optimizer,
    {
        for i in 0..self.max_iterations {
            let converged = optimizer.optimize_step(params)?;
            log::debug!("iteration {}: objective {:?}", i + 1, optimizer.value());
            if converged {
                log::info!("Training converged after [{}] iterations", i + 1);
                return Ok((TrainingState::Converged, i + 1));
            }
        }
        log::warn!(
            "Training did not converge after [{}] iterations",
            self.max_iterations
        );
        Ok((TrainingState::IterationLimitReached, self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> Vec<Vec<SparseRecord>> {
        let lines = [
            vec!["0\t1:1\t2:1", "1\t1:1\t3:1", "0\t1:1\t2:1"],
            vec!["1\t1:1\t3:1", "0\t1:1\t2:1"],
            vec!["0\t1:1\t2:1", "0\t1:1\t2:1", "1\t1:1\t3:1"],
        ];
        lines
            .iter()
            .map(|g| g.iter().map(|line| line.parse().unwrap()).collect())
            .collect()
    }

    #[test]
    fn test_label_likelihood_converges() {
        let groups = groups();
        let trained = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood)
            .max_iterations(200)
            .train(&groups)
            .unwrap();

        assert_eq!(TrainingState::Converged, trained.state);
        assert!(trained.iterations <= 200);
        for group in &groups {
            let gold: Vec<_> = group.iter().map(|r| r.outcome.clone()).collect();
            assert_eq!(gold, trained.model.predict(group));
        }
    }

    #[test]
    fn test_convergence_is_reproducible() {
        let groups = groups();
        let trainer = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood).max_iterations(200);
        let a = trainer.train(&groups).unwrap();
        let b = trainer.train(&groups).unwrap();

        assert_eq!(a.state, b.state);
        assert_eq!(TrainingState::Converged, a.state);
    }

    #[test]
    fn test_iteration_limit_reached() {
        let groups = groups();
        let trained = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood)
            .max_iterations(1)
            .tolerance(0.0)
            .train(&groups)
            .unwrap();

        assert_eq!(TrainingState::IterationLimitReached, trained.state);
        assert_eq!(1, trained.iterations);
        assert_eq!(3, trained.model.layout().n_features);
    }

    #[test]
    fn test_stochastic_gradient() {
        let groups = groups();
        let trained = TaggerTrainer::new(CrfAlgorithm::StochasticGradient)
            .max_iterations(100)
            .learning_rate(0.5)
            .train(&groups)
            .unwrap();

        for group in &groups {
            let gold: Vec<_> = group.iter().map(|r| r.outcome.clone()).collect();
            assert_eq!(gold, trained.model.predict(group));
        }
    }

    #[test]
    fn test_threaded_matches_serial_state() {
        let groups = groups();
        let serial = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood)
            .max_iterations(200)
            .train(&groups)
            .unwrap();
        let threaded = TaggerTrainer::new(CrfAlgorithm::ThreadedLabelLikelihood { threads: 2 })
            .max_iterations(200)
            .train(&groups)
            .unwrap();

        assert_eq!(serial.state, threaded.state);
        assert_eq!(serial.model.labels(), threaded.model.labels());
        for group in &groups {
            assert_eq!(serial.model.predict(group), threaded.model.predict(group));
        }
    }

    #[test]
    fn test_empty_training_set() {
        let trainer = TaggerTrainer::new(CrfAlgorithm::LabelLikelihood);

        assert!(trainer.train(&[]).is_err());
        assert!(trainer.train(&[vec![]]).is_err());
    }

    #[test]
    fn test_invalid_parameters() {
        let groups = groups();

        assert!(TaggerTrainer::new(CrfAlgorithm::LabelLikelihood)
            .prior_variance(0.0)
            .train(&groups)
            .is_err());
        assert!(
            TaggerTrainer::new(CrfAlgorithm::ThreadedLabelLikelihood { threads: 0 })
                .train(&groups)
                .is_err()
        );
    }
}
