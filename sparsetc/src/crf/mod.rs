//! Linear-chain CRF sequence tagger.

mod likelihood;
mod model;
mod optimizer;
mod pool;
mod trainer;

use std::fmt;
use std::str::FromStr;

pub use likelihood::{LabelLikelihood, LabeledSequence, Objective};
pub use model::{CrfModel, Layout};
pub use optimizer::{Lbfgs, Optimizer, StochasticGradient};
pub use pool::GradientPool;
pub use trainer::{TaggerTrainer, TrainedTagger, TrainingState};

/// Training strategy. All strategies optimize the same objective.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrfAlgorithm {
    /// Full-batch L-BFGS.
    LabelLikelihood,

    /// One pass of per-sequence updates per iteration.
    StochasticGradient,

    /// Full-batch L-BFGS with the gradient computed by a worker pool.
    ThreadedLabelLikelihood { threads: usize },
}

impl FromStr for CrfAlgorithm {
    type Err = &'static str;

    /// Parses `CRF_LabelLikelihood`, `CRF_StochasticGradient` or
    /// `CRF_LabelLikelihood_multiThreaded`. The threaded variant uses one worker per available
    /// core.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRF_LabelLikelihood" => Ok(Self::LabelLikelihood),
            "CRF_StochasticGradient" => Ok(Self::StochasticGradient),
            "CRF_LabelLikelihood_multiThreaded" => Ok(Self::ThreadedLabelLikelihood {
                threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            }),
            _ => Err("Could not parse a CRF algorithm"),
        }
    }
}

impl fmt::Display for CrfAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::LabelLikelihood => "CRF_LabelLikelihood",
            Self::StochasticGradient => "CRF_StochasticGradient",
            Self::ThreadedLabelLikelihood { .. } => "CRF_LabelLikelihood_multiThreaded",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(Ok(CrfAlgorithm::LabelLikelihood), "CRF_LabelLikelihood".parse());
        assert_eq!(
            Ok(CrfAlgorithm::StochasticGradient),
            "CRF_StochasticGradient".parse()
        );
        assert!(matches!(
            "CRF_LabelLikelihood_multiThreaded".parse::<CrfAlgorithm>(),
            Ok(CrfAlgorithm::ThreadedLabelLikelihood { threads }) if threads >= 1
        ));
        assert!("HMM".parse::<CrfAlgorithm>().is_err());
    }
}
