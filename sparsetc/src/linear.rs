//! Linear classifier backend.
//!
//! Training goes through LIBLINEAR. The trained weights are copied into a [`LinearModel`],
//! which predicts without the C library.

use std::str::FromStr;

use bincode::{Decode, Encode};

use crate::errors::{Result, SparseTcError};

#[cfg(feature = "train")]
use crate::{instance::LearningMode, sparse::SparseRecord, utils::MEMORY_SOURCE};

/// LIBLINEAR solver used by [`LinearTrainer`](crate::LinearTrainer).
///
/// Solvers 0 to 7 train classifiers and need a single-label dataset. Solvers 11 to 13 fit a
/// regressor and need a regression dataset. The trainer rejects any other pairing.
///
/// Parsed from LIBLINEAR's `-s` number or from its short name, e.g. `1` or `l2r_l2loss_svc_dual`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SolverType {
    /// `l2r_lr`: logistic regression, the only classifier whose decision values are
    /// probabilities.
    L2RegularizedLogistic = 0,

    /// `l2r_l2loss_svc_dual`: the default.
    L2RegularizedL2LossSVCDual = 1,

    L2RegularizedL2LossSVC = 2,
    L2RegularizedL1LossSVCDual = 3,

    /// `mcsvm_cs`: one joint multi-class problem instead of one-vs-rest.
    CrammerSingerSVC = 4,

    /// `l1r_l2loss_svc`: L1 regularization gives sparse weights, which keeps dumped models small.
    L1RegularizedL2LossSVC = 5,

    /// `l1r_lr`: sparse weights, as with solver 5.
    L1RegularizedLogistic = 6,

    L2RegularizedLogisticDual = 7,

    /// `l2r_l2loss_svr`: regression datasets only, as are 12 and 13.
    L2RegularizedL2LossSVR = 11,

    L2RegularizedL2LossSVRDual = 12,
    L2RegularizedL1LossSVRDual = 13,
}

const SOLVER_NAMES: [(SolverType, &str); 11] = [
    (SolverType::L2RegularizedLogistic, "l2r_lr"),
    (SolverType::L2RegularizedL2LossSVCDual, "l2r_l2loss_svc_dual"),
    (SolverType::L2RegularizedL2LossSVC, "l2r_l2loss_svc"),
    (SolverType::L2RegularizedL1LossSVCDual, "l2r_l1loss_svc_dual"),
    (SolverType::CrammerSingerSVC, "mcsvm_cs"),
    (SolverType::L1RegularizedL2LossSVC, "l1r_l2loss_svc"),
    (SolverType::L1RegularizedLogistic, "l1r_lr"),
    (SolverType::L2RegularizedLogisticDual, "l2r_lr_dual"),
    (SolverType::L2RegularizedL2LossSVR, "l2r_l2loss_svr"),
    (SolverType::L2RegularizedL2LossSVRDual, "l2r_l2loss_svr_dual"),
    (SolverType::L2RegularizedL1LossSVRDual, "l2r_l1loss_svr_dual"),
];

impl SolverType {
    /// Whether the solver fits a regressor.
    pub const fn is_regression(self) -> bool {
        matches!(
            self,
            Self::L2RegularizedL2LossSVR
                | Self::L2RegularizedL2LossSVRDual
                | Self::L2RegularizedL1LossSVRDual
        )
    }

    pub fn name(self) -> &'static str {
        SOLVER_NAMES
            .iter()
            .find(|(solver, _)| *solver == self)
            .map_or("", |(_, name)| name)
    }
}

impl FromStr for SolverType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SOLVER_NAMES
            .iter()
            .find(|&&(solver, name)| name == s || (solver as u8).to_string() == s)
            .map(|&(solver, _)| solver)
            .ok_or("Unsupported solver type.")
    }
}

#[cfg(feature = "train")]
impl From<SolverType> for liblinear::SolverType {
    fn from(solver: SolverType) -> Self {
        match solver {
            SolverType::L2RegularizedLogistic => Self::L2R_LR,
            SolverType::L2RegularizedL2LossSVCDual => Self::L2R_L2LOSS_SVC_DUAL,
            SolverType::L2RegularizedL2LossSVC => Self::L2R_L2LOSS_SVC,
            SolverType::L2RegularizedL1LossSVCDual => Self::L2R_L1LOSS_SVC_DUAL,
            SolverType::CrammerSingerSVC => Self::MCSVM_CS,
            SolverType::L1RegularizedL2LossSVC => Self::L1R_L2LOSS_SVC,
            SolverType::L1RegularizedLogistic => Self::L1R_LR,
            SolverType::L2RegularizedLogisticDual => Self::L2R_LR_DUAL,
            SolverType::L2RegularizedL2LossSVR => Self::L2R_L2LOSS_SVR,
            SolverType::L2RegularizedL2LossSVRDual => Self::L2R_L2LOSS_SVR_DUAL,
            SolverType::L2RegularizedL1LossSVRDual => Self::L2R_L1LOSS_SVR_DUAL,
        }
    }
}

/// Weights of a trained linear classifier or regressor.
///
/// `weights[i][fid - 1]` is the coefficient of feature `fid` for `labels[i]`. A regression model
/// has one weight vector and no labels.
#[derive(Clone, Debug, Decode, Encode, PartialEq)]
pub struct LinearModel {
    labels: Vec<i32>,
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl LinearModel {
    /// Creates a model from raw weights.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidModel`] is returned if the shapes disagree.
    pub fn new(labels: Vec<i32>, weights: Vec<Vec<f64>>, biases: Vec<f64>) -> Result<Self> {
        let n_vectors = labels.len().max(1);
        if weights.len() != n_vectors || biases.len() != n_vectors {
            return Err(SparseTcError::invalid_model(format!(
                "expected {n_vectors} weight vectors, got {} weights and {} biases",
                weights.len(),
                biases.len()
            )));
        }
        if weights.iter().any(|w| w.len() != weights[0].len()) {
            return Err(SparseTcError::invalid_model(
                "weight vectors differ in length",
            ));
        }
        Ok(Self {
            labels,
            weights,
            biases,
        })
    }

    pub fn is_regression(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// Weight vectors, one per label. `weights()[i][fid - 1]` belongs to feature `fid`.
    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    /// Number of features the model was trained with.
    pub fn n_features(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn decision_value(&self, i: usize, entries: &[(u32, f64)]) -> f64 {
        let w = &self.weights[i];
        let mut score = self.biases[i];
        for &(fid, value) in entries {
            if let Some(weight) = usize::try_from(fid)
                .ok()
                .and_then(|fid| fid.checked_sub(1))
                .and_then(|idx| w.get(idx))
            {
                score += weight * value;
            }
        }
        score
    }

    /// Decision values of all labels, or the single regression value.
    pub fn decision_values(&self, entries: &[(u32, f64)]) -> Vec<f64> {
        (0..self.weights.len())
            .map(|i| self.decision_value(i, entries))
            .collect()
    }

    /// Predicts the outcome code of a record, or the target value in regression.
    ///
    /// Ties go to the label with the lowest index.
    pub fn predict(&self, entries: &[(u32, f64)]) -> f64 {
        let scores = self.decision_values(entries);
        if self.is_regression() {
            return scores[0];
        }
        let mut best = 0;
        for (i, &score) in scores.iter().enumerate().skip(1) {
            if score > scores[best] {
                best = i;
            }
        }
        f64::from(self.labels[best])
    }
}

/// Hyperparameters of [`LinearTrainer`].
#[derive(Clone, Copy, Debug)]
pub struct LinearParams {
    pub solver: SolverType,
    pub epsilon: f64,
    pub cost: f64,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            solver: SolverType::L2RegularizedL2LossSVCDual,
            epsilon: 0.01,
            cost: 1.0,
        }
    }
}

/// Trains a [`LinearModel`] with LIBLINEAR.
#[cfg(feature = "train")]
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub struct LinearTrainer {
    params: LinearParams,
}

#[cfg(feature = "train")]
impl LinearTrainer {
    pub const fn new(params: LinearParams) -> Self {
        Self { params }
    }

    /// Trains on encoded records.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if the records are empty or the solver does
    /// not match `mode`. [`SparseTcError::InvalidModel`] is returned if LIBLINEAR fails.
    pub fn train(&self, records: &[SparseRecord], mode: LearningMode) -> Result<LinearModel> {
        use liblinear::LibLinearModel;

        mode.ensure_supported()?;
        if records.is_empty() {
            return Err(SparseTcError::invalid_config("no training records"));
        }
        if self.params.solver.is_regression() != mode.is_regression() {
            return Err(SparseTcError::invalid_config(format!(
                "solver {:?} cannot be used in {mode} mode",
                self.params.solver
            )));
        }

        let mut ys = Vec::with_capacity(records.len());
        let mut xs = Vec::with_capacity(records.len());
        for record in records {
            let y = record.outcome.parse::<f64>().map_err(|_| {
                SparseTcError::invalid_format(
                    std::path::Path::new(MEMORY_SOURCE),
                    None,
                    format!("outcome [{}] is not numeric", record.outcome),
                )
            })?;
            ys.push(y);
            xs.push(record.entries.clone());
        }

        log::info!(
            "training {} on {} records",
            self.params.solver.name(),
            records.len()
        );
        liblinear::toggle_liblinear_stdout_output(false);
        let mut builder = liblinear::Builder::new();
        let training_input = liblinear::util::TrainingInput::from_sparse_features(ys, xs)
            .map_err(|e| SparseTcError::invalid_model(format!("liblinear error: {e:?}")))?;
        builder.problem().input_data(training_input);
        builder
            .parameters()
            .solver_type(self.params.solver.into())
            .stopping_criterion(self.params.epsilon)
            .constraints_violation_cost(self.params.cost);
        let model = builder.build_model();
        liblinear::toggle_liblinear_stdout_output(true);
        let model = model.map_err(|e| SparseTcError::invalid_model(e.to_string()))?;

        let labels = if mode.is_regression() {
            vec![]
        } else {
            model.labels().to_vec()
        };
        let n_features = model.num_features();
        let mut weights = vec![];
        let mut biases = vec![];
        for i in 0..labels.len().max(1) {
            let label_idx = i32::try_from(i)?;
            let mut w = Vec::with_capacity(n_features);
            for fid in 0..n_features {
                w.push(model.feature_coefficient(i32::try_from(fid + 1)?, label_idx));
            }
            weights.push(w);
            biases.push(0.0);
        }
        LinearModel::new(labels, weights, biases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_type_from_str() {
        assert_eq!(Ok(SolverType::L2RegularizedLogistic), "0".parse());
        assert_eq!(Ok(SolverType::L2RegularizedL1LossSVRDual), "13".parse());
        assert_eq!(Ok(SolverType::CrammerSingerSVC), "mcsvm_cs".parse());
        assert_eq!("l2r_l2loss_svc_dual", SolverType::L2RegularizedL2LossSVCDual.name());
        assert!("8".parse::<SolverType>().is_err());
        assert!(SolverType::L2RegularizedL2LossSVR.is_regression());
        assert!(!SolverType::CrammerSingerSVC.is_regression());
    }

    #[test]
    fn test_predict_argmax() {
        let model = LinearModel::new(
            vec![1, 0],
            vec![vec![1.0, -1.0, 0.0], vec![-1.0, 1.0, 0.0]],
            vec![0.0, 0.0],
        )
        .unwrap();

        assert_eq!(1.0, model.predict(&[(1, 1.0), (2, 0.5)]));
        assert_eq!(0.0, model.predict(&[(1, 1.0), (2, 3.0)]));
    }

    #[test]
    fn test_predict_tie_lowest_index() {
        let model = LinearModel::new(vec![2, 0], vec![vec![0.5], vec![0.5]], vec![0.0, 0.0])
            .unwrap();

        assert_eq!(2.0, model.predict(&[(1, 1.0)]));
    }

    #[test]
    fn test_predict_ignores_unknown_ids() {
        let model = LinearModel::new(vec![], vec![vec![2.0, 3.0]], vec![0.5]).unwrap();

        assert!(model.is_regression());
        assert_eq!(2.5, model.predict(&[(1, 1.0), (9, 4.0)]));
    }

    #[test]
    fn test_invalid_shape() {
        assert!(LinearModel::new(vec![0, 1], vec![vec![1.0]], vec![0.0]).is_err());
        assert!(LinearModel::new(vec![], vec![vec![1.0], vec![1.0, 2.0]], vec![0.0, 0.0]).is_err());
    }

    #[cfg(feature = "train")]
    #[test]
    fn test_train_separable() {
        let records: Vec<SparseRecord> = [
            "0\t1:1\t2:1",
            "0\t1:1\t2:1",
            "0\t1:1\t2:1",
            "1\t1:1\t3:1",
            "1\t1:1\t3:1",
            "1\t1:1\t3:1",
        ]
        .iter()
        .map(|line| line.parse().unwrap())
        .collect();
        let trainer = LinearTrainer::new(LinearParams::default());
        let model = trainer.train(&records, LearningMode::SingleLabel).unwrap();

        assert_eq!(3, model.n_features());
        assert_eq!(0.0, model.predict(&[(1, 1.0), (2, 1.0)]));
        assert_eq!(1.0, model.predict(&[(1, 1.0), (3, 1.0)]));
    }

    #[cfg(feature = "train")]
    #[test]
    fn test_train_solver_mode_mismatch() {
        let records = vec!["0.5\t1:1".parse().unwrap()];
        let params = LinearParams {
            solver: SolverType::L2RegularizedLogistic,
            ..LinearParams::default()
        };

        assert!(LinearTrainer::new(params)
            .train(&records, LearningMode::Regression)
            .is_err());
    }
}
