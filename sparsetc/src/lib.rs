#![cfg_attr(docsrs, feature(doc_cfg))]

//! # sparsetc
//!
//! sparsetc turns feature-extracted instances into sparse numeric training files, trains
//! linear classifiers and linear-chain CRF taggers on them, and maps predictions back to the
//! original labels.
//!
//! ## Examples
//!
//! ```no_run
//! use sparsetc::{
//!     DatasetConfig, DatasetWriter, FeatureIndex, FeatureMode, Instance, LearningMode,
//!     OutcomeIndex, SparseFormat,
//! };
//!
//! let config = DatasetConfig::new(
//!     LearningMode::SingleLabel,
//!     FeatureMode::Document,
//!     SparseFormat::libsvm(),
//! );
//! let writer = DatasetWriter::new("train", config).unwrap();
//! writer
//!     .append_batch(&[
//!         Instance::new("pos").feature("tok=good", 1.0),
//!         Instance::new("neg").feature("tok=bad", 1.0),
//!     ])
//!     .unwrap();
//!
//! let vocab = writer.collect_vocabulary().unwrap();
//! let features = FeatureIndex::build(&vocab.features).unwrap();
//! let outcomes = OutcomeIndex::build(&vocab.outcomes, LearningMode::SingleLabel, 0).unwrap();
//! writer.transform(&features, &outcomes).unwrap();
//! ```
//!
//! Training linear models requires **crate feature** `train`. For more details, see
//! [`LinearTrainer`]. CRF taggers are always available, see [`crf::TaggerTrainer`].

mod utils;

mod dataset;
pub mod errors;
mod evaluation;
mod indexer;
mod instance;
mod linear;
mod model;
mod prediction;
mod replay;
mod sparse;

pub mod crf;

#[cfg(test)]
mod test_utils;

pub use dataset::{
    DatasetConfig, DatasetInfo, DatasetSummary, DatasetWriter, Vocabulary, DATASET_FILE,
    FEATURE_FILE, INSTANCE_ID_FILE, STAGING_FILE,
};
pub use evaluation::{
    evaluate, evaluate_predictions, Evaluation, FoldAverage, LabelScores, RegressionEvaluation,
};
pub use indexer::{
    FeatureIndex, OutcomeIndex, BIAS_FEATURE, BIAS_ID, FEATURE_MAPPING_FILE,
    OUTCOME_MAPPING_FILE,
};
pub use instance::{
    order_instances, Feature, FeatureMode, FeatureValue, Instance, LearningMode, TextValues,
};
pub use linear::{LinearModel, LinearParams, SolverType};
pub use model::{
    Backend, Classifier, ModelDir, TrainedModel, FEATURE_MODE_FILE, FORMAT_FILE,
    LEARNING_MODE_FILE, META_FILE, MODEL_FILE,
};
pub use prediction::{
    read_instance_ids, read_predictions, write_id2outcome, write_predictions, Prediction,
    ID2OUTCOME_FILE, PREDICTION_FILE,
};
pub use replay::{check_prediction_count, load_mapping, ReplayDecoder};
pub use sparse::{
    encode_features, read_groups, read_records, write_groups, SparseEncoder, SparseFormat,
    SparseRecord, UnknownFeatures, NEAR_ZERO,
};

#[cfg(feature = "train")]
pub use linear::LinearTrainer;
