//! Replays a trained model's numbering on new instances.

use std::path::Path;

use crate::errors::{Result, SparseTcError};
use crate::indexer::{FeatureIndex, OutcomeIndex, FEATURE_MAPPING_FILE, OUTCOME_MAPPING_FILE};
use crate::instance::{Instance, LearningMode};
use crate::sparse::{SparseEncoder, SparseFormat, SparseRecord};
use crate::utils::MEMORY_SOURCE;

/// Loads the feature and outcome tables of a model or dataset directory.
///
/// In regression mode no outcome table is read and the returned index is empty.
///
/// # Errors
///
/// [`SparseTcError::InvalidConfig`] is returned if a mandatory table is missing.
pub fn load_mapping<P>(dir: P, mode: LearningMode) -> Result<(FeatureIndex, OutcomeIndex)>
where
    P: AsRef<Path>,
{
    mode.ensure_supported()?;
    let dir = dir.as_ref();
    let feature_path = dir.join(FEATURE_MAPPING_FILE);
    if !feature_path.exists() {
        return Err(SparseTcError::invalid_config(format!(
            "feature mapping {} is missing",
            feature_path.display()
        )));
    }
    let features = FeatureIndex::read(feature_path)?;
    let outcomes = if mode.is_regression() {
        OutcomeIndex::build(std::iter::empty::<&str>(), mode, 0)?
    } else {
        let outcome_path = dir.join(OUTCOME_MAPPING_FILE);
        if !outcome_path.exists() {
            return Err(SparseTcError::invalid_config(format!(
                "outcome mapping {} is missing",
                outcome_path.display()
            )));
        }
        OutcomeIndex::read(outcome_path)?
    };
    Ok((features, outcomes))
}

/// Fails unless a predictor returned one prediction per submitted instance.
pub fn check_prediction_count(submitted: usize, predicted: usize) -> Result<()> {
    if submitted == predicted {
        Ok(())
    } else {
        Err(SparseTcError::count_mismatch(
            "predictions",
            submitted,
            predicted,
        ))
    }
}

/// Parses a predicted class code, accepting integral floats such as `2.0`.
fn parse_code(raw: &str) -> Option<u32> {
    let s = raw.trim();
    if let Ok(code) = s.parse::<u32>() {
        return Some(code);
    }
    let v = s.parse::<f64>().ok()?;
    if v.fract() == 0.0 && v >= 0.0 && v <= f64::from(u32::MAX) {
        Some(v as u32)
    } else {
        None
    }
}

/// Encoder and decoder bound to the persisted mappings of a trained model.
#[derive(Clone, Debug)]
pub struct ReplayDecoder {
    features: FeatureIndex,
    outcomes: OutcomeIndex,
    mode: LearningMode,
}

impl ReplayDecoder {
    pub fn new(features: FeatureIndex, outcomes: OutcomeIndex, mode: LearningMode) -> Result<Self> {
        mode.ensure_supported()?;
        Ok(Self {
            features,
            outcomes,
            mode,
        })
    }

    pub fn load<P>(dir: P, mode: LearningMode) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let (features, outcomes) = load_mapping(dir, mode)?;
        Self::new(features, outcomes, mode)
    }

    pub const fn features(&self) -> &FeatureIndex {
        &self.features
    }

    pub const fn outcomes(&self) -> &OutcomeIndex {
        &self.outcomes
    }

    pub const fn learning_mode(&self) -> LearningMode {
        self.mode
    }

    /// Encodes an instance with the training-time numbering.
    ///
    /// Features unknown to the model are dropped and the format's placeholder takes the
    /// outcome slot.
    pub fn encode_for_prediction(
        &self,
        instance: &Instance,
        format: &SparseFormat,
    ) -> Result<SparseRecord> {
        SparseEncoder::new(&self.features, &self.outcomes, format, self.mode)?
            .encode_unlabeled(instance)
    }

    /// Converts a predicted code back to an outcome label.
    ///
    /// Regression predictions are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::Alignment`] is returned if the code is not in the outcome index, and
    /// [`SparseTcError::InvalidFormat`] if it is not a class code at all.
    pub fn decode_prediction(&self, raw: &str) -> Result<String> {
        if self.mode.is_regression() {
            return Ok(raw.to_string());
        }
        let code = parse_code(raw).ok_or_else(|| {
            SparseTcError::invalid_format(
                Path::new(MEMORY_SOURCE),
                None,
                format!("[{raw}] is not a class code"),
            )
        })?;
        self.outcomes
            .label(code)
            .map(str::to_string)
            .ok_or_else(|| {
                SparseTcError::misaligned(
                    "outcome code",
                    format!("the model predicted [{raw}], which is not in the outcome index"),
                )
            })
    }

    /// Decodes a whole prediction list after checking it against the number of instances.
    pub fn decode_all<S>(&self, submitted: usize, raw: &[S]) -> Result<Vec<String>>
    where
        S: AsRef<str>,
    {
        check_prediction_count(submitted, raw.len())?;
        raw.iter()
            .map(|code| self.decode_prediction(code.as_ref()))
            .collect()
    }
}
