//! Sparse line format and the encoder producing it.
//!
//! A record is written as `OUTCOME[ TOKEN]\t<id>:<value>\t<id>:<value>...`, with ids strictly
//! increasing. Sequences are separated by blank lines.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::errors::{Result, SparseTcError};
use crate::indexer::{FeatureIndex, OutcomeIndex, BIAS_FEATURE, BIAS_ID};
use crate::instance::{FeatureMode, Instance, LearningMode, TextValues};
use crate::utils::{self, MEMORY_SOURCE};

/// Values whose magnitude is below this threshold are not written.
pub const NEAR_ZERO: f64 = 1e-8;

/// One encoded line.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseRecord {
    pub outcome: String,
    pub sequence_token: Option<String>,
    pub entries: Vec<(u32, f64)>,
}

impl fmt::Display for SparseRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.outcome)?;
        if let Some(token) = self.sequence_token.as_ref().filter(|t| !t.is_empty()) {
            write!(f, " {token}")?;
        }
        for (id, value) in &self.entries {
            write!(f, "\t{id}:{value}")?;
        }
        Ok(())
    }
}

impl SparseRecord {
    /// Parses one line.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidFormat`] is returned with `source` and `line` if the line is not
    /// a valid record or its ids are not strictly increasing.
    pub fn parse(s: &str, source: &Path, line: Option<usize>) -> Result<Self> {
        let err = |msg: String| SparseTcError::invalid_format(source, line, msg);
        let mut fields = s.split('\t');
        let head = fields.next().unwrap_or_default();
        let (outcome, sequence_token) = match head.split_once(' ') {
            Some((outcome, token)) => (outcome, Some(token.trim().to_string())),
            None => (head, None),
        };
        if outcome.is_empty() {
            return Err(err("missing outcome".to_string()));
        }
        let mut entries: Vec<(u32, f64)> = vec![];
        for entry in fields.flat_map(str::split_whitespace) {
            let (id, value) = entry
                .split_once(':')
                .ok_or_else(|| err(format!("invalid entry [{entry}]")))?;
            let id = id
                .parse::<u32>()
                .map_err(|_| err(format!("invalid feature id [{id}]")))?;
            let value = value
                .parse::<f64>()
                .map_err(|_| err(format!("invalid value [{value}]")))?;
            if entries.last().map_or(id == 0, |&(prev, _)| id <= prev) {
                return Err(err(format!("feature id [{id}] is not strictly increasing")));
            }
            entries.push((id, value));
        }
        Ok(Self {
            outcome: outcome.to_string(),
            sequence_token,
            entries,
        })
    }
}

impl FromStr for SparseRecord {
    type Err = SparseTcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, Path::new(MEMORY_SOURCE), None)
    }
}

/// Reads a sparse file as groups of records separated by blank lines.
pub fn read_groups<P>(path: P) -> Result<Vec<Vec<SparseRecord>>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut groups = vec![];
    let mut group = vec![];
    for (i, line) in utils::read_lines(path)?.iter().enumerate() {
        if line.trim().is_empty() {
            if !group.is_empty() {
                groups.push(std::mem::take(&mut group));
            }
            continue;
        }
        group.push(SparseRecord::parse(line, path, Some(i + 1))?);
    }
    if !group.is_empty() {
        groups.push(group);
    }
    Ok(groups)
}

/// Reads all records of a sparse file, ignoring group boundaries.
pub fn read_records<P>(path: P) -> Result<Vec<SparseRecord>>
where
    P: AsRef<Path>,
{
    Ok(read_groups(path)?.into_iter().flatten().collect())
}

/// Writes groups of records, separating consecutive groups with a blank line.
pub fn write_groups<W>(mut wtr: W, groups: &[Vec<SparseRecord>]) -> Result<()>
where
    W: Write,
{
    for (i, group) in groups.iter().enumerate() {
        if i != 0 {
            writeln!(wtr)?;
        }
        for record in group {
            writeln!(wtr, "{record}")?;
        }
    }
    Ok(())
}

/// Format-specific settings of the sparse encoding.
///
/// The [`Display`](fmt::Display) form is what datasets and model directories store, and
/// [`SparseFormat::parse()`] restores it, so a custom format survives replay unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseFormat {
    name: String,
    outcome_offset: u32,
    placeholder: String,
    sequence_prefix: Option<String>,
    text_values: TextValues,
}

fn check_word(what: &str, word: &str) -> Result<()> {
    if word.is_empty() || word.contains(char::is_whitespace) || word.contains('=') {
        return Err(SparseTcError::invalid_config(format!(
            "{what} [{word}] must be a non-empty word without `=`"
        )));
    }
    Ok(())
}

impl SparseFormat {
    fn new(name: &str, outcome_offset: u32, placeholder: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome_offset,
            placeholder: placeholder.to_string(),
            sequence_prefix: None,
            text_values: TextValues::default(),
        }
    }

    /// Plain LIBSVM: 0-based outcome codes, placeholder `-1`.
    pub fn libsvm() -> Self {
        Self::new("libsvm", 0, "-1")
    }

    /// SVM-HMM style: 1-based outcome codes, a `qid:<sequence id>` token, placeholder `1`.
    pub fn svm_hmm() -> Self {
        Self {
            sequence_prefix: Some("qid:".to_string()),
            ..Self::new("svmhmm", 1, "1")
        }
    }

    /// A format with its own outcome offset and placeholder. With `sequence_prefix`, every
    /// record carries a `<prefix><sequence id>` token.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if a string is empty or contains
    /// whitespace or `=`.
    pub fn custom(
        name: &str,
        outcome_offset: u32,
        placeholder: &str,
        sequence_prefix: Option<&str>,
    ) -> Result<Self> {
        check_word("format name", name)?;
        check_word("placeholder", placeholder)?;
        if let Some(prefix) = sequence_prefix {
            check_word("sequence prefix", prefix)?;
        }
        Ok(Self {
            sequence_prefix: sequence_prefix.map(str::to_string),
            ..Self::new(name, outcome_offset, placeholder)
        })
    }

    /// Looks up a preset by name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "libsvm" => Ok(Self::libsvm()),
            "svmhmm" => Ok(Self::svm_hmm()),
            _ => Err(SparseTcError::invalid_config(format!(
                "unknown sparse format [{name}]"
            ))),
        }
    }

    /// Parses the stored form, `<name> offset=<n> placeholder=<p> [token=<prefix>] text=<t>`.
    /// A bare preset name is accepted too.
    pub fn parse(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| SparseTcError::invalid_config("empty sparse format"))?;
        let mut format = Self::new(name, 0, "-1");
        let mut has_settings = false;
        for word in words {
            let err = || SparseTcError::invalid_config(format!("invalid format setting [{word}]"));
            let (key, value) = word.split_once('=').ok_or_else(err)?;
            match key {
                "offset" => format.outcome_offset = value.parse().map_err(|_| err())?,
                "placeholder" => {
                    check_word("placeholder", value)?;
                    format.placeholder = value.to_string();
                }
                "token" => {
                    check_word("sequence prefix", value)?;
                    format.sequence_prefix = Some(value.to_string());
                }
                "text" => {
                    format.text_values = match value {
                        "indicator" => TextValues::Indicator,
                        "numeric" => TextValues::Numeric,
                        _ => return Err(err()),
                    }
                }
                _ => return Err(err()),
            }
            has_settings = true;
        }
        if !has_settings {
            return Self::from_name(name);
        }
        Ok(format)
    }

    pub fn with_text_values(mut self, text_values: TextValues) -> Self {
        self.text_values = text_values;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn outcome_offset(&self) -> u32 {
        self.outcome_offset
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub const fn text_values(&self) -> TextValues {
        self.text_values
    }

    fn token(&self, instance: &Instance) -> Option<String> {
        self.sequence_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}{}", instance.sequence_id))
    }
}

impl fmt::Display for SparseFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} offset={} placeholder={}",
            self.name, self.outcome_offset, self.placeholder
        )?;
        if let Some(prefix) = &self.sequence_prefix {
            write!(f, " token={prefix}")?;
        }
        let text = match self.text_values {
            TextValues::Indicator => "indicator",
            TextValues::Numeric => "numeric",
        };
        write!(f, " text={text}")
    }
}

/// Encodes ordered instances, starting a new group whenever the sequence id changes in
/// sequence mode. Other modes produce a single group.
pub(crate) fn encode_groups<F>(
    instances: &[Instance],
    mode: FeatureMode,
    mut encode: F,
) -> Result<Vec<Vec<SparseRecord>>>
where
    F: FnMut(&Instance) -> Result<SparseRecord>,
{
    let mut groups: Vec<Vec<SparseRecord>> = vec![];
    let mut prev_sequence = None;
    for instance in instances {
        let record = encode(instance)?;
        let new_group = mode.is_sequence() && prev_sequence != Some(instance.sequence_id);
        match groups.last_mut() {
            Some(group) if !new_group => group.push(record),
            _ => groups.push(vec![record]),
        }
        prev_sequence = Some(instance.sequence_id);
    }
    Ok(groups)
}

/// What to do with a feature that the feature index does not know.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnknownFeatures {
    /// Fail with [`SparseTcError::UnknownFeature`].
    Reject,

    /// Leave the feature out of the record.
    Drop,
}

/// Encodes the features of an instance as sorted `(id, value)` pairs, the bias first.
pub fn encode_features(
    instance: &Instance,
    features: &FeatureIndex,
    text_values: TextValues,
    unknown: UnknownFeatures,
) -> Result<Vec<(u32, f64)>> {
    let mut entries = vec![(BIAS_ID, 1.0)];
    for (name, value) in instance.feature_map() {
        if name == BIAS_FEATURE {
            continue;
        }
        let id = match (features.get(name), unknown) {
            (Some(id), _) => id,
            (None, UnknownFeatures::Reject) => return Err(SparseTcError::unknown_feature(name)),
            (None, UnknownFeatures::Drop) => {
                log::debug!("dropping unseen feature [{name}]");
                continue;
            }
        };
        let value = value.to_f64(name, text_values)?;
        if value.abs() < NEAR_ZERO {
            continue;
        }
        entries.push((id, value));
    }
    entries.sort_unstable_by_key(|&(id, _)| id);
    Ok(entries)
}

/// Converts instances to [`SparseRecord`]s with fixed mappings.
pub struct SparseEncoder<'a> {
    features: &'a FeatureIndex,
    outcomes: &'a OutcomeIndex,
    format: &'a SparseFormat,
    mode: LearningMode,
    unknown: UnknownFeatures,
}

impl<'a> SparseEncoder<'a> {
    pub fn new(
        features: &'a FeatureIndex,
        outcomes: &'a OutcomeIndex,
        format: &'a SparseFormat,
        mode: LearningMode,
    ) -> Result<Self> {
        mode.ensure_supported()?;
        Ok(Self {
            features,
            outcomes,
            format,
            mode,
            unknown: UnknownFeatures::Reject,
        })
    }

    pub const fn unknown_features(mut self, unknown: UnknownFeatures) -> Self {
        self.unknown = unknown;
        self
    }

    /// Returns the outcome code of an instance.
    ///
    /// In regression mode the outcome must be a number and is written unchanged.
    pub fn outcome_code(&self, outcome: &str) -> Result<String> {
        if self.mode.is_regression() {
            let trimmed = outcome.trim();
            trimmed.parse::<f64>().map_err(|_| {
                SparseTcError::invalid_format(
                    Path::new(MEMORY_SOURCE),
                    None,
                    format!("regression outcome [{outcome}] is not a number"),
                )
            })?;
            return Ok(trimmed.to_string());
        }
        self.outcomes
            .get(outcome)
            .map(|code| code.to_string())
            .ok_or_else(|| {
                SparseTcError::invalid_config(format!(
                    "outcome [{outcome}] is not in the outcome index"
                ))
            })
    }

    pub fn encode(&self, instance: &Instance) -> Result<SparseRecord> {
        Ok(SparseRecord {
            outcome: self.outcome_code(&instance.outcome)?,
            sequence_token: self.format.token(instance),
            entries: encode_features(
                instance,
                self.features,
                self.format.text_values,
                self.unknown,
            )?,
        })
    }

    /// Encodes an instance whose outcome is unknown.
    ///
    /// Unseen features are dropped and the placeholder of the format takes the outcome slot.
    pub fn encode_unlabeled(&self, instance: &Instance) -> Result<SparseRecord> {
        Ok(SparseRecord {
            outcome: self.format.placeholder.clone(),
            sequence_token: self.format.token(instance),
            entries: encode_features(
                instance,
                self.features,
                self.format.text_values,
                UnknownFeatures::Drop,
            )?,
        })
    }
}
