use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SparseTcError};
use crate::utils::MEMORY_SOURCE;

/// Sequence id shared by all instances outside of sequence mode.
pub const DEFAULT_SEQUENCE_ID: u32 = 0;

/// Value of a named feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Encoding of string feature values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TextValues {
    /// A numeric literal yields its value, anything else `1.0`.
    #[default]
    Indicator,

    /// The string must be a numeric literal.
    Numeric,
}

impl FeatureValue {
    /// Converts the value to the number written to a sparse file.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidFormat`] is returned if the value is a non-finite number, or if
    /// `text_values` is [`TextValues::Numeric`] and the value is a string that is not a finite
    /// numeric literal. `NaN` and `inf` strings are not numeric literals.
    pub fn to_f64(&self, name: &str, text_values: TextValues) -> Result<f64> {
        let invalid = |v: &dyn fmt::Display, what: &str| {
            SparseTcError::invalid_format(
                Path::new(MEMORY_SOURCE),
                None,
                format!("Feature [{name}] has a {what} value [{v}]"),
            )
        };
        match self {
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Number(v) if v.is_finite() => Ok(*v),
            Self::Number(v) => Err(invalid(v, "non-finite")),
            Self::Text(s) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ if text_values == TextValues::Indicator => Ok(1.0),
                _ => Err(invalid(s, "non-numeric")),
            },
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub value: FeatureValue,
}

impl Feature {
    pub fn new<S, V>(name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<FeatureValue>,
    {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One classification unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub features: Vec<Feature>,
    pub outcome: String,

    #[serde(default)]
    pub sequence_id: u32,

    #[serde(default)]
    pub sequence_position: u32,

    /// Identifier of the source document or unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Instance {
    pub fn new<S>(outcome: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            features: vec![],
            outcome: outcome.into(),
            sequence_id: DEFAULT_SEQUENCE_ID,
            sequence_position: 0,
            id: None,
        }
    }

    pub fn feature<S, V>(mut self, name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<FeatureValue>,
    {
        self.features.push(Feature::new(name, value));
        self
    }

    pub fn sequence(mut self, sequence_id: u32, sequence_position: u32) -> Self {
        self.sequence_id = sequence_id;
        self.sequence_position = sequence_position;
        self
    }

    pub fn id<S>(mut self, id: S) -> Self
    where
        S: Into<String>,
    {
        self.id = Some(id.into());
        self
    }

    /// Returns the features keyed by name. A name given twice keeps its last value.
    pub fn feature_map(&self) -> BTreeMap<&str, &FeatureValue> {
        self.features
            .iter()
            .map(|f| (f.name.as_str(), &f.value))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LearningMode {
    SingleLabel,
    MultiLabel,
    Regression,
}

impl LearningMode {
    pub const fn is_regression(self) -> bool {
        matches!(self, Self::Regression)
    }

    /// Fails on modes no component implements.
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::MultiLabel => Err(SparseTcError::invalid_config(
                "multi-label mode is not supported",
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for LearningMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "singleLabel" => Ok(Self::SingleLabel),
            "multiLabel" => Ok(Self::MultiLabel),
            "regression" => Ok(Self::Regression),
            _ => Err("Could not parse a learning mode value"),
        }
    }
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::SingleLabel => "singleLabel",
            Self::MultiLabel => "multiLabel",
            Self::Regression => "regression",
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeatureMode {
    Document,
    Unit,
    Sequence,
    Pair,
}

impl FeatureMode {
    pub const fn is_sequence(self) -> bool {
        matches!(self, Self::Sequence)
    }
}

impl FromStr for FeatureMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "unit" => Ok(Self::Unit),
            "sequence" => Ok(Self::Sequence),
            "pair" => Ok(Self::Pair),
            _ => Err("Could not parse a feature mode value"),
        }
    }
}

impl fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Unit => "unit",
            Self::Sequence => "sequence",
            Self::Pair => "pair",
        })
    }
}

/// Orders instances for writing.
///
/// In sequence mode instances are grouped by sequence id, in order of first appearance, and
/// sorted by position inside each group. Other modes keep the input order.
pub fn order_instances(instances: &mut [Instance], mode: FeatureMode) {
    if !mode.is_sequence() {
        return;
    }
    let mut first_seen = hashbrown::HashMap::new();
    for (i, instance) in instances.iter().enumerate() {
        first_seen.entry(instance.sequence_id).or_insert(i);
    }
    instances.sort_by_key(|instance| {
        (
            first_seen[&instance.sequence_id],
            instance.sequence_position,
        )
    });
}
