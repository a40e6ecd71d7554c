use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::io::Write;
use std::path::Path;

use hashbrown::HashMap;

use crate::errors::{Result, SparseTcError};
use crate::instance::{Instance, LearningMode};
use crate::utils::{self, MEMORY_SOURCE};

/// Name of the synthetic feature that is active in every record.
pub const BIAS_FEATURE: &str = "x.BIAS";

/// Id reserved for [`BIAS_FEATURE`].
pub const BIAS_ID: u32 = 1;

pub const FEATURE_MAPPING_FILE: &str = "featureNameMapping.txt";
pub const OUTCOME_MAPPING_FILE: &str = "outcome-mapping.txt";

/// Assigns consecutive ids to keys in first-encounter order.
#[derive(Clone, Debug)]
pub struct Indexer<K> {
    ids: HashMap<K, usize>,
    keys: Vec<K>,
}

impl<K> Default for Indexer<K> {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            keys: vec![],
        }
    }
}

impl<K> Indexer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_id<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + ToOwned<Owned = K> + Eq + Hash,
    {
        if let Some(&id) = self.ids.get(key) {
            id
        } else {
            let id = self.keys.len();
            self.keys.push(key.to_owned());
            self.ids.insert(key.to_owned(), id);
            id
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        self.ids.get(key).copied()
    }

    pub fn key(&self, id: usize) -> Option<&K> {
        self.keys.get(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

fn check_persistable(name: &str, what: &str) -> Result<()> {
    if name.contains(['\t', '\n', '\r']) {
        return Err(SparseTcError::invalid_format(
            Path::new(MEMORY_SOURCE),
            None,
            format!("{what} [{}] contains a tab or a line break", name.escape_debug()),
        ));
    }
    Ok(())
}

/// Parses `key\tid` lines into `(key, id)` pairs sorted by id.
fn read_table(path: &Path) -> Result<Vec<(String, u32)>> {
    let mut pairs = vec![];
    for (i, line) in utils::read_lines(path)?.into_iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        let (key, id) = line.rsplit_once('\t').ok_or_else(|| {
            SparseTcError::invalid_format(path, Some(i + 1), "expected `name<TAB>id`")
        })?;
        let id = id.trim().parse::<u32>().map_err(|_| {
            SparseTcError::invalid_format(path, Some(i + 1), format!("invalid id [{id}]"))
        })?;
        pairs.push((key.to_string(), id));
    }
    pairs.sort_by_key(|&(_, id)| id);
    Ok(pairs)
}

/// Verifies that the ids of `pairs` are `first, first + 1, ...`.
fn check_contiguous(path: &Path, pairs: &[(String, u32)], first: u32) -> Result<()> {
    for (expected, (key, id)) in (first..).zip(pairs) {
        if *id != expected {
            return Err(SparseTcError::invalid_format(
                path,
                None,
                format!("[{key}] has id [{id}], expected [{expected}]"),
            ));
        }
    }
    Ok(())
}

/// Feature name to id mapping.
///
/// Id 1 is [`BIAS_FEATURE`]. The other names receive ids from 2 in lexicographic order, so the
/// mapping does not depend on the order in which names were seen.
#[derive(Clone, Debug)]
pub struct FeatureIndex {
    names: Indexer<String>,
}

impl FeatureIndex {
    /// Builds the index from training feature names given in any order.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidFormat`] is returned if a name cannot be stored in a mapping file.
    pub fn build<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if name.is_empty() || name == BIAS_FEATURE {
                continue;
            }
            check_persistable(name, "Feature name")?;
            sorted.insert(name.to_string());
        }
        let mut indexer = Indexer::new();
        indexer.get_id(BIAS_FEATURE);
        for name in &sorted {
            indexer.get_id(name.as_str());
        }
        Ok(Self { names: indexer })
    }

    pub fn from_instances(instances: &[Instance]) -> Result<Self> {
        Self::build(
            instances
                .iter()
                .flat_map(|instance| instance.features.iter().map(|f| f.name.as_str())),
        )
    }

    /// Builds the index from a precomputed list with one feature name per line.
    pub fn from_name_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::build(utils::read_lines(path)?)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.names
            .get(name)
            .map(|id| u32::try_from(id + 1).unwrap_or(u32::MAX))
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.names.key(idx).map(String::as_str)
    }

    /// Number of features, the bias included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Largest id in the index.
    pub fn max_id(&self) -> u32 {
        u32::try_from(self.names.len()).unwrap_or(u32::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        (1..).zip(self.names.keys()).map(|(id, name)| (name.as_str(), id))
    }

    /// Writes `name\tid` lines in id order.
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        for (name, id) in self.iter() {
            writeln!(wtr, "{name}\t{id}")?;
        }
        Ok(())
    }

    /// Reads a mapping file written by [`FeatureIndex::write()`], keeping its ids verbatim.
    pub fn read<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let pairs = read_table(path)?;
        match pairs.first() {
            Some((name, BIAS_ID)) if name == BIAS_FEATURE => (),
            _ => {
                return Err(SparseTcError::invalid_format(
                    path,
                    None,
                    format!("id {BIAS_ID} must be reserved for {BIAS_FEATURE}"),
                ))
            }
        }
        check_contiguous(path, &pairs, BIAS_ID)?;
        let mut names = Indexer::new();
        for (name, _) in &pairs {
            names.get_id(name.as_str());
        }
        if names.len() != pairs.len() {
            return Err(SparseTcError::invalid_format(
                path,
                None,
                "duplicate feature name",
            ));
        }
        Ok(Self { names })
    }
}

/// Outcome label to id mapping. Empty in regression mode.
#[derive(Clone, Debug)]
pub struct OutcomeIndex {
    labels: Indexer<String>,
    offset: u32,
}

impl OutcomeIndex {
    /// Builds the index from training outcomes given in any order.
    ///
    /// Distinct labels are sorted and numbered from `offset`.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if a classification run has no outcome, or
    /// if `mode` is not supported.
    pub fn build<I, S>(outcomes: I, mode: LearningMode, offset: u32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        mode.ensure_supported()?;
        let mut labels = Indexer::new();
        if mode.is_regression() {
            return Ok(Self { labels, offset });
        }
        let mut sorted = BTreeSet::new();
        for outcome in outcomes {
            let outcome = outcome.as_ref();
            check_persistable(outcome, "Outcome")?;
            sorted.insert(outcome.to_string());
        }
        if sorted.is_empty() {
            return Err(SparseTcError::invalid_config(
                "List of instance outcomes is empty.",
            ));
        }
        for label in &sorted {
            labels.get_id(label.as_str());
        }
        Ok(Self { labels, offset })
    }

    pub fn from_instances(instances: &[Instance], mode: LearningMode, offset: u32) -> Result<Self> {
        Self::build(instances.iter().map(|i| i.outcome.as_str()), mode, offset)
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        let id = u32::try_from(self.labels.get(label)?).ok()?;
        id.checked_add(self.offset)
    }

    /// Returns the label of a numeric outcome code.
    pub fn label(&self, code: u32) -> Option<&str> {
        let idx = usize::try_from(code.checked_sub(self.offset)?).ok()?;
        self.labels.key(idx).map(String::as_str)
    }

    pub const fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        (self.offset..)
            .zip(self.labels.keys())
            .map(|(id, label)| (label.as_str(), id))
    }

    /// Writes `label\tid` lines in id order.
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        for (label, id) in self.iter() {
            writeln!(wtr, "{label}\t{id}")?;
        }
        Ok(())
    }

    /// Reads a mapping file written by [`OutcomeIndex::write()`].
    pub fn read<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let pairs = read_table(path)?;
        let offset = pairs.first().map_or(0, |&(_, id)| id);
        check_contiguous(path, &pairs, offset)?;
        let mut labels = Indexer::new();
        for (label, _) in &pairs {
            labels.get_id(label.as_str());
        }
        if labels.len() != pairs.len() {
            return Err(SparseTcError::invalid_format(path, None, "duplicate outcome"));
        }
        Ok(Self { labels, offset })
    }
}
