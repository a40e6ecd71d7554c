//! Two-phase dataset writer.
//!
//! Instances are first staged as JSON lines, then encoded once the mappings are fixed.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Result, SparseTcError};
use crate::indexer::{FeatureIndex, OutcomeIndex, FEATURE_MAPPING_FILE, OUTCOME_MAPPING_FILE};
use crate::instance::{order_instances, FeatureMode, Instance, LearningMode};
use crate::sparse::{SparseEncoder, SparseFormat, SparseRecord, UnknownFeatures};
use crate::utils::{self, AtomicFile};

pub const STAGING_FILE: &str = "JSON.txt";
pub const FEATURE_FILE: &str = "featureFile.txt";
pub const INSTANCE_ID_FILE: &str = "index2Instanceid.txt";
pub const DATASET_FILE: &str = "dataset.txt";

const INSTANCE_ID_HEADER: &str = "#Index\tDkProInstanceId";

/// Settings of one dataset directory.
#[derive(Debug)]
pub struct DatasetConfig {
    pub learning_mode: LearningMode,
    pub feature_mode: FeatureMode,
    pub format: SparseFormat,
    pub unknown_features: UnknownFeatures,
}

impl DatasetConfig {
    /// Training data: unknown features are an error.
    pub fn new(
        learning_mode: LearningMode,
        feature_mode: FeatureMode,
        format: SparseFormat,
    ) -> Self {
        Self {
            learning_mode,
            feature_mode,
            format,
            unknown_features: UnknownFeatures::Reject,
        }
    }

    pub fn unknown_features(mut self, unknown_features: UnknownFeatures) -> Self {
        self.unknown_features = unknown_features;
        self
    }
}

/// Distinct feature names and outcomes of a staging file.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    pub features: BTreeSet<String>,
    pub outcomes: BTreeSet<String>,
}

/// Result of [`DatasetWriter::transform()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DatasetSummary {
    pub n_instances: usize,
    pub n_sequences: usize,
}

/// Writes one dataset directory.
#[derive(Debug)]
pub struct DatasetWriter {
    dir: PathBuf,
    config: DatasetConfig,
}

impl DatasetWriter {
    /// Creates a writer for `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned for an unsupported learning mode.
    pub fn new<P>(dir: P, config: DatasetConfig) -> Result<Self>
    where
        P: Into<PathBuf>,
    {
        config.learning_mode.ensure_supported()?;
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SparseTcError::file(&dir, e))?;
        Ok(Self { dir, config })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staging_path(&self) -> PathBuf {
        self.dir.join(STAGING_FILE)
    }

    /// Appends a batch of instances to the staging file.
    ///
    /// The file is opened and closed within the call.
    pub fn append_batch(&self, instances: &[Instance]) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let path = self.staging_path();
        let mut wtr = utils::open_append(&path)?;
        serde_json::to_writer(&mut wtr, instances)?;
        writeln!(wtr).map_err(|e| SparseTcError::file(&path, e))?;
        wtr.flush().map_err(|e| SparseTcError::file(&path, e))?;
        Ok(())
    }

    fn staged_batches(&self) -> Result<impl Iterator<Item = Result<Vec<Instance>>>> {
        let path = self.staging_path();
        let rdr = BufReader::new(utils::open_file(&path)?);
        Ok(rdr.lines().enumerate().filter_map(move |(i, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(SparseTcError::file(&path, e))),
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(serde_json::from_str::<Vec<Instance>>(&line).map_err(|e| {
                SparseTcError::invalid_format(&path, Some(i + 1), e.to_string())
            }))
        }))
    }

    /// Reads every staged instance. Nothing is staged if the staging file does not exist.
    pub fn read_staged(&self) -> Result<Vec<Instance>> {
        let mut instances = vec![];
        if self.staging_path().exists() {
            for batch in self.staged_batches()? {
                instances.extend(batch?);
            }
        }
        Ok(instances)
    }

    /// Scans the staging file for feature names and outcomes.
    pub fn collect_vocabulary(&self) -> Result<Vocabulary> {
        let mut vocab = Vocabulary::default();
        if !self.staging_path().exists() {
            return Ok(vocab);
        }
        for batch in self.staged_batches()? {
            for instance in batch? {
                vocab.outcomes.insert(instance.outcome);
                vocab
                    .features
                    .extend(instance.features.into_iter().map(|f| f.name));
            }
        }
        Ok(vocab)
    }

    /// Encodes the staged instances and writes the dataset directory.
    ///
    /// Records are written while the staging file is read. Outside of sequence mode no
    /// instance is kept after it is written; sequence mode holds the staged instances to put
    /// them in sequence order. Every output goes to a temporary file first, and all of them are
    /// renamed into place only after the last one is written, so a failure leaves the
    /// directory as it was. The staging file is removed on success.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if nothing is staged, including a second
    /// call after a successful one.
    pub fn transform(
        &self,
        features: &FeatureIndex,
        outcomes: &OutcomeIndex,
    ) -> Result<DatasetSummary> {
        let staging = self.staging_path();
        if !staging.exists() {
            return Err(SparseTcError::invalid_config(format!(
                "{} does not exist: no instances are staged",
                staging.display()
            )));
        }
        let encoder = SparseEncoder::new(
            features,
            outcomes,
            &self.config.format,
            self.config.learning_mode,
        )?
        .unknown_features(self.config.unknown_features);

        let mut sink = RecordSink::create(&self.dir, self.config.feature_mode)?;
        if self.config.feature_mode.is_sequence() {
            let mut instances = self.read_staged()?;
            order_instances(&mut instances, self.config.feature_mode);
            for instance in &instances {
                sink.push(instance, encoder.encode(instance)?)?;
            }
        } else {
            for batch in self.staged_batches()? {
                for instance in batch? {
                    sink.push(&instance, encoder.encode(&instance)?)?;
                }
            }
        }

        let mut outputs = vec![];
        let mut f = AtomicFile::create(self.dir.join(FEATURE_MAPPING_FILE))?;
        features.write(&mut f)?;
        outputs.push(f);
        if !self.config.learning_mode.is_regression() {
            let mut f = AtomicFile::create(self.dir.join(OUTCOME_MAPPING_FILE))?;
            outcomes.write(&mut f)?;
            outputs.push(f);
        }
        let mut f = AtomicFile::create(self.dir.join(DATASET_FILE))?;
        DatasetInfo {
            learning_mode: self.config.learning_mode,
            feature_mode: self.config.feature_mode,
            format: self.config.format.to_string(),
        }
        .write(&mut f)?;
        outputs.push(f);

        let summary = sink.summary();
        utils::commit_all([sink.records, sink.ids].into_iter().chain(outputs))?;
        utils::remove_if_exists(staging)?;

        log::info!(
            "wrote {} instances to {}",
            summary.n_instances,
            self.dir.join(FEATURE_FILE).display()
        );
        Ok(summary)
    }
}

/// Receives encoded records in output order and writes them with their instance ids.
struct RecordSink {
    records: AtomicFile,
    ids: AtomicFile,
    sequence: bool,
    prev_sequence: Option<u32>,
    n_instances: usize,
    n_sequences: usize,
}

impl RecordSink {
    fn create(dir: &Path, mode: FeatureMode) -> Result<Self> {
        let records = AtomicFile::create(dir.join(FEATURE_FILE))?;
        let mut ids = AtomicFile::create(dir.join(INSTANCE_ID_FILE))?;
        writeln!(ids, "{INSTANCE_ID_HEADER}")?;
        Ok(Self {
            records,
            ids,
            sequence: mode.is_sequence(),
            prev_sequence: None,
            n_instances: 0,
            n_sequences: 0,
        })
    }

    fn push(&mut self, instance: &Instance, record: SparseRecord) -> Result<()> {
        let new_group = match self.prev_sequence {
            None => true,
            Some(prev) => self.sequence && prev != instance.sequence_id,
        };
        if new_group {
            if self.n_sequences != 0 {
                writeln!(self.records)?;
            }
            self.n_sequences += 1;
        }
        self.prev_sequence = Some(instance.sequence_id);
        writeln!(self.records, "{record}")?;

        let i = self.n_instances;
        match &instance.id {
            Some(id) => writeln!(self.ids, "{i}\t{id}")?,
            None => writeln!(self.ids, "{i}\t{i}")?,
        }
        self.n_instances += 1;
        Ok(())
    }

    const fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            n_instances: self.n_instances,
            n_sequences: self.n_sequences,
        }
    }
}

/// Contents of `dataset.txt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetInfo {
    pub learning_mode: LearningMode,
    pub feature_mode: FeatureMode,
    pub format: String,
}

impl DatasetInfo {
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        writeln!(wtr, "learningMode\t{}", self.learning_mode)?;
        writeln!(wtr, "featureMode\t{}", self.feature_mode)?;
        writeln!(wtr, "format\t{}", self.format)?;
        Ok(())
    }

    /// Reads `dataset.txt` from a dataset directory.
    pub fn read<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = dir.as_ref().join(DATASET_FILE);
        if !path.exists() {
            return Err(SparseTcError::invalid_config(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let mut learning_mode = None;
        let mut feature_mode = None;
        let mut format = None;
        for (i, line) in utils::read_lines(&path)?.iter().enumerate() {
            let err = |msg: &str| SparseTcError::invalid_format(&path, Some(i + 1), msg);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('\t')
                .ok_or_else(|| err("expected `key<TAB>value`"))?;
            match key {
                "learningMode" => learning_mode = Some(value.parse().map_err(err)?),
                "featureMode" => feature_mode = Some(value.parse().map_err(err)?),
                "format" => format = Some(value.to_string()),
                _ => return Err(err("unknown key")),
            }
        }
        match (learning_mode, feature_mode, format) {
            (Some(learning_mode), Some(feature_mode), Some(format)) => Ok(Self {
                learning_mode,
                feature_mode,
                format,
            }),
            _ => Err(SparseTcError::invalid_format(&path, None, "missing keys")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::indexer::BIAS_FEATURE;
    use crate::test_utils::TempDir;

    fn indexes(writer: &DatasetWriter, mode: LearningMode) -> (FeatureIndex, OutcomeIndex) {
        let vocab = writer.collect_vocabulary().unwrap();
        (
            FeatureIndex::build(&vocab.features).unwrap(),
            OutcomeIndex::build(&vocab.outcomes, mode, 0).unwrap(),
        )
    }

    #[test]
    fn test_two_phase_write() {
        let dir = TempDir::new("dataset_two_phase");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[
                Instance::new("pos").feature("tok=a", 1.0).feature("tok=b", 1.0).id("d1"),
                Instance::new("neg").feature("tok=a", 1.0).id("d2"),
            ])
            .unwrap();
        writer
            .append_batch(&[Instance::new("pos").feature("tok=c", 1.0)])
            .unwrap();
        let (features, outcomes) = indexes(&writer, LearningMode::SingleLabel);
        let summary = writer.transform(&features, &outcomes).unwrap();

        assert_eq!(
            DatasetSummary {
                n_instances: 3,
                n_sequences: 1
            },
            summary
        );
        assert_eq!(
            "1\t1:1\t2:1\t3:1\n0\t1:1\t2:1\n1\t1:1\t4:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
        assert_eq!(
            format!("{BIAS_FEATURE}\t1\ntok=a\t2\ntok=b\t3\ntok=c\t4\n"),
            fs::read_to_string(dir.path().join(FEATURE_MAPPING_FILE)).unwrap()
        );
        assert_eq!(
            "neg\t0\npos\t1\n",
            fs::read_to_string(dir.path().join(OUTCOME_MAPPING_FILE)).unwrap()
        );
        assert_eq!(
            "#Index\tDkProInstanceId\n0\td1\n1\td2\n2\t2\n",
            fs::read_to_string(dir.path().join(INSTANCE_ID_FILE)).unwrap()
        );
        assert!(!writer.staging_path().exists());
        assert_eq!(
            DatasetInfo {
                learning_mode: LearningMode::SingleLabel,
                feature_mode: FeatureMode::Document,
                format: "libsvm offset=0 placeholder=-1 text=indicator".to_string(),
            },
            DatasetInfo::read(dir.path()).unwrap()
        );
    }

    #[test]
    fn test_second_transform_keeps_dataset() {
        let dir = TempDir::new("dataset_second_transform");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("pos").feature("tok=a", 1.0)])
            .unwrap();
        let (features, outcomes) = indexes(&writer, LearningMode::SingleLabel);
        writer.transform(&features, &outcomes).unwrap();
        let err = writer.transform(&features, &outcomes).unwrap_err();

        assert!(matches!(err, SparseTcError::InvalidConfig(_)));
        assert_eq!(
            "0\t1:1\t2:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
    }

    #[test]
    fn test_failed_write_keeps_previous_dataset() {
        let dir = TempDir::new("dataset_failed_write");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("pos").feature("tok=a", 1.0)])
            .unwrap();
        let (features, outcomes) = indexes(&writer, LearningMode::SingleLabel);
        writer.transform(&features, &outcomes).unwrap();

        writer
            .append_batch(&[
                Instance::new("pos").feature("tok=a", 1.0),
                Instance::new("pos").feature("tok=a", 1.0),
            ])
            .unwrap();
        // The temporary name of dataset.txt is taken, so its write fails after the records.
        fs::create_dir(dir.path().join("dataset.txt.tmp")).unwrap();

        assert!(writer.transform(&features, &outcomes).is_err());
        assert_eq!(
            "0\t1:1\t2:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
        assert_eq!(
            "#Index\tDkProInstanceId\n0\t0\n",
            fs::read_to_string(dir.path().join(INSTANCE_ID_FILE)).unwrap()
        );
        assert!(!dir.path().join("featureFile.txt.tmp").exists());
        assert!(!dir.path().join("index2Instanceid.txt.tmp").exists());
        assert!(writer.staging_path().exists());
    }

    #[test]
    fn test_custom_format_is_stored() {
        let dir = TempDir::new("dataset_custom_format");
        let format = SparseFormat::custom("hmm2", 1, "1", Some("sid:")).unwrap();
        let config = DatasetConfig::new(LearningMode::SingleLabel, FeatureMode::Sequence, format);
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("A").feature("w", 1.0).sequence(2, 0)])
            .unwrap();
        let vocab = writer.collect_vocabulary().unwrap();
        let features = FeatureIndex::build(&vocab.features).unwrap();
        let outcomes = OutcomeIndex::build(&vocab.outcomes, LearningMode::SingleLabel, 1).unwrap();
        writer.transform(&features, &outcomes).unwrap();
        let info = DatasetInfo::read(dir.path()).unwrap();

        assert_eq!(
            "1 sid:2\t1:1\t2:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
        assert_eq!(
            SparseFormat::custom("hmm2", 1, "1", Some("sid:")).unwrap(),
            SparseFormat::parse(&info.format).unwrap()
        );
    }

    #[test]
    fn test_sequence_mode_groups() {
        let dir = TempDir::new("dataset_sequence");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Sequence,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[
                Instance::new("B").feature("w", 1.0).sequence(5, 1),
                Instance::new("A").feature("w", 1.0).sequence(9, 0),
                Instance::new("A").feature("w", 1.0).sequence(5, 0),
            ])
            .unwrap();
        let (features, outcomes) = indexes(&writer, LearningMode::SingleLabel);
        let summary = writer.transform(&features, &outcomes).unwrap();

        assert_eq!(2, summary.n_sequences);
        assert_eq!(
            "0\t1:1\t2:1\n1\t1:1\t2:1\n\n0\t1:1\t2:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
    }

    #[test]
    fn test_regression_has_no_outcome_mapping() {
        let dir = TempDir::new("dataset_regression");
        let config = DatasetConfig::new(
            LearningMode::Regression,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("0.5").feature("x", 2.0)])
            .unwrap();
        let (features, outcomes) = indexes(&writer, LearningMode::Regression);
        writer.transform(&features, &outcomes).unwrap();

        assert_eq!(
            "0.5\t1:1\t2:2\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
        assert!(!dir.path().join(OUTCOME_MAPPING_FILE).exists());
    }

    #[test]
    fn test_failed_transform_leaves_no_artifact() {
        let dir = TempDir::new("dataset_failure");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("pos").feature("tok=z", 1.0)])
            .unwrap();
        let features = FeatureIndex::build(["tok=a"]).unwrap();
        let outcomes = OutcomeIndex::build(["pos"], LearningMode::SingleLabel, 0).unwrap();

        assert!(writer.transform(&features, &outcomes).is_err());
        assert!(!dir.path().join(FEATURE_FILE).exists());
        assert!(!dir.path().join(FEATURE_MAPPING_FILE).exists());
        assert!(writer.staging_path().exists());
    }

    #[test]
    fn test_test_data_drops_unknown() {
        let dir = TempDir::new("dataset_test_data");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        )
        .unknown_features(UnknownFeatures::Drop);
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer
            .append_batch(&[Instance::new("pos").feature("tok=z", 1.0).feature("tok=a", 1.0)])
            .unwrap();
        let features = FeatureIndex::build(["tok=a"]).unwrap();
        let outcomes = OutcomeIndex::build(["pos"], LearningMode::SingleLabel, 0).unwrap();
        writer.transform(&features, &outcomes).unwrap();

        assert_eq!(
            "0\t1:1\t2:1\n",
            fs::read_to_string(dir.path().join(FEATURE_FILE)).unwrap()
        );
    }

    #[test]
    fn test_corrupt_staging_line() {
        let dir = TempDir::new("dataset_corrupt");
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir.path(), config).unwrap();
        writer.append_batch(&[Instance::new("a")]).unwrap();
        fs::write(
            writer.staging_path(),
            fs::read_to_string(writer.staging_path()).unwrap() + "{oops\n",
        )
        .unwrap();
        let err = writer.read_staged().unwrap_err();

        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_multi_label_rejected() {
        let dir = TempDir::new("dataset_multi_label");
        let config = DatasetConfig::new(
            LearningMode::MultiLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );

        assert!(DatasetWriter::new(dir.path(), config).is_err());
    }
}
