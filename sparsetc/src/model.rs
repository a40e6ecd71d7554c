//! Trained models and the model directory read by replay.

use std::fmt;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bincode::{Decode, Encode};

use crate::crf::CrfModel;
use crate::dataset::DatasetInfo;
use crate::errors::{Result, SparseTcError};
use crate::indexer::{FEATURE_MAPPING_FILE, OUTCOME_MAPPING_FILE};
use crate::instance::{order_instances, FeatureMode, Instance, LearningMode};
use crate::linear::LinearModel;
use crate::replay::ReplayDecoder;
use crate::sparse::{self, SparseFormat, SparseRecord};
use crate::utils::{self, AtomicFile};

pub const MODEL_FILE: &str = "classifier.bin";
pub const META_FILE: &str = "meta.txt";
pub const LEARNING_MODE_FILE: &str = "learningMode.txt";
pub const FEATURE_MODE_FILE: &str = "featureMode.txt";
pub const FORMAT_FILE: &str = "format.txt";

const ZSTD_LEVEL: i32 = 19;

/// Backend that produced a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Liblinear,
    Crf,
}

impl FromStr for Backend {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "liblinear" => Ok(Self::Liblinear),
            "crf" => Ok(Self::Crf),
            _ => Err("Could not parse a backend name"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Liblinear => "liblinear",
            Self::Crf => "crf",
        })
    }
}

/// Common interface of trained models.
pub trait Classifier {
    fn backend(&self) -> Backend;

    /// Predicts one value per record, in input order.
    fn predict_groups(&self, groups: &[Vec<SparseRecord>]) -> Result<Vec<String>>;
}

impl Classifier for LinearModel {
    fn backend(&self) -> Backend {
        Backend::Liblinear
    }

    fn predict_groups(&self, groups: &[Vec<SparseRecord>]) -> Result<Vec<String>> {
        Ok(groups
            .iter()
            .flatten()
            .map(|record| self.predict(&record.entries).to_string())
            .collect())
    }
}

impl Classifier for CrfModel {
    fn backend(&self) -> Backend {
        Backend::Crf
    }

    fn predict_groups(&self, groups: &[Vec<SparseRecord>]) -> Result<Vec<String>> {
        Ok(self.predict_aligned(groups)?.into_iter().flatten().collect())
    }
}

/// A model of any backend.
#[derive(Clone, Debug, Decode, Encode, PartialEq)]
pub enum TrainedModel {
    Linear(LinearModel),
    Crf(CrfModel),
}

impl TrainedModel {
    fn as_classifier(&self) -> &dyn Classifier {
        match self {
            Self::Linear(model) => model,
            Self::Crf(model) => model,
        }
    }

    /// Exports the model, compressed with zstd.
    pub fn write<W>(&self, wtr: W) -> Result<()>
    where
        W: Write,
    {
        let mut enc = zstd::Encoder::new(wtr, ZSTD_LEVEL)?;
        bincode::encode_into_std_write(self, &mut enc, bincode::config::standard())?;
        enc.finish()?;
        Ok(())
    }

    /// Reads a model written by [`TrainedModel::write()`].
    pub fn read<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut dec = zstd::Decoder::new(rdr)?;
        Ok(bincode::decode_from_std_read(
            &mut dec,
            bincode::config::standard(),
        )?)
    }
}

impl Classifier for TrainedModel {
    fn backend(&self) -> Backend {
        self.as_classifier().backend()
    }

    fn predict_groups(&self, groups: &[Vec<SparseRecord>]) -> Result<Vec<String>> {
        self.as_classifier().predict_groups(groups)
    }
}

fn read_text(dir: &Path, name: &str) -> Result<(PathBuf, String)> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(SparseTcError::invalid_config(format!(
            "{} is missing",
            path.display()
        )));
    }
    let value = fs::read_to_string(&path).map_err(|e| SparseTcError::file(&path, e))?;
    Ok((path, value.trim().to_string()))
}

fn read_setting<T>(dir: &Path, name: &str) -> Result<T>
where
    T: FromStr<Err = &'static str>,
{
    let (path, value) = read_text(dir, name)?;
    value
        .parse()
        .map_err(|msg| SparseTcError::invalid_format(&path, Some(1), msg))
}

fn copy_table(from: &Path, to: &Path) -> Result<AtomicFile> {
    if !from.exists() {
        return Err(SparseTcError::invalid_config(format!(
            "{} is missing",
            from.display()
        )));
    }
    let content = fs::read(from).map_err(|e| SparseTcError::file(from, e))?;
    let mut f = AtomicFile::create(to)?;
    f.write_all(&content)?;
    Ok(f)
}

fn setting_file(path: PathBuf, value: &dyn fmt::Display) -> Result<AtomicFile> {
    let mut f = AtomicFile::create(path)?;
    writeln!(f, "{value}")?;
    Ok(f)
}

/// A published model: mapping tables, the model and its settings.
#[derive(Clone, Debug)]
pub struct ModelDir {
    path: PathBuf,
    backend: Backend,
    learning_mode: LearningMode,
    feature_mode: FeatureMode,
    format: String,
}

impl ModelDir {
    /// Publishes `model`, trained on the dataset in `dataset_dir`, to `dir`.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if `dir` already holds a published model or
    /// a mapping table of the dataset is missing.
    pub fn publish<P, Q>(dir: P, dataset_dir: Q, model: &TrainedModel) -> Result<Self>
    where
        P: Into<PathBuf>,
        Q: AsRef<Path>,
    {
        let path = dir.into();
        let dataset_dir = dataset_dir.as_ref();
        if path.join(META_FILE).exists() {
            return Err(SparseTcError::invalid_config(format!(
                "{} already holds a published model",
                path.display()
            )));
        }
        let info = DatasetInfo::read(dataset_dir)?;
        fs::create_dir_all(&path).map_err(|e| SparseTcError::file(&path, e))?;

        let mut outputs = vec![copy_table(
            &dataset_dir.join(FEATURE_MAPPING_FILE),
            &path.join(FEATURE_MAPPING_FILE),
        )?];
        if !info.learning_mode.is_regression() {
            outputs.push(copy_table(
                &dataset_dir.join(OUTCOME_MAPPING_FILE),
                &path.join(OUTCOME_MAPPING_FILE),
            )?);
        }
        let mut f = AtomicFile::create(path.join(MODEL_FILE))?;
        model.write(&mut f)?;
        outputs.push(f);
        outputs.push(setting_file(path.join(LEARNING_MODE_FILE), &info.learning_mode)?);
        outputs.push(setting_file(path.join(FEATURE_MODE_FILE), &info.feature_mode)?);
        outputs.push(setting_file(path.join(FORMAT_FILE), &info.format)?);
        // Renamed last: its presence marks a complete model directory.
        outputs.push(setting_file(path.join(META_FILE), &model.backend())?);
        utils::commit_all(outputs)?;

        log::info!("published {} model to {}", model.backend(), path.display());
        Ok(Self {
            path,
            backend: model.backend(),
            learning_mode: info.learning_mode,
            feature_mode: info.feature_mode,
            format: info.format,
        })
    }

    /// Opens a published model directory.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidConfig`] is returned if a mandatory file is missing.
    pub fn open<P>(dir: P) -> Result<Self>
    where
        P: Into<PathBuf>,
    {
        let path = dir.into();
        let backend = read_setting(&path, META_FILE)?;
        let learning_mode: LearningMode = read_setting(&path, LEARNING_MODE_FILE)?;
        learning_mode.ensure_supported()?;
        let feature_mode = read_setting(&path, FEATURE_MODE_FILE)?;
        let (_, format) = read_text(&path, FORMAT_FILE)?;
        Ok(Self {
            path,
            backend,
            learning_mode,
            feature_mode,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn backend(&self) -> Backend {
        self.backend
    }

    pub const fn learning_mode(&self) -> LearningMode {
        self.learning_mode
    }

    pub const fn feature_mode(&self) -> FeatureMode {
        self.feature_mode
    }

    /// Sparse format the model was trained on.
    pub fn format(&self) -> Result<SparseFormat> {
        SparseFormat::parse(&self.format)
    }

    /// Reads `classifier.bin`.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::InvalidModel`] is returned if the stored model was produced by a
    /// different backend than `meta.txt` names.
    pub fn load_model(&self) -> Result<TrainedModel> {
        let model_path = self.path.join(MODEL_FILE);
        if !model_path.exists() {
            return Err(SparseTcError::invalid_config(format!(
                "{} is missing",
                model_path.display()
            )));
        }
        let model = TrainedModel::read(BufReader::new(utils::open_file(&model_path)?))?;
        if model.backend() != self.backend {
            return Err(SparseTcError::invalid_model(format!(
                "{} holds a {} model but {} names {}",
                MODEL_FILE,
                model.backend(),
                META_FILE,
                self.backend
            )));
        }
        Ok(model)
    }

    pub fn replay_decoder(&self) -> Result<ReplayDecoder> {
        ReplayDecoder::load(&self.path, self.learning_mode)
    }

    /// Predicts labels of unseen instances.
    ///
    /// `instances` are put in model order first (see [`order_instances()`]), and the returned
    /// labels are aligned with that order.
    ///
    /// # Errors
    ///
    /// [`SparseTcError::Alignment`] is returned if the model returns a different number of
    /// predictions or an unknown outcome code.
    pub fn replay(
        &self,
        model: &TrainedModel,
        instances: &mut [Instance],
    ) -> Result<Vec<String>> {
        let decoder = self.replay_decoder()?;
        let format = self.format()?;
        order_instances(instances, self.feature_mode);

        let groups = sparse::encode_groups(instances, self.feature_mode, |instance| {
            decoder.encode_for_prediction(instance, &format)
        })?;
        let raw = model.predict_groups(&groups)?;
        decoder.decode_all(instances.len(), &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crf::Layout;
    use crate::dataset::{DatasetConfig, DatasetWriter};
    use crate::indexer::{FeatureIndex, OutcomeIndex};
    use crate::test_utils::TempDir;

    fn write_dataset(dir: &Path) {
        let config = DatasetConfig::new(
            LearningMode::SingleLabel,
            FeatureMode::Document,
            SparseFormat::libsvm(),
        );
        let writer = DatasetWriter::new(dir, config).unwrap();
        writer
            .append_batch(&[
                Instance::new("pos").feature("tok=a", 1.0),
                Instance::new("neg").feature("tok=b", 1.0),
            ])
            .unwrap();
        let vocab = writer.collect_vocabulary().unwrap();
        let features = FeatureIndex::build(&vocab.features).unwrap();
        let outcomes =
            OutcomeIndex::build(&vocab.outcomes, LearningMode::SingleLabel, 0).unwrap();
        writer.transform(&features, &outcomes).unwrap();
    }

    fn linear_model() -> TrainedModel {
        TrainedModel::Linear(
            LinearModel::new(
                vec![0, 1],
                vec![vec![0.0, -1.0, 1.0], vec![0.0, 1.0, -1.0]],
                vec![0.0, 0.0],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Ok(Backend::Liblinear), "liblinear".parse());
        assert_eq!("crf", Backend::Crf.to_string());
        assert!("weka".parse::<Backend>().is_err());
    }

    #[test]
    fn test_model_write_read() {
        let layout = Layout::new(2, 2);
        let crf = CrfModel::new(
            vec!["0".into(), "1".into()],
            layout,
            (0..layout.len()).map(|i| i as f64).collect(),
        )
        .unwrap();
        for model in [linear_model(), TrainedModel::Crf(crf)] {
            let mut buf = vec![];
            model.write(&mut buf).unwrap();

            assert_eq!(model, TrainedModel::read(buf.as_slice()).unwrap());
        }
    }

    #[test]
    fn test_publish_open() {
        let dataset = TempDir::new("model_dataset");
        let out = TempDir::new("model_dir");
        write_dataset(dataset.path());
        let model_dir = out.path().join("model");
        let model = linear_model();
        ModelDir::publish(&model_dir, dataset.path(), &model).unwrap();
        let opened = ModelDir::open(&model_dir).unwrap();

        assert_eq!(Backend::Liblinear, opened.backend());
        assert_eq!(LearningMode::SingleLabel, opened.learning_mode());
        assert_eq!(FeatureMode::Document, opened.feature_mode());
        assert_eq!("libsvm", opened.format().unwrap().name());
        assert_eq!(model, opened.load_model().unwrap());

        let decoder = opened.replay_decoder().unwrap();
        let record = decoder
            .encode_for_prediction(
                &Instance::new("?").feature("tok=b", 1.0).feature("tok=z", 1.0),
                &opened.format().unwrap(),
            )
            .unwrap();
        let predicted = opened.load_model().unwrap().predict_groups(&[vec![record]]).unwrap();

        assert_eq!(vec!["0".to_string()], predicted);
        assert_eq!("neg", decoder.decode_prediction(&predicted[0]).unwrap());
    }

    #[test]
    fn test_replay_drops_unseen_features() {
        let dataset = TempDir::new("model_dataset_replay");
        let out = TempDir::new("model_dir_replay");
        write_dataset(dataset.path());
        let model_dir = ModelDir::publish(out.path(), dataset.path(), &linear_model()).unwrap();
        let model = model_dir.load_model().unwrap();
        let mut instances = vec![
            Instance::new("?").feature("tok=a", 1.0),
            Instance::new("?").feature("tok=z", 1.0).feature("tok=b", 1.0),
        ];

        assert_eq!(
            vec!["pos".to_string(), "neg".to_string()],
            model_dir.replay(&model, &mut instances).unwrap()
        );
    }

    #[test]
    fn test_publish_twice_rejected() {
        let dataset = TempDir::new("model_dataset_twice");
        let out = TempDir::new("model_dir_twice");
        write_dataset(dataset.path());
        ModelDir::publish(out.path(), dataset.path(), &linear_model()).unwrap();

        assert!(ModelDir::publish(out.path(), dataset.path(), &linear_model()).is_err());
    }

    #[test]
    fn test_failed_publish_commits_nothing() {
        let dataset = TempDir::new("model_dataset_failed");
        let out = TempDir::new("model_dir_failed");
        write_dataset(dataset.path());
        fs::create_dir(out.path().join("meta.txt.tmp")).unwrap();

        assert!(ModelDir::publish(out.path(), dataset.path(), &linear_model()).is_err());
        assert!(!out.path().join(MODEL_FILE).exists());
        assert!(!out.path().join(FEATURE_MAPPING_FILE).exists());
        assert!(!out.path().join(FORMAT_FILE).exists());
        assert!(!out.path().join("classifier.bin.tmp").exists());
    }

    #[test]
    fn test_custom_format_survives_publish() {
        let dataset = TempDir::new("model_dataset_custom");
        let out = TempDir::new("model_dir_custom");
        let format = SparseFormat::custom("flat1", 1, "1", None).unwrap();
        let config = DatasetConfig::new(LearningMode::SingleLabel, FeatureMode::Document, format);
        let writer = DatasetWriter::new(dataset.path(), config).unwrap();
        writer
            .append_batch(&[
                Instance::new("pos").feature("tok=a", 1.0),
                Instance::new("neg").feature("tok=b", 1.0),
            ])
            .unwrap();
        let vocab = writer.collect_vocabulary().unwrap();
        let features = FeatureIndex::build(&vocab.features).unwrap();
        let outcomes =
            OutcomeIndex::build(&vocab.outcomes, LearningMode::SingleLabel, 1).unwrap();
        writer.transform(&features, &outcomes).unwrap();
        let model = TrainedModel::Linear(
            LinearModel::new(
                vec![1, 2],
                vec![vec![0.0, -1.0, 1.0], vec![0.0, 1.0, -1.0]],
                vec![0.0, 0.0],
            )
            .unwrap(),
        );
        let model_dir = ModelDir::publish(out.path(), dataset.path(), &model).unwrap();
        let opened = ModelDir::open(out.path()).unwrap();

        assert_eq!(
            SparseFormat::custom("flat1", 1, "1", None).unwrap(),
            opened.format().unwrap()
        );
        let mut instances = vec![Instance::new("?").feature("tok=b", 1.0)];
        assert_eq!(
            vec!["neg".to_string()],
            model_dir.replay(&model, &mut instances).unwrap()
        );
    }

    #[test]
    fn test_open_missing_meta() {
        let out = TempDir::new("model_dir_missing");
        let err = ModelDir::open(out.path()).unwrap_err();

        assert!(matches!(err, SparseTcError::InvalidConfig(_)));
    }

    #[test]
    fn test_publish_without_dataset() {
        let dataset = TempDir::new("model_no_dataset");
        let out = TempDir::new("model_dir_no_dataset");

        assert!(ModelDir::publish(out.path(), dataset.path(), &linear_model()).is_err());
        assert!(!out.path().join(MODEL_FILE).exists());
    }
}
