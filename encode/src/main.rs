use std::collections::BTreeSet;
use std::fs::File;
use std::io::{prelude::*, stderr, BufReader};
use std::path::PathBuf;

use clap::Parser;
use sparsetc::{
    DatasetConfig, DatasetWriter, FeatureIndex, FeatureMode, Instance, LearningMode,
    OutcomeIndex, SparseFormat, TextValues, UnknownFeatures,
};

#[derive(Parser, Debug)]
#[command(about = "A program to encode JSON-lines instances into sparse datasets.")]
struct Args {
    /// JSON-lines files of training instances
    #[arg(long, required = true)]
    train: Vec<PathBuf>,

    /// JSON-lines files of test instances
    #[arg(long)]
    test: Vec<PathBuf>,

    /// The directory to write the training dataset to
    #[arg(long)]
    train_dir: PathBuf,

    /// The directory to write the test dataset to
    #[arg(long, requires = "test")]
    test_dir: Option<PathBuf>,

    /// A file listing one feature name per line, used instead of the training features
    #[arg(long)]
    feature_list: Option<PathBuf>,

    /// The learning mode. {singleLabel, regression}
    #[arg(long, default_value = "singleLabel")]
    learning_mode: LearningMode,

    /// The feature mode. {document, unit, sequence, pair}
    #[arg(long, default_value = "document")]
    feature_mode: FeatureMode,

    /// The sparse format: libsvm, svmhmm, or "<name> offset=<n> placeholder=<p> [token=<prefix>]"
    #[arg(long, default_value = "libsvm")]
    format: String,

    /// Reject string feature values that are not numeric literals.
    #[arg(long)]
    numeric_text: bool,

    /// The number of instances staged per batch
    #[arg(long, default_value = "1000")]
    batch_size: usize,
}

fn stage(
    writer: &DatasetWriter,
    paths: &[PathBuf],
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut n_instances = 0;
    let mut batch = Vec::with_capacity(batch_size);
    for path in paths {
        eprintln!("Loading {path:?} ...");
        let f = BufReader::new(File::open(path)?);
        for line in f.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let instance: Instance = serde_json::from_str(&line)?;
            batch.push(instance);
            if batch.len() >= batch_size.max(1) {
                writer.append_batch(&batch)?;
                batch.clear();
            }
            n_instances += 1;
            if n_instances % 10000 == 0 {
                eprint!("# of instances: {n_instances}\r");
                stderr().flush()?;
            }
        }
    }
    writer.append_batch(&batch)?;
    eprintln!("# of instances: {n_instances}");
    Ok(())
}

fn config(
    args: &Args,
    unknown: UnknownFeatures,
) -> Result<DatasetConfig, Box<dyn std::error::Error>> {
    let text_values = if args.numeric_text {
        TextValues::Numeric
    } else {
        TextValues::Indicator
    };
    let format = SparseFormat::parse(&args.format)?.with_text_values(text_values);
    Ok(
        DatasetConfig::new(args.learning_mode, args.feature_mode, format)
            .unknown_features(unknown),
    )
}

fn feature_index(
    args: &Args,
    train: &BTreeSet<String>,
) -> Result<FeatureIndex, Box<dyn std::error::Error>> {
    Ok(match &args.feature_list {
        Some(path) => FeatureIndex::from_name_file(path)?,
        None => FeatureIndex::build(train)?,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    eprintln!("Staging training instances...");
    let train_writer =
        DatasetWriter::new(&args.train_dir, config(&args, UnknownFeatures::Reject)?)?;
    stage(&train_writer, &args.train, args.batch_size)?;

    let test_writer = match &args.test_dir {
        Some(dir) => {
            eprintln!("Staging test instances...");
            let writer = DatasetWriter::new(dir, config(&args, UnknownFeatures::Drop)?)?;
            stage(&writer, &args.test, args.batch_size)?;
            Some(writer)
        }
        None => None,
    };

    eprintln!("Building indices...");
    let train_vocab = train_writer.collect_vocabulary()?;
    let mut outcomes = train_vocab.outcomes.clone();
    if let Some(writer) = &test_writer {
        outcomes.extend(writer.collect_vocabulary()?.outcomes);
    }
    let features = feature_index(&args, &train_vocab.features)?;
    let offset = SparseFormat::parse(&args.format)?.outcome_offset();
    let outcomes = OutcomeIndex::build(&outcomes, args.learning_mode, offset)?;
    eprintln!("# of features: {}", features.len());
    eprintln!("# of outcomes: {}", outcomes.len());

    eprintln!("Writing training dataset...");
    let summary = train_writer.transform(&features, &outcomes)?;
    eprintln!(
        "# of instances: {}, # of sequences: {}",
        summary.n_instances, summary.n_sequences
    );
    if let Some(writer) = test_writer {
        eprintln!("Writing test dataset...");
        let summary = writer.transform(&features, &outcomes)?;
        eprintln!(
            "# of instances: {}, # of sequences: {}",
            summary.n_instances, summary.n_sequences
        );
    }

    Ok(())
}
