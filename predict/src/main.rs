use std::fs;
use std::io::{prelude::*, stdin, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use clap::{ArgGroup, Parser};
use sparsetc::{
    check_prediction_count, read_groups, read_instance_ids, write_id2outcome, write_predictions,
    Classifier, Instance, ModelDir, Prediction, FEATURE_FILE, ID2OUTCOME_FILE, INSTANCE_ID_FILE,
    PREDICTION_FILE,
};

#[derive(Parser, Debug)]
#[command(
    about = "A program to predict outcomes with a trained model.",
    group = ArgGroup::new("input").required(true),
)]
struct Args {
    /// The model directory to use
    #[arg(long)]
    model: PathBuf,

    /// An encoded test dataset directory to score
    #[arg(long, group = "input")]
    test_dir: Option<PathBuf>,

    /// The directory to write predictions.txt and id2outcome.txt to (default: the test
    /// directory)
    #[arg(long, requires = "test_dir")]
    output: Option<PathBuf>,

    /// Read JSON-lines instances from stdin and print the predicted labels.
    #[arg(long, group = "input")]
    replay: bool,
}

fn score(
    model_dir: &ModelDir,
    test_dir: PathBuf,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = model_dir.load_model()?;

    eprintln!("Loading dataset...");
    let groups = read_groups(test_dir.join(FEATURE_FILE))?;
    let n_records = groups.iter().map(Vec::len).sum();
    eprintln!("# of records: {n_records}");

    eprintln!("Start prediction");
    let start = Instant::now();
    let predicted = model.predict_groups(&groups)?;
    check_prediction_count(n_records, predicted.len())?;
    let predictions: Vec<Prediction> = predicted
        .into_iter()
        .zip(groups.iter().flatten())
        .map(|(p, record)| Prediction::new(p, record.outcome.as_str()))
        .collect();
    let duration = start.elapsed();
    eprintln!("Elapsed: {} [sec]", duration.as_secs_f64());

    eprintln!("Saving predictions...");
    fs::create_dir_all(&output)?;
    write_predictions(output.join(PREDICTION_FILE), &predictions)?;
    let ids = read_instance_ids(test_dir.join(INSTANCE_ID_FILE))?;
    let decoder = model_dir.replay_decoder()?;
    let outcomes = if model_dir.learning_mode().is_regression() {
        None
    } else {
        Some(decoder.outcomes())
    };
    write_id2outcome(output.join(ID2OUTCOME_FILE), &predictions, &ids, outcomes)?;

    Ok(())
}

fn replay(model_dir: &ModelDir) -> Result<(), Box<dyn std::error::Error>> {
    let model = model_dir.load_model()?;

    let mut instances = vec![];
    for line in BufReader::new(stdin().lock()).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let instance: Instance = serde_json::from_str(&line)?;
        instances.push(instance);
    }
    eprintln!("# of instances: {}", instances.len());

    let labels = model_dir.replay(&model, &mut instances)?;
    for (i, (instance, label)) in instances.iter().zip(&labels).enumerate() {
        match &instance.id {
            Some(id) => println!("{id}\t{label}"),
            None => println!("{i}\t{label}"),
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    eprintln!("Loading model...");
    let model_dir = ModelDir::open(&args.model)?;
    eprintln!("Backend: {}", model_dir.backend());

    match args.test_dir {
        Some(test_dir) => {
            let output = args.output.unwrap_or_else(|| test_dir.clone());
            score(&model_dir, test_dir, output)
        }
        None => replay(&model_dir),
    }
}
