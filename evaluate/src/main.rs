use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use sparsetc::{
    evaluate_predictions, read_predictions, FoldAverage, LearningMode, ModelDir,
    RegressionEvaluation,
};

#[derive(Parser, Debug)]
#[command(about = "A program to evaluate prediction files.")]
struct Args {
    /// Prediction files, one per fold
    #[arg(required = true)]
    predictions: Vec<PathBuf>,

    /// The model directory used to decode outcome codes into labels
    #[arg(long)]
    model: Option<PathBuf>,

    /// The learning mode when no model is given. {singleLabel, regression}
    #[arg(long, default_value = "singleLabel", conflicts_with = "model")]
    learning_mode: LearningMode,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let (learning_mode, decoder) = match &args.model {
        Some(path) => {
            eprintln!("Loading model...");
            let model_dir = ModelDir::open(path)?;
            (model_dir.learning_mode(), Some(model_dir.replay_decoder()?))
        }
        None => (args.learning_mode, None),
    };
    learning_mode.ensure_supported()?;

    let mut folds = FoldAverage::new();
    for path in &args.predictions {
        eprintln!("Loading {path:?} ...");
        let predictions = read_predictions(path)?;
        eprintln!("# of predictions: {}", predictions.len());

        println!("# {}", path.display());
        if learning_mode.is_regression() {
            println!("{}", RegressionEvaluation::evaluate(&predictions)?);
            continue;
        }
        let evaluation = match &decoder {
            Some(decoder) => evaluate_predictions(
                &predictions,
                decoder.outcomes().iter().map(|(label, _)| label),
                |code| decoder.decode_prediction(code),
            )?,
            None => {
                let labels: BTreeSet<&str> = predictions
                    .iter()
                    .flat_map(|p| [p.gold.as_str(), p.predicted.as_str()])
                    .collect();
                evaluate_predictions(&predictions, labels, |code| Ok(code.to_string()))?
            }
        };
        println!("{evaluation}");
        folds.push(evaluation);
    }

    if folds.n_folds() > 1 {
        println!("# average of {} folds", folds.n_folds());
        println!("{}", folds.average());
    }

    Ok(())
}
