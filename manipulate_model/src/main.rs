use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use sparsetc::{ModelDir, TrainedModel};

#[derive(Parser, Debug)]
#[command(about = "A program to inspect trained model directories.")]
struct Args {
    /// The model directory
    #[arg(long)]
    model: PathBuf,

    /// Output the feature table as CSV.
    #[arg(long)]
    dump_features: Option<PathBuf>,

    /// Output the outcome table as CSV.
    #[arg(long)]
    dump_outcomes: Option<PathBuf>,

    /// Output the per-label weights of each feature as CSV.
    #[arg(long)]
    dump_weights: Option<PathBuf>,
}

#[derive(Serialize)]
struct FeatureRecord<'a> {
    id: u32,
    name: &'a str,
}

#[derive(Serialize)]
struct OutcomeRecord<'a> {
    id: u32,
    label: &'a str,
}

#[derive(Serialize)]
struct WeightRecord<'a> {
    feature: &'a str,
    label: String,
    weight: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    eprintln!("Loading model...");
    let model_dir = ModelDir::open(&args.model)?;
    let decoder = model_dir.replay_decoder()?;
    eprintln!("Backend: {}", model_dir.backend());
    eprintln!("Learning mode: {}", model_dir.learning_mode());
    eprintln!("Feature mode: {}", model_dir.feature_mode());
    eprintln!("# of features: {}", decoder.features().len());
    eprintln!("# of outcomes: {}", decoder.outcomes().len());

    if let Some(path) = args.dump_features {
        eprintln!("Saving feature table...");
        let mut wtr = csv::Writer::from_writer(fs::File::create(path)?);
        for (name, id) in decoder.features().iter() {
            wtr.serialize(FeatureRecord { id, name })?;
        }
        wtr.flush()?;
    }

    if let Some(path) = args.dump_outcomes {
        eprintln!("Saving outcome table...");
        let mut wtr = csv::Writer::from_writer(fs::File::create(path)?);
        for (label, id) in decoder.outcomes().iter() {
            wtr.serialize(OutcomeRecord { id, label })?;
        }
        wtr.flush()?;
    }

    if let Some(path) = args.dump_weights {
        eprintln!("Saving weights...");
        let model = model_dir.load_model()?;
        let mut wtr = csv::Writer::from_writer(fs::File::create(path)?);
        match &model {
            TrainedModel::Linear(linear) => {
                let labels: Vec<String> = if linear.is_regression() {
                    vec!["value".to_string()]
                } else {
                    linear
                        .labels()
                        .iter()
                        .map(|&code| {
                            decoder
                                .decode_prediction(&code.to_string())
                                .unwrap_or_else(|_| code.to_string())
                        })
                        .collect()
                };
                for (name, id) in decoder.features().iter() {
                    let idx = usize::try_from(id)? - 1;
                    for (label, w) in labels.iter().zip(linear.weights()) {
                        if let Some(&weight) = w.get(idx) {
                            wtr.serialize(WeightRecord {
                                feature: name,
                                label: label.clone(),
                                weight,
                            })?;
                        }
                    }
                }
            }
            TrainedModel::Crf(crf) => {
                let layout = crf.layout();
                for (name, id) in decoder.features().iter() {
                    let feature = usize::try_from(id)? - 1;
                    if feature >= layout.n_features {
                        continue;
                    }
                    for (y, code) in crf.labels().iter().enumerate() {
                        let label = decoder
                            .decode_prediction(code)
                            .unwrap_or_else(|_| code.clone());
                        wtr.serialize(WeightRecord {
                            feature: name,
                            label,
                            weight: crf.params()[layout.state(feature, y)],
                        })?;
                    }
                }
            }
        }
        wtr.flush()?;
    }

    Ok(())
}
