use std::path::PathBuf;

use clap::Parser;
use sparsetc::crf::{CrfAlgorithm, TaggerTrainer};
use sparsetc::{
    read_groups, read_records, Backend, DatasetInfo, LinearParams, LinearTrainer, ModelDir,
    SolverType, TrainedModel, FEATURE_FILE,
};

#[derive(Parser, Debug)]
#[command(about = "A program to train models on encoded datasets.")]
struct Args {
    /// The encoded training dataset directory
    #[arg(long)]
    dataset: PathBuf,

    /// The directory to publish the trained model to
    #[arg(long)]
    model: PathBuf,

    /// The backend. {liblinear, crf}
    #[arg(long, default_value = "liblinear")]
    backend: Backend,

    /// The solver, as a LIBLINEAR `-s` number or short name. Classification datasets take
    /// 0-7, regression datasets 11-13.
    #[arg(long, default_value = "1")]
    solver: SolverType,

    /// The epsilon stopping criterion for classifier training
    #[arg(long, default_value = "0.01")]
    eps: f64,

    /// The cost hyperparameter for classifier training
    #[arg(long, default_value = "1.0")]
    cost: f64,

    /// The CRF training algorithm. {CRF_LabelLikelihood, CRF_StochasticGradient,
    /// CRF_LabelLikelihood_multiThreaded}
    #[arg(long, default_value = "CRF_LabelLikelihood")]
    algorithm: CrfAlgorithm,

    /// The number of worker threads of CRF_LabelLikelihood_multiThreaded
    #[arg(long)]
    threads: Option<usize>,

    /// The variance of the Gaussian prior of CRF weights
    #[arg(long, default_value = "10.0")]
    variance: f64,

    /// The maximum number of CRF optimizer iterations
    #[arg(long, default_value = "100")]
    max_iterations: usize,

    /// The relative objective change at which CRF training stops
    #[arg(long, default_value = "0.0001")]
    tolerance: f64,

    /// The initial learning rate of CRF_StochasticGradient
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let info = DatasetInfo::read(&args.dataset)?;
    let feature_file = args.dataset.join(FEATURE_FILE);

    let model = match args.backend {
        Backend::Liblinear => {
            eprintln!("Loading dataset...");
            let records = read_records(&feature_file)?;
            eprintln!("# of records: {}", records.len());

            eprintln!("Start training...");
            let trainer = LinearTrainer::new(LinearParams {
                solver: args.solver,
                epsilon: args.eps,
                cost: args.cost,
            });
            TrainedModel::Linear(trainer.train(&records, info.learning_mode)?)
        }
        Backend::Crf => {
            eprintln!("Loading dataset...");
            let groups = read_groups(&feature_file)?;
            eprintln!("# of sequences: {}", groups.len());

            let algorithm = match (args.algorithm, args.threads) {
                (CrfAlgorithm::ThreadedLabelLikelihood { .. }, Some(threads)) => {
                    CrfAlgorithm::ThreadedLabelLikelihood { threads }
                }
                (algorithm, _) => algorithm,
            };
            eprintln!("Start training...");
            let trained = TaggerTrainer::new(algorithm)
                .prior_variance(args.variance)
                .max_iterations(args.max_iterations)
                .tolerance(args.tolerance)
                .learning_rate(args.learning_rate)
                .train(&groups)?;
            eprintln!("Training state: {}", trained.state);
            eprintln!("# of iterations: {}", trained.iterations);
            TrainedModel::Crf(trained.model)
        }
    };
    eprintln!("Finish training.");

    eprintln!("Saving model...");
    ModelDir::publish(&args.model, &args.dataset, &model)?;

    Ok(())
}
