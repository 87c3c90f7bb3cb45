//! gridtrain command line interface
//!
//! Train, evaluate, and inspect classifiers over named-feature training
//! files, including cross-validation and grid search.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use gridtrain::core::{ConfusionMatrix, Result, Vector};
use gridtrain::{
    by_accuracy, cross_validate, train_best, Algorithm, BackendPreference, Classifier,
    Distribution, ExecContext, Parameters, TrainingFile,
};
use log::{error, info};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "gridtrain")]
#[command(about = "Classifier training with cross-validation and grid search")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a classifier and persist it
    Train(TrainArgs),
    /// Predict a data file with a persisted classifier
    Predict(PredictArgs),
    /// Cross-validate a parameter set over a data file
    CrossValidate(CrossValidateArgs),
    /// Grid-search around a seed parameter set and persist the winner
    Grid(GridArgs),
    /// Display a persisted classifier
    Info(InfoArgs),
}

#[derive(Args, Clone)]
struct ParamArgs {
    /// Algorithm: logistic-l1, logistic-l2, hinge-l1, hinge-l2,
    /// kernel-linear, kernel-rbf, kernel-sigmoid, kernel-poly
    #[arg(short, long, default_value = "logistic-l2")]
    algorithm: String,

    /// Regularization parameter C
    #[arg(short = 'C', long, default_value = "1.0")]
    c: f64,

    /// Bias feature value (linear algorithms; omit for no bias)
    #[arg(long)]
    bias: Option<f64>,

    /// Kernel gamma
    #[arg(long)]
    gamma: Option<f64>,

    /// Kernel coefficient (sigmoid and polynomial)
    #[arg(long)]
    coef0: Option<f64>,

    /// Polynomial degree
    #[arg(long)]
    degree: Option<u32>,

    /// Number of labels (defaults to the highest label in the data plus one)
    #[arg(long)]
    num_labels: Option<usize>,
}

impl ParamArgs {
    fn build(&self, data_labels: usize) -> Result<Parameters> {
        let algorithm = Algorithm::parse(&self.algorithm)?;
        let num_labels = self.num_labels.unwrap_or(data_labels);
        let mut params = Parameters::new(algorithm, num_labels).with_c(self.c);
        if let Some(bias) = self.bias {
            params = params.with_bias(bias);
        }
        if let Some(gamma) = self.gamma {
            params = params.with_gamma(gamma);
        }
        if let Some(coef0) = self.coef0 {
            params = params.with_coef0(coef0);
        }
        if let Some(degree) = self.degree {
            params = params.with_degree(degree);
        }
        params.validate()?;
        Ok(params)
    }
}

#[derive(ValueEnum, Clone, Debug)]
enum CliBackend {
    /// Probe for external tools, fall back to in-process
    Auto,
    /// Always use the in-process solvers
    InProcess,
    /// Always spawn the external tools
    External,
}

impl From<CliBackend> for BackendPreference {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Auto => BackendPreference::Auto,
            CliBackend::InProcess => BackendPreference::InProcess,
            CliBackend::External => BackendPreference::External,
        }
    }
}

#[derive(Args, Clone)]
struct ContextArgs {
    /// Worker threads (defaults to available cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Backend selection
    #[arg(long, default_value = "auto")]
    backend: CliBackend,
}

impl ContextArgs {
    fn build(&self) -> Result<ExecContext> {
        let ctx = match self.threads {
            Some(threads) => ExecContext::with_threads(threads)?,
            None => ExecContext::new()?,
        };
        Ok(ctx.with_preference(self.backend.clone().into()))
    }
}

#[derive(Args)]
struct TrainArgs {
    /// Training data file (label name:value ...)
    #[arg(long)]
    data: PathBuf,

    /// Output model root (directory, or .zip for an archive)
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    params: ParamArgs,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Args)]
struct PredictArgs {
    /// Persisted model root
    #[arg(short, long)]
    model: PathBuf,

    /// Input data file (labels present are echoed as gold)
    #[arg(long)]
    data: PathBuf,

    /// Request per-class probabilities
    #[arg(short, long)]
    probabilities: bool,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Args)]
struct CrossValidateArgs {
    /// Data file
    #[arg(long)]
    data: PathBuf,

    /// Number of folds
    #[arg(short, long, default_value = "5")]
    folds: usize,

    /// Cap on vectors per fold
    #[arg(long, default_value = "1000000")]
    max_per_fold: usize,

    #[command(flatten)]
    params: ParamArgs,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Args)]
struct GridArgs {
    /// Training data file
    #[arg(long)]
    data: PathBuf,

    /// Output model root for the retrained winner
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of candidates
    #[arg(long, default_value = "16")]
    max_combinations: usize,

    /// Multiplier between neighbouring grid points
    #[arg(long, default_value = "10.0")]
    multiplier: f64,

    /// Cap on vectors per partition
    #[arg(long, default_value = "1000000")]
    max_per_partition: usize,

    #[command(flatten)]
    params: ParamArgs,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Args)]
struct InfoArgs {
    /// Persisted model root
    model: PathBuf,

    #[command(flatten)]
    context: ContextArgs,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Predict(args) => predict_command(args),
        Commands::CrossValidate(args) => cross_validate_command(args),
        Commands::Grid(args) => grid_command(args),
        Commands::Info(args) => info_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn train_command(args: TrainArgs) -> Result<()> {
    let ctx = args.context.build()?;
    let file = TrainingFile::from_file(&args.data)?;
    info!("loaded {} examples from {:?}", file.len(), args.data);

    let params = args.params.build(file.num_labels())?;
    let classifier = Classifier::train(&ctx, &params, file.examples())?;
    classifier.write_to(&args.output)?;
    info!("model saved to {:?}", args.output);

    // Resubstitution accuracy as a quick sanity figure
    let inputs: Vec<Vector> = file.examples().iter().map(|e| e.vector().clone()).collect();
    let predicted = classifier.predict_batch(&inputs, false)?;
    let matrix = gridtrain::evaluate(file.examples(), &predicted, params.num_labels())?;

    println!("model: {classifier}");
    println!("training accuracy: {:.2}%", matrix.accuracy() * 100.0);
    Ok(())
}

fn predict_command(args: PredictArgs) -> Result<()> {
    let ctx = args.context.build()?;
    let classifier = Classifier::read_from(&ctx, &args.model)?;
    let file = TrainingFile::from_file(&args.data)?;

    let inputs: Vec<Vector> = file.examples().iter().map(|e| e.vector().clone()).collect();
    let predictions = classifier.predict_batch(&inputs, args.probabilities)?;

    println!("# index gold predicted{}", if args.probabilities { " p(predicted)" } else { "" });
    for (i, (gold, predicted)) in file.examples().iter().zip(predictions.iter()).enumerate() {
        if args.probabilities {
            println!(
                "{} {} {} {:.6}",
                i,
                gold.label(),
                predicted.label(),
                predicted.probability_of(predicted.label())
            );
            if let Distribution::Explicit(probs) = predicted.distribution() {
                info!("distribution {i}: {probs:?}");
            }
        } else {
            println!("{} {} {}", i, gold.label(), predicted.label());
        }
    }
    Ok(())
}

fn cross_validate_command(args: CrossValidateArgs) -> Result<()> {
    let ctx = args.context.build()?;
    let file = TrainingFile::from_file(&args.data)?;
    let params = args.params.build(file.num_labels())?;

    let matrix = cross_validate(&ctx, &params, file.examples(), args.folds, args.max_per_fold)?;

    println!("=== Cross-Validation Results ===");
    println!("folds: {}", args.folds);
    print_matrix(&matrix);
    Ok(())
}

fn grid_command(args: GridArgs) -> Result<()> {
    let ctx = args.context.build()?;
    let file = TrainingFile::from_file(&args.data)?;
    let seed = args.params.build(file.num_labels())?;

    let grid = seed.grid(args.max_combinations, args.multiplier);
    info!("searching {} candidates", grid.len());

    let (classifier, matrix) = train_best(
        &ctx,
        &grid,
        file.examples(),
        by_accuracy,
        args.max_per_partition,
    )?;

    println!("=== Grid Search Results ===");
    println!("candidates: {}", grid.len());
    println!("winning parameters:\n{}", classifier.parameters().to_properties());
    print_matrix(&matrix);

    if let Some(output) = &args.output {
        classifier.write_to(output)?;
        println!("model saved to {output:?}");
    }
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    let ctx = args.context.build()?;
    let classifier = Classifier::read_from(&ctx, &args.model)?;

    println!("=== Model Info ===");
    println!("hash: {classifier}");
    println!("algorithm: {}", classifier.parameters().algorithm());
    println!("labels: {}", classifier.parameters().num_labels());
    println!("features: {}", classifier.dictionary().len());
    println!("parameters:\n{}", classifier.parameters().to_properties());
    Ok(())
}

fn print_matrix(matrix: &ConfusionMatrix) {
    println!("vectors: {}", matrix.total());
    println!("accuracy: {:.2}%", matrix.accuracy() * 100.0);
    for label in 0..matrix.num_labels() {
        println!(
            "label {label}: precision {:.4} recall {:.4} f1 {:.4}",
            matrix.precision(label),
            matrix.recall(label),
            matrix.f1(label)
        );
    }
    println!("macro-F1: {:.4}", matrix.macro_f1());
}
