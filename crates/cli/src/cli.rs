use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// PCA reconstruction-error anomaly scoring for tabular datasets.
///
/// Fits a principal component basis on rows not labeled as anomalies and
/// scores every row by how badly that basis reconstructs it.
#[derive(Parser, Debug)]
#[command(name = "pcad", version, about)]
pub struct CliArgs {
    /// Config profile; keys resolve as {PROFILE}_{KEY} before {KEY}
    #[arg(long, global = true, env = "PCAD_PROFILE")]
    pub profile: Option<String>,

    /// Scoring threads (0 = all cores, overrides WORKER_THREADS)
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fit a model and write it as JSON
    Fit(FitArgs),
    /// Score a dataset with a saved model
    Score(ScoreArgs),
    /// Fit on a dataset and score the same dataset
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}

/// Dataset input shared by every data command.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Parquet file to read
    #[arg(long)]
    pub input: PathBuf,

    /// Scalar columns to assemble into the input vector column (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub assemble: Vec<String>,

    /// Vector input column (default: INPUT_COL)
    #[arg(long)]
    pub input_col: Option<String>,
}

/// Estimator parameters; unset values come from the config.
#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Number of principal components (default: PCA_K)
    #[arg(long)]
    pub k: Option<usize>,

    /// Label column used to exclude anomalies from fitting (default: LABEL_COL)
    #[arg(long, conflicts_with = "no_label")]
    pub label_col: Option<String>,

    /// Fit on every row regardless of labels
    #[arg(long)]
    pub no_label: bool,

    /// Label value of normal rows
    #[arg(long, default_value_t = 0.0)]
    pub normal_label: f64,

    /// Mean-center rows before projecting
    #[arg(long)]
    pub center: bool,
}

/// Output options for scoring commands.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Parquet file to write the scored dataset to
    #[arg(long)]
    pub output: PathBuf,

    /// Also write the raw reconstruction error to this column
    #[arg(long)]
    pub error_col: Option<String>,

    /// Number of highest-scoring rows to print
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub model_args: ModelArgs,

    /// Where to write the model (default: MODEL_PATH)
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Model to load (default: MODEL_PATH)
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub model_args: ModelArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Also save the fitted model here
    #[arg(long)]
    pub model: Option<PathBuf>,
}
