mod cli;

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use tracing::{info, warn};

use pcad_compute::pipeline::anomaly::top_scores;
use pcad_compute::{PcaAnomaly, PcaAnomalyModel, PcaAnomalyParams, ScoreMetrics, Transformer, VectorAssembler};
use pcad_core::config::{load_dotenv, ModelConfig};
use pcad_core::dataset::{label_column, read_parquet, write_parquet};
use pcad_core::Config;

use crate::cli::{CliArgs, Command, InputArgs, ModelArgs, OutputArgs};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let config = match &args.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();

    let threads = args.threads.unwrap_or(config.runtime.worker_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("failed to initialize scoring thread pool")?;

    match args.command {
        Command::Fit(fit) => {
            let batch = load_input(&fit.input, &config.model)?;
            let model = fit_model(&batch, &fit.input, &fit.model_args, &config.model)?;
            let path = fit.model.unwrap_or_else(|| config.storage.model_path.clone());
            model
                .save(&path)
                .with_context(|| format!("failed to save model: {}", path.display()))?;
            print_summary(&model)?;
        }
        Command::Score(score) => {
            let path = score
                .model
                .clone()
                .unwrap_or_else(|| config.storage.model_path.clone());
            let model = PcaAnomalyModel::load(&path)
                .with_context(|| format!("failed to load model: {}", path.display()))?;
            let model = match &score.output.error_col {
                Some(col) => model.set_error_col(Some(col.as_str())),
                None => model,
            };

            let input_col = model.params().input_col.clone();
            if let Some(col) = score.input.input_col.as_deref().filter(|c| *c != input_col) {
                warn!(requested = col, model = %input_col, "Ignoring --input-col; the model's input column is used");
            }
            let batch = load_input_into(&score.input, &input_col)?;
            score_and_write(&model, &batch, &score.output)?;
        }
        Command::Run(run) => {
            let batch = load_input(&run.input, &config.model)?;
            let model = fit_model(&batch, &run.input, &run.model_args, &config.model)?;
            let model = match &run.output.error_col {
                Some(col) => model.set_error_col(Some(col.as_str())),
                None => model,
            };
            if let Some(path) = &run.model {
                model
                    .save(path)
                    .with_context(|| format!("failed to save model: {}", path.display()))?;
            }
            print_summary(&model)?;
            score_and_write(&model, &batch, &run.output)?;
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        }
    }

    Ok(())
}

/// Read the dataset, assembling the vector column when requested.
fn load_input(input: &InputArgs, defaults: &ModelConfig) -> Result<RecordBatch> {
    let input_col = input
        .input_col
        .clone()
        .unwrap_or_else(|| defaults.input_col.clone());
    load_input_into(input, &input_col)
}

fn load_input_into(input: &InputArgs, input_col: &str) -> Result<RecordBatch> {
    let batch = read_parquet(&input.input)
        .with_context(|| format!("failed to read dataset: {}", input.input.display()))?;
    if input.assemble.is_empty() {
        return Ok(batch);
    }

    VectorAssembler::new(input.assemble.clone(), input_col)
        .transform(&batch)
        .context("failed to assemble feature vectors")
}

fn resolve_params(input: &InputArgs, args: &ModelArgs, defaults: &ModelConfig) -> PcaAnomalyParams {
    let mut params = PcaAnomalyParams::from(defaults);
    if let Some(k) = args.k {
        params.k = k;
    }
    if let Some(col) = &input.input_col {
        params.input_col = col.clone();
    }
    if args.no_label {
        params.label_col = None;
    } else if let Some(col) = &args.label_col {
        params.label_col = Some(col.clone());
    }
    params.normal_label = args.normal_label;
    params.center = params.center || args.center;
    params
}

fn fit_model(
    batch: &RecordBatch,
    input: &InputArgs,
    args: &ModelArgs,
    defaults: &ModelConfig,
) -> Result<PcaAnomalyModel> {
    let params = resolve_params(input, args, defaults);
    PcaAnomaly::with_params(params)
        .fit(batch)
        .context("failed to fit PCA anomaly model")
}

fn score_and_write(model: &PcaAnomalyModel, batch: &RecordBatch, output: &OutputArgs) -> Result<()> {
    let (scored, metrics) = model.score(batch).context("failed to score dataset")?;
    write_parquet(&output.output, &scored)
        .with_context(|| format!("failed to write scores: {}", output.output.display()))?;

    print_top(model, &scored, &metrics, output.top)?;
    info!(output = %output.output.display(), "Done");
    Ok(())
}

fn print_summary(model: &PcaAnomalyModel) -> Result<()> {
    let summary = model.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_top(
    model: &PcaAnomalyModel,
    scored: &RecordBatch,
    metrics: &ScoreMetrics,
    n: usize,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }

    let params = model.params();
    let scores: Vec<f64> = label_column(scored, &params.score_col)?
        .into_iter()
        .map(|s| s.unwrap_or(f64::NAN))
        .collect();
    let labels = match &params.label_col {
        Some(col) if scored.column_by_name(col).is_some() => Some(label_column(scored, col)?),
        _ => None,
    };

    println!(
        "scored {} rows in {} ms (error range {:.6} .. {:.6})",
        metrics.rows_scored, metrics.duration_ms, metrics.min_error, metrics.max_error
    );
    println!("{:>8}  {:>10}  {:>8}", "row", "score", "label");
    for (row, score) in top_scores(&scores, n) {
        let label = labels
            .as_ref()
            .and_then(|l| l[row])
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>8}  {:>10.6}  {:>8}", row, score, label);
    }
    Ok(())
}
