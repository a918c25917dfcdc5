use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics from one scoring pass over a dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreMetrics {
    /// Number of rows scored.
    pub rows_scored: usize,
    /// Smallest raw reconstruction error.
    pub min_error: f64,
    /// Largest raw reconstruction error.
    pub max_error: f64,
    /// Mean raw reconstruction error.
    pub mean_error: f64,
    /// Mean normalized score.
    pub mean_score: f64,
    /// Wall time of the pass in milliseconds.
    pub duration_ms: u64,
    /// Throughput of the pass.
    pub rows_per_second: f64,
    /// When the pass finished.
    pub scored_at: Option<DateTime<Utc>>,
}

impl ScoreMetrics {
    /// Summarize raw errors and their normalized scores.
    pub fn record(errors: &[f64], scores: &[f64], elapsed: Duration) -> Self {
        let rows = errors.len();
        let elapsed_secs = elapsed.as_secs_f64();

        let (min_error, max_error) = if rows == 0 {
            (0.0, 0.0)
        } else {
            errors
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &e| {
                    (lo.min(e), hi.max(e))
                })
        };

        Self {
            rows_scored: rows,
            min_error,
            max_error,
            mean_error: mean(errors),
            mean_score: mean(scores),
            duration_ms: elapsed.as_millis() as u64,
            rows_per_second: if elapsed_secs > 0.0 {
                rows as f64 / elapsed_secs
            } else {
                0.0
            },
            scored_at: Some(Utc::now()),
        }
    }
}

/// Row counts from fitting, persisted with the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingCounts {
    /// Rows in the fit dataset.
    pub total_rows: usize,
    /// Rows dropped because their label marked them as anomalies.
    pub excluded_rows: usize,
    /// Rows PCA was fitted on.
    pub trained_rows: usize,
}

/// Human-facing description of a fitted model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub uid: String,
    pub k: usize,
    pub dim: usize,
    pub explained_variance: Vec<f64>,
    /// Running sum of `explained_variance`.
    pub cumulative_explained_variance: Vec<f64>,
    pub training: TrainingCounts,
    pub fitted_at: DateTime<Utc>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
