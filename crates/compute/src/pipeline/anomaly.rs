//! PCA reconstruction-error anomaly detection.
//!
//! [`PcaAnomaly`] fits a principal component basis on rows not labeled as
//! anomalies. [`PcaAnomalyModel`] projects every row onto that basis, maps it
//! back, and scores the squared distance between the row and its
//! reconstruction. Scores are min-max normalized over the whole dataset, so
//! the worst-reconstructed row scores 1.0.

use std::path::Path;
use std::time::Instant;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pcad_core::dataset::{label_column, scalars_to_array, vector_column, vectors_to_array, with_column};
use pcad_core::{PcadError, Result};

use super::metrics::{ModelSummary, ScoreMetrics, TrainingCounts};
use super::params::PcaAnomalyParams;
use super::{random_uid, Estimator, Transformer};
use crate::algorithms::pca::{fit_pca, squared_error, PcaFit};

/// Class tag written into model files.
const MODEL_CLASS: &str = "PcaAnomalyModel";

/// Model file layout version.
const FORMAT_VERSION: u32 = 1;

// ── Estimator ─────────────────────────────────────────────────────────

/// Estimator that fits a [`PcaAnomalyModel`].
#[derive(Debug, Clone)]
pub struct PcaAnomaly {
    uid: String,
    params: PcaAnomalyParams,
}

impl Default for PcaAnomaly {
    fn default() -> Self {
        Self::new()
    }
}

impl PcaAnomaly {
    pub fn new() -> Self {
        Self::with_params(PcaAnomalyParams::default())
    }

    pub fn with_params(params: PcaAnomalyParams) -> Self {
        Self {
            uid: random_uid("PcaAnomaly"),
            params,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn params(&self) -> &PcaAnomalyParams {
        &self.params
    }

    pub fn set_k(mut self, k: usize) -> Self {
        self.params.k = k;
        self
    }

    pub fn set_input_col(mut self, col: impl Into<String>) -> Self {
        self.params.input_col = col.into();
        self
    }

    pub fn set_output_col(mut self, col: impl Into<String>) -> Self {
        self.params.output_col = col.into();
        self
    }

    /// `None` fits on every row.
    pub fn set_label_col(mut self, col: Option<&str>) -> Self {
        self.params.label_col = col.map(str::to_string);
        self
    }

    pub fn set_score_col(mut self, col: impl Into<String>) -> Self {
        self.params.score_col = col.into();
        self
    }

    pub fn set_error_col(mut self, col: Option<&str>) -> Self {
        self.params.error_col = col.map(str::to_string);
        self
    }

    pub fn set_normal_label(mut self, label: f64) -> Self {
        self.params.normal_label = label;
        self
    }

    pub fn set_center(mut self, center: bool) -> Self {
        self.params.center = center;
        self
    }

    /// Fit PCA on the rows of `batch` whose label is normal.
    ///
    /// Rows with a null label are kept. Without a label column every row is
    /// used.
    pub fn fit(&self, batch: &RecordBatch) -> Result<PcaAnomalyModel> {
        let params = &self.params;
        params.validate_fit_schema(&batch.schema())?;

        let rows = vector_column(batch, &params.input_col)?;
        let total_rows = rows.len();

        let training: Vec<Vec<f64>> = match &params.label_col {
            Some(label) => {
                let labels = label_column(batch, label)?;
                rows.into_iter()
                    .zip(labels)
                    .filter(|(_, l)| is_normal(*l, params.normal_label))
                    .map(|(row, _)| row)
                    .collect()
            }
            None => rows,
        };

        let counts = TrainingCounts {
            total_rows,
            excluded_rows: total_rows - training.len(),
            trained_rows: training.len(),
        };
        if training.is_empty() {
            return Err(PcadError::EmptyTrainingSet);
        }

        info!(
            uid = %self.uid,
            k = params.k,
            total = counts.total_rows,
            excluded = counts.excluded_rows,
            "Fitting PCA anomaly model"
        );

        let start = Instant::now();
        let pca = fit_pca(&training, params.k, params.center)?;

        info!(
            uid = %self.uid,
            dim = pca.dim(),
            explained = ?pca.explained_variance,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "PCA fit complete"
        );

        Ok(PcaAnomalyModel {
            uid: self.uid.clone(),
            params: params.clone(),
            pca,
            training: counts,
            fitted_at: Utc::now(),
        })
    }
}

impl Estimator for PcaAnomaly {
    type Model = PcaAnomalyModel;

    fn uid(&self) -> &str {
        &self.uid
    }

    fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        self.params.transform_schema(schema)
    }

    fn fit(&self, batch: &RecordBatch) -> Result<PcaAnomalyModel> {
        PcaAnomaly::fit(self, batch)
    }
}

fn is_normal(label: Option<f64>, normal: f64) -> bool {
    match label {
        Some(value) => value == normal,
        None => true,
    }
}

// ── Model ─────────────────────────────────────────────────────────────

/// Fitted model; scores rows by reconstruction error.
#[derive(Debug, Clone)]
pub struct PcaAnomalyModel {
    uid: String,
    params: PcaAnomalyParams,
    pca: PcaFit,
    training: TrainingCounts,
    fitted_at: DateTime<Utc>,
}

/// On-disk model layout.
#[derive(Serialize, Deserialize)]
struct ModelFile {
    class: String,
    format_version: u32,
    uid: String,
    fitted_at: DateTime<Utc>,
    params: PcaAnomalyParams,
    training: TrainingCounts,
    pca: PcaFit,
}

impl PcaAnomalyModel {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn params(&self) -> &PcaAnomalyParams {
        &self.params
    }

    pub fn pca(&self) -> &PcaFit {
        &self.pca
    }

    pub fn training(&self) -> TrainingCounts {
        self.training
    }

    /// Change the score column used by later transforms.
    pub fn set_score_col(mut self, col: impl Into<String>) -> Self {
        self.params.score_col = col.into();
        self
    }

    /// Change the raw error column used by later transforms.
    pub fn set_error_col(mut self, col: Option<&str>) -> Self {
        self.params.error_col = col.map(str::to_string);
        self
    }

    pub fn summary(&self) -> ModelSummary {
        let cumulative = self
            .pca
            .explained_variance
            .iter()
            .scan(0.0, |acc, v| {
                *acc += v;
                Some(*acc)
            })
            .collect();

        ModelSummary {
            uid: self.uid.clone(),
            k: self.pca.k(),
            dim: self.pca.dim(),
            explained_variance: self.pca.explained_variance.clone(),
            cumulative_explained_variance: cumulative,
            training: self.training,
            fitted_at: self.fitted_at,
        }
    }

    /// Score `batch` and return it with the output columns appended, along
    /// with statistics about the pass.
    pub fn score(&self, batch: &RecordBatch) -> Result<(RecordBatch, ScoreMetrics)> {
        let start = Instant::now();
        self.params.transform_schema(&batch.schema())?;

        let rows = vector_column(batch, &self.params.input_col)?;
        if let Some(first) = rows.first() {
            if first.len() != self.pca.dim() {
                return Err(PcadError::DimensionMismatch {
                    row: 0,
                    expected: self.pca.dim(),
                    found: first.len(),
                });
            }
        }

        let (projections, errors) = project_rows(&self.pca, &rows);
        let scores = min_max_normalize(&errors);

        let mut out = with_column(batch, &self.params.output_col, vectors_to_array(&projections))?;
        if let Some(error_col) = &self.params.error_col {
            out = with_column(&out, error_col, scalars_to_array(&errors))?;
        }
        out = with_column(&out, &self.params.score_col, scalars_to_array(&scores))?;

        let metrics = ScoreMetrics::record(&errors, &scores, start.elapsed());
        info!(
            uid = %self.uid,
            rows = metrics.rows_scored,
            min_error = metrics.min_error,
            max_error = metrics.max_error,
            duration_ms = metrics.duration_ms,
            "Scored dataset"
        );
        Ok((out, metrics))
    }

    /// Write the model as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = ModelFile {
            class: MODEL_CLASS.to_string(),
            format_version: FORMAT_VERSION,
            uid: self.uid.clone(),
            fitted_at: self.fitted_at,
            params: self.params.clone(),
            training: self.training,
            pca: self.pca.clone(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        info!(uid = %self.uid, path = %path.display(), "Saved model");
        Ok(())
    }

    /// Read a model written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ModelFile = serde_json::from_str(&content)?;

        if file.class != MODEL_CLASS {
            return Err(PcadError::IncompatibleModel(format!(
                "expected class {}, found {}",
                MODEL_CLASS, file.class
            )));
        }
        if file.format_version != FORMAT_VERSION {
            return Err(PcadError::IncompatibleModel(format!(
                "unsupported format version {}",
                file.format_version
            )));
        }
        file.params.validate()?;

        let pca = &file.pca;
        if pca.k() != file.params.k
            || pca.explained_variance.len() != pca.k()
            || pca.components.iter().any(|pc| pc.len() != pca.dim())
        {
            return Err(PcadError::IncompatibleModel(
                "component shapes do not match k and dimension".to_string(),
            ));
        }
        if pca.center != file.params.center {
            return Err(PcadError::IncompatibleModel(format!(
                "params center={} but fitted basis center={}",
                file.params.center, pca.center
            )));
        }

        debug!(uid = %file.uid, path = %path.display(), "Loaded model");
        Ok(Self {
            uid: file.uid,
            params: file.params,
            pca: file.pca,
            training: file.training,
            fitted_at: file.fitted_at,
        })
    }
}

impl Transformer for PcaAnomalyModel {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        self.params.transform_schema(schema)
    }

    fn transform(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        self.score(batch).map(|(out, _)| out)
    }
}

// ── Scoring ───────────────────────────────────────────────────────────

/// Project every row and compute its squared reconstruction error.
fn project_rows(pca: &PcaFit, rows: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<f64>) {
    rows.par_iter()
        .map(|x| {
            let projection = pca.project(x);
            let error = squared_error(x, &pca.reconstruct(&projection));
            (projection, error)
        })
        .unzip()
}

/// Squared reconstruction error of each row.
pub fn reconstruction_errors(pca: &PcaFit, rows: &[Vec<f64>]) -> Vec<f64> {
    project_rows(pca, rows).1
}

/// Rescale values to [0, 1] using the dataset minimum and maximum.
///
/// When every value is equal (including a single value) all scores are 0.
/// NaN inputs stay NaN. Errors that overflowed to `+inf` score 1.0 and the
/// finite values are rescaled over their own range.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let has_finite = min <= max;
    let has_pos_inf = values.iter().any(|&v| v == f64::INFINITY);
    let has_neg_inf = values.iter().any(|&v| v == f64::NEG_INFINITY);
    // all non-NaN values are the same infinity
    let all_equal_inf = !has_finite && (has_pos_inf != has_neg_inf);

    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                f64::NAN
            } else if v == f64::INFINITY {
                if all_equal_inf { 0.0 } else { 1.0 }
            } else if v == f64::NEG_INFINITY || max <= min {
                0.0
            } else {
                scale(v, min, max)
            }
        })
        .collect()
}

fn scale(v: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    let scaled = if range.is_finite() {
        (v - min) / range
    } else {
        (v / 2.0 - min / 2.0) / (max / 2.0 - min / 2.0)
    };
    scaled.clamp(0.0, 1.0)
}

/// Indices and values of the `n` highest scores, highest first.
///
/// NaN scores are ignored.
pub fn top_scores(scores: &[f64], n: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}
