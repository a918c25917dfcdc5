//! Fit-then-apply pipeline stages over Arrow record batches.
//!
//! A [`Pipeline`] is an ordered list of stages:
//!
//! - **Transformers** map a batch to a new batch (e.g. [`VectorAssembler`]).
//! - **Estimators** are fitted on the batch produced by the stages before
//!   them and yield a transformer (e.g. [`PcaAnomaly`] → [`PcaAnomalyModel`]).
//!
//! Fitting a pipeline produces a [`PipelineModel`] holding only transformers.

pub mod anomaly;
pub mod assembler;
pub mod metrics;
pub mod params;

use std::time::Instant;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use tracing::{debug, info};
use uuid::Uuid;

use pcad_core::Result;

pub use self::anomaly::{PcaAnomaly, PcaAnomalyModel};
pub use self::assembler::VectorAssembler;
pub use self::metrics::{ModelSummary, ScoreMetrics, TrainingCounts};
pub use self::params::PcaAnomalyParams;

/// Unique stage identifier, e.g. `PcaAnomaly_3f2a9c01b7de`.
pub(crate) fn random_uid(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..12])
}

/// A stage that maps one batch to another.
pub trait Transformer: Send + Sync {
    fn uid(&self) -> &str;

    /// Schema of the batch [`transform`](Self::transform) would return.
    fn transform_schema(&self, schema: &Schema) -> Result<Schema>;

    fn transform(&self, batch: &RecordBatch) -> Result<RecordBatch>;
}

/// A stage that is fitted on a batch and yields a [`Transformer`].
pub trait Estimator: Send + Sync {
    type Model: Transformer + 'static;

    fn uid(&self) -> &str;

    /// Schema the fitted model's transform would produce.
    fn transform_schema(&self, schema: &Schema) -> Result<Schema>;

    fn fit(&self, batch: &RecordBatch) -> Result<Self::Model>;
}

/// Object-safe view of an [`Estimator`], used to store mixed stages.
pub trait DynEstimator: Send + Sync {
    fn stage_uid(&self) -> &str;

    fn stage_schema(&self, schema: &Schema) -> Result<Schema>;

    fn fit_boxed(&self, batch: &RecordBatch) -> Result<Box<dyn Transformer>>;
}

impl<E: Estimator> DynEstimator for E {
    fn stage_uid(&self) -> &str {
        Estimator::uid(self)
    }

    fn stage_schema(&self, schema: &Schema) -> Result<Schema> {
        Estimator::transform_schema(self, schema)
    }

    fn fit_boxed(&self, batch: &RecordBatch) -> Result<Box<dyn Transformer>> {
        Ok(Box::new(Estimator::fit(self, batch)?))
    }
}

/// One pipeline stage.
pub enum Stage {
    Transformer(Box<dyn Transformer>),
    Estimator(Box<dyn DynEstimator>),
}

impl Stage {
    pub fn transformer(t: impl Transformer + 'static) -> Self {
        Self::Transformer(Box::new(t))
    }

    pub fn estimator(e: impl Estimator + 'static) -> Self {
        Self::Estimator(Box::new(e))
    }

    fn uid(&self) -> &str {
        match self {
            Self::Transformer(t) => t.uid(),
            Self::Estimator(e) => e.stage_uid(),
        }
    }

    fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        match self {
            Self::Transformer(t) => t.transform_schema(schema),
            Self::Estimator(e) => e.stage_schema(schema),
        }
    }
}

/// Ordered list of stages, fitted as a unit.
pub struct Pipeline {
    uid: String,
    stages: Vec<Stage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            uid: random_uid("Pipeline"),
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Schema produced by running every stage in order.
    pub fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        let mut current = schema.clone();
        for stage in &self.stages {
            current = stage.transform_schema(&current)?;
        }
        Ok(current)
    }

    /// Fit every estimator on the output of the stages before it.
    ///
    /// The whole chain's schema is checked before any data is touched. The
    /// batch is not transformed past the last estimator.
    pub fn fit(self, batch: &RecordBatch) -> Result<PipelineModel> {
        let start = Instant::now();
        self.transform_schema(&batch.schema())?;

        let last_estimator = self
            .stages
            .iter()
            .rposition(|s| matches!(s, Stage::Estimator(_)));

        let mut current = batch.clone();
        let mut fitted: Vec<Box<dyn Transformer>> = Vec::with_capacity(self.stages.len());

        for (i, stage) in self.stages.into_iter().enumerate() {
            let stage_uid = stage.uid().to_string();
            let transformer = match stage {
                Stage::Transformer(t) => t,
                Stage::Estimator(e) => {
                    debug!(stage = %stage_uid, rows = current.num_rows(), "Fitting stage");
                    e.fit_boxed(&current)?
                }
            };
            if last_estimator.is_some_and(|last| i < last) {
                current = transformer.transform(&current)?;
            }
            fitted.push(transformer);
        }

        info!(
            pipeline = %self.uid,
            stages = fitted.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline fit complete"
        );

        Ok(PipelineModel {
            uid: self.uid,
            stages: fitted,
        })
    }
}

/// A fitted pipeline: every stage is a transformer.
pub struct PipelineModel {
    uid: String,
    stages: Vec<Box<dyn Transformer>>,
}

impl PipelineModel {
    pub fn stages(&self) -> &[Box<dyn Transformer>] {
        &self.stages
    }
}

impl Transformer for PipelineModel {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        let mut current = schema.clone();
        for stage in &self.stages {
            current = stage.transform_schema(&current)?;
        }
        Ok(current)
    }

    fn transform(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mut current = batch.clone();
        for stage in &self.stages {
            current = stage.transform(&current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Float64Array, Int32Array};
    use pcad_core::PcadError;

    fn raw_batch() -> RecordBatch {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut y = x.clone();
        y[9] = -9.0;
        let labels: Vec<i32> = (0..10).map(|i| if i == 9 { 1 } else { 0 }).collect();

        RecordBatch::try_from_iter(vec![
            ("x", Arc::new(Float64Array::from(x)) as ArrayRef),
            ("y", Arc::new(Float64Array::from(y)) as ArrayRef),
            ("label", Arc::new(Int32Array::from(labels)) as ArrayRef),
        ])
        .unwrap()
    }

    fn pipeline() -> Pipeline {
        Pipeline::new()
            .stage(Stage::transformer(VectorAssembler::new(
                vec!["x".to_string(), "y".to_string()],
                "features",
            )))
            .stage(Stage::estimator(PcaAnomaly::new().set_k(1)))
    }

    #[test]
    fn uid_has_prefix_and_suffix() {
        let uid = random_uid("PcaAnomaly");
        assert!(uid.starts_with("PcaAnomaly_"));
        assert_eq!(uid.len(), "PcaAnomaly_".len() + 12);
        assert_ne!(uid, random_uid("PcaAnomaly"));
    }

    #[test]
    fn fit_then_transform_runs_every_stage() {
        let batch = raw_batch();
        let model = pipeline().fit(&batch).unwrap();
        assert_eq!(model.stages().len(), 2);

        let out = model.transform(&batch).unwrap();
        let scores = out
            .column_by_name("anomaly_score")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(scores.len(), 10);
        assert_eq!(scores.value(9), 1.0);

        let expected = model.transform_schema(&batch.schema()).unwrap();
        let actual = out.schema();
        let names: Vec<&String> = expected.fields().iter().map(|f| f.name()).collect();
        let actual_names: Vec<&String> = actual.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, actual_names);
    }

    #[test]
    fn schema_errors_surface_before_fitting() {
        let batch = raw_batch();
        let bad = Pipeline::new()
            .stage(Stage::transformer(VectorAssembler::new(
                vec!["x".to_string(), "missing".to_string()],
                "features",
            )))
            .stage(Stage::estimator(PcaAnomaly::new().set_k(1)));

        assert!(matches!(bad.fit(&batch), Err(PcadError::ColumnNotFound(_))));
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let batch = raw_batch();
        let model = Pipeline::new().fit(&batch).unwrap();
        let out = model.transform(&batch).unwrap();
        assert_eq!(out, batch);
    }
}
