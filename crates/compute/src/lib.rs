pub mod algorithms;
pub mod pipeline;

pub use algorithms::pca::{fit_pca, PcaFit};
pub use pipeline::{
    Estimator, ModelSummary, PcaAnomaly, PcaAnomalyModel, PcaAnomalyParams, Pipeline,
    PipelineModel, ScoreMetrics, Stage, Transformer, VectorAssembler,
};
