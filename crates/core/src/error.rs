use thiserror::Error;

#[derive(Error, Debug)]
pub enum PcadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid parameter `{param}`: {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column `{column}` has unsupported type {found}, expected {expected}")]
    ColumnType {
        column: String,
        expected: String,
        found: String,
    },

    #[error("Column `{column}` already exists")]
    ColumnExists { column: String },

    #[error("Null value in column `{column}` at row {row}")]
    NullValue { column: String, row: usize },

    #[error("Dimension mismatch at row {row}: expected {expected}, found {found}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value in training row {row}")]
    NonFinite { row: usize },

    #[error("No rows left to train on after excluding labeled anomalies")]
    EmptyTrainingSet,

    #[error("Incompatible model: {0}")]
    IncompatibleModel(String),

    #[error("{0}")]
    Other(String),
}

impl PcadError {
    pub fn invalid_param(param: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<parquet::errors::ParquetError> for PcadError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Parquet(e.to_string())
    }
}

impl From<serde_json::Error> for PcadError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PcadError>;
