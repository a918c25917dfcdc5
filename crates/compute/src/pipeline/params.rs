//! Parameters shared by [`PcaAnomaly`](super::anomaly::PcaAnomaly) and its
//! fitted model, plus the schema checks both stages run before touching data.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use serde::{Deserialize, Serialize};

use pcad_core::config::ModelConfig;
use pcad_core::dataset::is_vector_type;
use pcad_core::{PcadError, Result};

fn default_normal_label() -> f64 {
    0.0
}

/// Estimator/model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaAnomalyParams {
    /// Number of principal components to keep.
    pub k: usize,
    /// Vector column to fit on and score.
    pub input_col: String,
    /// Projection output column.
    pub output_col: String,
    /// Label column used to drop known anomalies before fitting.
    #[serde(default)]
    pub label_col: Option<String>,
    /// Min-max normalized reconstruction error.
    pub score_col: String,
    /// Raw reconstruction error, only written when set.
    #[serde(default)]
    pub error_col: Option<String>,
    /// Label value of normal rows; other non-null labels are excluded from fitting.
    #[serde(default = "default_normal_label")]
    pub normal_label: f64,
    #[serde(default)]
    pub center: bool,
}

impl Default for PcaAnomalyParams {
    fn default() -> Self {
        Self {
            k: 3,
            input_col: "features".to_string(),
            output_col: "pca_features".to_string(),
            label_col: Some("label".to_string()),
            score_col: "anomaly_score".to_string(),
            error_col: None,
            normal_label: default_normal_label(),
            center: false,
        }
    }
}

impl From<&ModelConfig> for PcaAnomalyParams {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            k: cfg.k,
            input_col: cfg.input_col.clone(),
            output_col: cfg.projection_col.clone(),
            label_col: cfg.label_col.clone(),
            score_col: cfg.score_col.clone(),
            error_col: cfg.error_col.clone(),
            normal_label: default_normal_label(),
            center: cfg.center,
        }
    }
}

impl PcaAnomalyParams {
    /// Columns written by the model, in output order.
    pub fn output_cols(&self) -> Vec<&str> {
        let mut cols = vec![self.output_col.as_str()];
        if let Some(error_col) = &self.error_col {
            cols.push(error_col.as_str());
        }
        cols.push(self.score_col.as_str());
        cols
    }

    /// Check parameter values independent of any dataset.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(PcadError::invalid_param("k", "must be at least 1"));
        }
        if self.input_col.is_empty() {
            return Err(PcadError::invalid_param("input_col", "must not be empty"));
        }
        if self.label_col.as_deref() == Some("") {
            return Err(PcadError::invalid_param("label_col", "must not be empty when set"));
        }
        if !self.normal_label.is_finite() {
            return Err(PcadError::invalid_param("normal_label", "must be finite"));
        }

        let outputs = self.output_cols();
        for (i, col) in outputs.iter().enumerate() {
            if col.is_empty() {
                return Err(PcadError::invalid_param("output columns", "must not be empty"));
            }
            if *col == self.input_col {
                return Err(PcadError::invalid_param(
                    "output columns",
                    format!("`{}` would overwrite the input column", col),
                ));
            }
            if outputs[..i].contains(col) {
                return Err(PcadError::invalid_param(
                    "output columns",
                    format!("`{}` is used more than once", col),
                ));
            }
        }
        Ok(())
    }

    fn check_input(&self, schema: &Schema) -> Result<()> {
        let field = schema
            .field_with_name(&self.input_col)
            .map_err(|_| PcadError::ColumnNotFound(self.input_col.clone()))?;
        if !is_vector_type(field.data_type()) {
            return Err(PcadError::ColumnType {
                column: self.input_col.clone(),
                expected: "list of numeric".to_string(),
                found: field.data_type().to_string(),
            });
        }
        Ok(())
    }

    /// Schema checks run before fitting: the input column is a numeric
    /// vector and the label column, when set, is present and numeric.
    pub fn validate_fit_schema(&self, schema: &Schema) -> Result<()> {
        self.validate()?;
        self.check_input(schema)?;
        if let Some(label) = &self.label_col {
            let field = schema
                .field_with_name(label)
                .map_err(|_| PcadError::ColumnNotFound(label.clone()))?;
            let data_type = field.data_type();
            if !(data_type.is_numeric() || data_type == &DataType::Boolean) {
                return Err(PcadError::ColumnType {
                    column: label.clone(),
                    expected: "numeric or boolean".to_string(),
                    found: data_type.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Output schema of a transform over `schema`.
    ///
    /// The input column must be a numeric vector and none of the output
    /// columns may already exist.
    pub fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        self.validate()?;
        self.check_input(schema)?;

        let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
        for col in self.output_cols() {
            if schema.field_with_name(col).is_ok() {
                return Err(PcadError::ColumnExists {
                    column: col.to_string(),
                });
            }
            let data_type = if col == self.output_col {
                vector_type()
            } else {
                DataType::Float64
            };
            fields.push(Arc::new(Field::new(col, data_type, true)));
        }
        Ok(Schema::new_with_metadata(fields, schema.metadata().clone()))
    }
}

/// Arrow type of assembled and projected vector columns.
pub fn vector_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("features", vector_type(), true),
            Field::new("label", DataType::Int64, true),
            Field::new("protocol", DataType::Utf8, true),
        ])
    }

    #[test]
    fn defaults_are_valid() {
        PcaAnomalyParams::default().validate().unwrap();
    }

    #[test]
    fn zero_k_is_rejected() {
        let params = PcaAnomalyParams {
            k: 0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(PcadError::InvalidParam { ref param, .. }) if param == "k"
        ));
    }

    #[test]
    fn output_may_not_overwrite_input() {
        let params = PcaAnomalyParams {
            score_col: "features".to_string(),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let params = PcaAnomalyParams {
            error_col: Some("anomaly_score".to_string()),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn transform_schema_appends_outputs() {
        let params = PcaAnomalyParams {
            error_col: Some("recon_error".to_string()),
            ..Default::default()
        };
        let out = params.transform_schema(&schema()).unwrap();
        let names: Vec<&str> = out.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["features", "label", "protocol", "pca_features", "recon_error", "anomaly_score"]
        );
        assert_eq!(out.field(3).data_type(), &vector_type());
        assert_eq!(out.field(5).data_type(), &DataType::Float64);
    }

    #[test]
    fn existing_output_column_is_an_error() {
        let params = PcaAnomalyParams {
            score_col: "label".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            params.transform_schema(&schema()),
            Err(PcadError::ColumnExists { .. })
        ));
    }

    #[test]
    fn fit_schema_checks_label_type() {
        let params = PcaAnomalyParams {
            label_col: Some("protocol".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.validate_fit_schema(&schema()),
            Err(PcadError::ColumnType { .. })
        ));

        let params = PcaAnomalyParams {
            label_col: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.validate_fit_schema(&schema()),
            Err(PcadError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn scalar_input_is_rejected() {
        let params = PcaAnomalyParams {
            input_col: "label".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            params.transform_schema(&schema()),
            Err(PcadError::ColumnType { .. })
        ));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let json = r#"{"k":2,"input_col":"f","output_col":"p","score_col":"s"}"#;
        let params: PcaAnomalyParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.label_col, None);
        assert_eq!(params.normal_label, 0.0);
        assert!(!params.center);
    }
}
