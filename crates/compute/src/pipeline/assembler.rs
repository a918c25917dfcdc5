use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;

use pcad_core::dataset::assemble_vectors;
use pcad_core::{PcadError, Result};

use super::params::vector_type;
use super::{random_uid, Transformer};

/// Packs scalar numeric columns into one `List<Float64>` column.
#[derive(Debug, Clone)]
pub struct VectorAssembler {
    uid: String,
    input_cols: Vec<String>,
    output_col: String,
}

impl VectorAssembler {
    pub fn new(input_cols: Vec<String>, output_col: impl Into<String>) -> Self {
        Self {
            uid: random_uid("VectorAssembler"),
            input_cols,
            output_col: output_col.into(),
        }
    }

    pub fn input_cols(&self) -> &[String] {
        &self.input_cols
    }

    pub fn output_col(&self) -> &str {
        &self.output_col
    }
}

impl Transformer for VectorAssembler {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        if self.input_cols.is_empty() {
            return Err(PcadError::invalid_param("input_cols", "at least one column is required"));
        }
        for name in &self.input_cols {
            let field = schema
                .field_with_name(name)
                .map_err(|_| PcadError::ColumnNotFound(name.clone()))?;
            let data_type = field.data_type();
            if !(data_type.is_numeric() || data_type == &DataType::Boolean) {
                return Err(PcadError::ColumnType {
                    column: name.clone(),
                    expected: "numeric or boolean".to_string(),
                    found: data_type.to_string(),
                });
            }
        }
        if schema.field_with_name(&self.output_col).is_ok() {
            return Err(PcadError::ColumnExists {
                column: self.output_col.clone(),
            });
        }

        let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(&self.output_col, vector_type(), true)));
        Ok(Schema::new_with_metadata(fields, schema.metadata().clone()))
    }

    fn transform(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        self.transform_schema(&batch.schema())?;
        assemble_vectors(batch, &self.input_cols, &self.output_col)
    }
}
