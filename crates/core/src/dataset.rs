//! Arrow/Parquet helpers for columnar datasets.
//!
//! A dataset is a single [`RecordBatch`]. Vector-valued columns are Arrow
//! `List`, `LargeList` or `FixedSizeList` arrays of any numeric type; they are
//! read out as dense `Vec<f64>` rows.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float64Array, Float64Builder, LargeListArray, ListArray,
    ListBuilder,
};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use crate::error::{PcadError, Result};

/// Read every row group of a Parquet file into one batch.
pub fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;

    info!(
        "Loaded {} rows ({} columns) from {}",
        batch.num_rows(),
        batch.num_columns(),
        path.display()
    );
    Ok(batch)
}

/// Write a batch as a single-row-group Parquet file.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;

    info!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

/// True when the type can be read with [`vector_column`].
pub fn is_vector_type(data_type: &DataType) -> bool {
    match data_type {
        DataType::List(item) | DataType::LargeList(item) | DataType::FixedSizeList(item, _) => {
            item.data_type().is_numeric()
        }
        _ => false,
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PcadError::ColumnNotFound(name.to_string()))
}

fn list_value(column: &ArrayRef, row: usize) -> Option<ArrayRef> {
    let any = column.as_any();
    if let Some(list) = any.downcast_ref::<ListArray>() {
        return Some(list.value(row));
    }
    if let Some(list) = any.downcast_ref::<LargeListArray>() {
        return Some(list.value(row));
    }
    any.downcast_ref::<FixedSizeListArray>()
        .map(|list| list.value(row))
}

/// Read a vector column into dense rows.
///
/// Every row must be non-null, contain no null elements, and have the same
/// length as the first row.
pub fn vector_column(batch: &RecordBatch, name: &str) -> Result<Vec<Vec<f64>>> {
    let col = column(batch, name)?;
    if !is_vector_type(col.data_type()) {
        return Err(PcadError::ColumnType {
            column: name.to_string(),
            expected: "list of numeric".to_string(),
            found: col.data_type().to_string(),
        });
    }

    let mut rows = Vec::with_capacity(col.len());
    let mut dim: Option<usize> = None;

    for row in 0..col.len() {
        if col.is_null(row) {
            return Err(PcadError::NullValue {
                column: name.to_string(),
                row,
            });
        }
        let values = list_value(col, row).ok_or_else(|| PcadError::ColumnType {
            column: name.to_string(),
            expected: "list of numeric".to_string(),
            found: col.data_type().to_string(),
        })?;

        let values = if values.data_type() == &DataType::Float64 {
            values
        } else {
            cast(&values, &DataType::Float64)?
        };
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| PcadError::Other(format!("column `{}` did not cast to f64", name)))?;
        if values.null_count() > 0 {
            return Err(PcadError::NullValue {
                column: name.to_string(),
                row,
            });
        }

        let vector = values.values().to_vec();
        match dim {
            None => dim = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(PcadError::DimensionMismatch {
                    row,
                    expected,
                    found: vector.len(),
                });
            }
            Some(_) => {}
        }
        rows.push(vector);
    }

    debug!(column = name, rows = rows.len(), dim = ?dim, "Read vector column");
    Ok(rows)
}

/// Read a numeric or boolean column as optional f64 values (nulls are `None`).
pub fn label_column(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let col = column(batch, name)?;
    let data_type = col.data_type();
    if !(data_type.is_numeric() || data_type == &DataType::Boolean) {
        return Err(PcadError::ColumnType {
            column: name.to_string(),
            expected: "numeric or boolean".to_string(),
            found: data_type.to_string(),
        });
    }

    let casted = cast(col, &DataType::Float64)?;
    let values = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| PcadError::Other(format!("column `{}` did not cast to f64", name)))?;
    Ok(values.iter().collect())
}

/// Return a copy of `batch` with `array` stored under `name`.
///
/// An existing column of the same name is replaced in place; otherwise the
/// column is appended.
pub fn with_column(batch: &RecordBatch, name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let field: FieldRef = Arc::new(Field::new(name, array.data_type().clone(), true));

    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

    match schema.index_of(name) {
        Ok(idx) => {
            fields[idx] = field;
            columns[idx] = array;
        }
        Err(_) => {
            fields.push(field);
            columns.push(array);
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Build a `List<Float64>` array from dense rows.
pub fn vectors_to_array(rows: &[Vec<f64>]) -> ArrayRef {
    let total: usize = rows.iter().map(Vec::len).sum();
    let mut builder = ListBuilder::new(Float64Builder::with_capacity(total));
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Build a `Float64` array from scalar values.
pub fn scalars_to_array(values: &[f64]) -> ArrayRef {
    Arc::new(Float64Array::from(values.to_vec()))
}

/// Combine scalar numeric columns into one vector column.
///
/// Nulls are rejected; the assembled vector keeps the order of `input_cols`.
pub fn assemble_vectors(
    batch: &RecordBatch,
    input_cols: &[String],
    output_col: &str,
) -> Result<RecordBatch> {
    if input_cols.is_empty() {
        return Err(PcadError::invalid_param("input_cols", "at least one column is required"));
    }

    let mut inputs = Vec::with_capacity(input_cols.len());
    for name in input_cols {
        let col = column(batch, name)?;
        let data_type = col.data_type();
        if !(data_type.is_numeric() || data_type == &DataType::Boolean) {
            return Err(PcadError::ColumnType {
                column: name.clone(),
                expected: "numeric or boolean".to_string(),
                found: data_type.to_string(),
            });
        }
        let casted = cast(col, &DataType::Float64)?;
        if casted.null_count() > 0 {
            let row = (0..casted.len()).find(|&i| casted.is_null(i)).unwrap_or(0);
            return Err(PcadError::NullValue {
                column: name.clone(),
                row,
            });
        }
        inputs.push(casted);
    }

    let typed: Vec<&Float64Array> = inputs
        .iter()
        .filter_map(|a| a.as_any().downcast_ref::<Float64Array>())
        .collect();
    if typed.len() != inputs.len() {
        return Err(PcadError::Other("assembler inputs did not cast to f64".to_string()));
    }

    let rows: Vec<Vec<f64>> = (0..batch.num_rows())
        .map(|row| typed.iter().map(|col| col.value(row)).collect())
        .collect();

    debug!(
        output = output_col,
        inputs = input_cols.len(),
        rows = rows.len(),
        "Assembled vector column"
    );
    with_column(batch, output_col, vectors_to_array(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Int32Array, StringArray};
    use arrow::datatypes::{Float64Type, Int32Type};

    fn batch_of(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        RecordBatch::try_from_iter(columns).unwrap()
    }

    #[test]
    fn reads_integer_lists_as_f64() {
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            Some(vec![Some(3), Some(4)]),
        ]);
        let batch = batch_of(vec![("features", Arc::new(list) as ArrayRef)]);

        let rows = vector_column(&batch, "features").unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn reads_fixed_size_lists() {
        let list = FixedSizeListArray::from_iter_primitive::<Float64Type, _, _>(
            vec![
                Some(vec![Some(0.5), Some(1.5), Some(2.5)]),
                Some(vec![Some(3.0), Some(4.0), Some(5.0)]),
            ],
            3,
        );
        let batch = batch_of(vec![("v", Arc::new(list) as ArrayRef)]);

        let rows = vector_column(&batch, "v").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let list = ListArray::from_iter_primitive::<Float64Type, _, _>(vec![
            Some(vec![Some(1.0), Some(2.0)]),
            Some(vec![Some(3.0)]),
        ]);
        let batch = batch_of(vec![("features", Arc::new(list) as ArrayRef)]);

        let err = vector_column(&batch, "features").unwrap_err();
        assert!(matches!(
            err,
            PcadError::DimensionMismatch { row: 1, expected: 2, found: 1 }
        ));
    }

    #[test]
    fn null_vectors_are_rejected() {
        let list = ListArray::from_iter_primitive::<Float64Type, _, _>(vec![
            Some(vec![Some(1.0)]),
            None,
        ]);
        let batch = batch_of(vec![("features", Arc::new(list) as ArrayRef)]);

        let err = vector_column(&batch, "features").unwrap_err();
        assert!(matches!(err, PcadError::NullValue { row: 1, .. }));
    }

    #[test]
    fn scalar_column_is_not_a_vector() {
        let batch = batch_of(vec![(
            "features",
            Arc::new(Float64Array::from(vec![1.0])) as ArrayRef,
        )]);
        let err = vector_column(&batch, "features").unwrap_err();
        assert!(matches!(err, PcadError::ColumnType { .. }));

        let err = vector_column(&batch, "missing").unwrap_err();
        assert!(matches!(err, PcadError::ColumnNotFound(_)));
    }

    #[test]
    fn labels_accept_booleans_and_keep_nulls() {
        let batch = batch_of(vec![(
            "label",
            Arc::new(BooleanArray::from(vec![Some(true), None, Some(false)])) as ArrayRef,
        )]);
        let labels = label_column(&batch, "label").unwrap();
        assert_eq!(labels, vec![Some(1.0), None, Some(0.0)]);
    }

    #[test]
    fn string_labels_are_rejected() {
        let batch = batch_of(vec![(
            "label",
            Arc::new(StringArray::from(vec!["normal."])) as ArrayRef,
        )]);
        assert!(matches!(
            label_column(&batch, "label").unwrap_err(),
            PcadError::ColumnType { .. }
        ));
    }

    #[test]
    fn with_column_replaces_in_place() {
        let batch = batch_of(vec![
            ("a", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef),
            ("b", Arc::new(Int32Array::from(vec![3, 4])) as ArrayRef),
        ]);

        let replaced = with_column(&batch, "a", scalars_to_array(&[9.0, 8.0])).unwrap();
        assert_eq!(replaced.num_columns(), 2);
        assert_eq!(replaced.schema().field(0).name(), "a");
        assert_eq!(replaced.schema().field(0).data_type(), &DataType::Float64);

        let appended = with_column(&batch, "c", scalars_to_array(&[0.0, 1.0])).unwrap();
        assert_eq!(appended.num_columns(), 3);
        assert_eq!(appended.schema().field(2).name(), "c");
    }

    #[test]
    fn assembles_scalar_columns_in_order() {
        let batch = batch_of(vec![
            ("duration", Arc::new(Int32Array::from(vec![0, 10])) as ArrayRef),
            ("src_bytes", Arc::new(Float64Array::from(vec![181.0, 239.0])) as ArrayRef),
        ]);
        let cols = vec!["src_bytes".to_string(), "duration".to_string()];

        let out = assemble_vectors(&batch, &cols, "features").unwrap();
        let rows = vector_column(&out, "features").unwrap();
        assert_eq!(rows, vec![vec![181.0, 0.0], vec![239.0, 10.0]]);
    }

    #[test]
    fn assembler_rejects_nulls() {
        let batch = batch_of(vec![(
            "x",
            Arc::new(Float64Array::from(vec![Some(1.0), None])) as ArrayRef,
        )]);
        let err = assemble_vectors(&batch, &["x".to_string()], "features").unwrap_err();
        assert!(matches!(err, PcadError::NullValue { row: 1, .. }));
    }

    #[test]
    fn parquet_round_trip_preserves_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.parquet");
        let batch = batch_of(vec![
            ("features", vectors_to_array(&[vec![1.0, 2.0], vec![3.0, 4.0]])),
            ("label", Arc::new(Int32Array::from(vec![0, 1])) as ArrayRef),
        ]);

        write_parquet(&path, &batch).unwrap();
        let loaded = read_parquet(&path).unwrap();

        assert_eq!(loaded.num_rows(), 2);
        assert_eq!(
            vector_column(&loaded, "features").unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
        assert_eq!(label_column(&loaded, "label").unwrap(), vec![Some(0.0), Some(1.0)]);
    }
}
