//! JSON record <-> Arrow RecordBatch conversion.
//!
//! Tool output arrives as heterogeneous JSON objects; the columnar file's
//! schema is the union of keys across all records, missing values filled
//! with null. Column types are inferred from the values actually present:
//! all-integer columns become Int64, numeric columns Float64, boolean
//! columns Boolean, everything else Utf8 (nested values are stringified).

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ArtifactError, Result};

/// One row of an artifact, as written by the dispatcher.
pub type Record = Map<String, Value>;

/// Sorted union of keys across all records.
pub fn union_columns(records: &[Record]) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for record in records {
        for key in record.keys() {
            keys.insert(key.clone());
        }
    }
    keys.into_iter().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
}

fn infer_column_type(records: &[Record], column: &str) -> ColumnType {
    let mut seen = None;
    for record in records {
        let value = match record.get(column) {
            Some(Value::Null) | None => continue,
            Some(value) => value,
        };
        let this = match value {
            Value::Bool(_) => ColumnType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Int,
            Value::Number(_) => ColumnType::Float,
            _ => ColumnType::Text,
        };
        seen = Some(match (seen, this) {
            (None, t) => t,
            (Some(prev), t) if prev == t => t,
            // Int and Float mix to Float; any other mix degrades to Text
            (Some(ColumnType::Int), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Int) => ColumnType::Float,
            _ => ColumnType::Text,
        });
        if seen == Some(ColumnType::Text) {
            break;
        }
    }
    seen.unwrap_or(ColumnType::Text)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Build a RecordBatch from JSON records (union-of-keys schema).
pub fn records_to_batch(records: &[Record]) -> Result<RecordBatch> {
    if records.is_empty() {
        return Err(ArtifactError::EmptyRecordSet);
    }

    let columns = union_columns(records);
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

    for column in &columns {
        match infer_column_type(records, column) {
            ColumnType::Int => {
                let values: Vec<Option<i64>> = records
                    .iter()
                    .map(|r| r.get(column).and_then(Value::as_i64))
                    .collect();
                fields.push(Field::new(column.as_str(), DataType::Int64, true));
                arrays.push(Arc::new(Int64Array::from(values)));
            }
            ColumnType::Float => {
                let values: Vec<Option<f64>> = records
                    .iter()
                    .map(|r| r.get(column).and_then(Value::as_f64))
                    .collect();
                fields.push(Field::new(column.as_str(), DataType::Float64, true));
                arrays.push(Arc::new(Float64Array::from(values)));
            }
            ColumnType::Bool => {
                let values: Vec<Option<bool>> = records
                    .iter()
                    .map(|r| r.get(column).and_then(Value::as_bool))
                    .collect();
                fields.push(Field::new(column.as_str(), DataType::Boolean, true));
                arrays.push(Arc::new(BooleanArray::from(values)));
            }
            ColumnType::Text => {
                let values: Vec<Option<String>> = records
                    .iter()
                    .map(|r| r.get(column).and_then(value_to_text))
                    .collect();
                fields.push(Field::new(column.as_str(), DataType::Utf8, true));
                arrays.push(Arc::new(StringArray::from(values)));
            }
        }
    }

    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, arrays).map_err(ArtifactError::from)
}

/// Read a RecordBatch back into JSON records (append-mode union reads).
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>> {
    let schema = batch.schema();
    let mut records = vec![Record::new(); batch.num_rows()];

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let array = batch.column(col_idx);
        for (row_idx, record) in records.iter_mut().enumerate() {
            let value = if array.is_null(row_idx) {
                Value::Null
            } else {
                match field.data_type() {
                    DataType::Int64 => {
                        let array = array
                            .as_any()
                            .downcast_ref::<Int64Array>()
                            .ok_or_else(|| column_mismatch(field.name()))?;
                        Value::from(array.value(row_idx))
                    }
                    DataType::Float64 => {
                        let array = array
                            .as_any()
                            .downcast_ref::<Float64Array>()
                            .ok_or_else(|| column_mismatch(field.name()))?;
                        Value::from(array.value(row_idx))
                    }
                    DataType::Boolean => {
                        let array = array
                            .as_any()
                            .downcast_ref::<BooleanArray>()
                            .ok_or_else(|| column_mismatch(field.name()))?;
                        Value::from(array.value(row_idx))
                    }
                    DataType::Utf8 => {
                        let array = array
                            .as_any()
                            .downcast_ref::<StringArray>()
                            .ok_or_else(|| column_mismatch(field.name()))?;
                        Value::from(array.value(row_idx))
                    }
                    other => {
                        return Err(ArtifactError::UnsupportedColumn {
                            column: field.name().to_string(),
                            data_type: other.to_string(),
                        })
                    }
                }
            };
            record.insert(field.name().to_string(), value);
        }
    }

    Ok(records)
}

fn column_mismatch(column: &str) -> ArtifactError {
    ArtifactError::UnsupportedColumn {
        column: column.to_string(),
        data_type: "downcast mismatch".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_union_columns_fills_nulls() {
        let records = vec![
            record(json!({"subdomain": "a.example.com"})),
            record(json!({"subdomain": "b.example.com", "source": "amass"})),
        ];
        let batch = records_to_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);

        let back = batch_to_records(&batch).unwrap();
        assert_eq!(back[0].get("source"), Some(&Value::Null));
        assert_eq!(back[1].get("source"), Some(&json!("amass")));
    }

    #[test]
    fn test_integer_column_inference() {
        let records = vec![
            record(json!({"port": 22})),
            record(json!({"port": 443})),
        ];
        let batch = records_to_batch(&records).unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_mixed_numeric_degrades_to_float() {
        let records = vec![
            record(json!({"score": 1})),
            record(json!({"score": 2.5})),
        ];
        let batch = records_to_batch(&records).unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Float64);
    }

    #[test]
    fn test_nested_values_are_stringified() {
        let records = vec![record(json!({"raw": {"success": true}}))];
        let batch = records_to_batch(&records).unwrap();
        let back = batch_to_records(&batch).unwrap();
        assert_eq!(back[0].get("raw"), Some(&json!("{\"success\":true}")));
    }

    #[test]
    fn test_empty_record_set_is_rejected() {
        assert!(matches!(
            records_to_batch(&[]),
            Err(ArtifactError::EmptyRecordSet)
        ));
    }
}
