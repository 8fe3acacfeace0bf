use arrow::array::{ArrayRef, AsArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::SchemaField;
use crate::errors::SchemaError;

/// Builds the table schema in CSV header order.
///
/// Declared columns keep their declared type; header columns nobody declared
/// are read as nullable text. Every declared column must be present.
pub fn resolve_schema(header: &[String], declared: &[SchemaField]) -> Result<Schema, SchemaError> {
    let by_name: HashMap<&str, &SchemaField> =
        declared.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut seen = HashSet::with_capacity(header.len());
    let mut fields = Vec::with_capacity(header.len());
    for name in header {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                column: name.clone(),
            });
        }
        let field = match by_name.get(name.as_str()) {
            Some(declared) => declared.to_arrow(),
            None => Field::new(name, DataType::Utf8, true),
        };
        fields.push(field);
    }

    if let Some(missing) = declared.iter().find(|f| !seen.contains(f.name.as_str())) {
        return Err(SchemaError::MissingColumn {
            column: missing.name.clone(),
        });
    }

    Ok(Schema::new(fields))
}

/// The schema the CSV reader parses with. Integer columns come in as text so
/// that integral decimals such as `1.0` still load; [`coerce_integers`] turns
/// them back into `Int64`.
pub fn read_schema(schema: &Schema) -> Schema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Int64 => f.as_ref().clone().with_data_type(DataType::Utf8),
            _ => f.as_ref().clone(),
        })
        .collect();
    Schema::new(fields)
}

/// Converts a batch read with [`read_schema`] into `target`.
pub fn coerce_integers(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch, SchemaError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, column) in target.fields().iter().zip(batch.columns()) {
        if field.data_type() == &DataType::Int64 && column.data_type() == &DataType::Utf8 {
            let parsed = parse_integers(field.name(), column.as_string::<i32>())?;
            columns.push(Arc::new(parsed));
        } else {
            columns.push(column.clone());
        }
    }
    RecordBatch::try_new(target.clone(), columns).map_err(|e| SchemaError::Coercion {
        reason: e.to_string(),
    })
}

fn parse_integers(column: &str, values: &StringArray) -> Result<Int64Array, SchemaError> {
    values
        .iter()
        .map(|value| match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_integer(text)
                .map(Some)
                .ok_or_else(|| SchemaError::Coercion {
                    reason: format!(
                        "Error while parsing value '{text}' as type 'Int64' for column '{column}'"
                    ),
                }),
        })
        .collect()
}

/// Plain integers, or decimals with no fractional part (`3.0`, `1e3`).
fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value = text.parse::<f64>().ok()?;
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then_some(value as i64)
}
