//! Imported data conversion
//!
//! Dashboards in `import` mode keep the authoritative row set on the client.
//! Users upload a CSV or JSON file once; this module turns the payload into
//! `Row`s that the import strategy filters and the aggregator reduces.
//!
//! CSV goes through Polars so column types are inferred once per column
//! (numeric columns become numbers, empty cells become null) instead of
//! guessing cell by cell.

use super::row::Row;
use super::value::Value;
use crate::error::{EngineError, Result};
use polars::prelude::{AnyValue, CsvReadOptions, DataFrame, SerReader};
use std::io::Cursor;
use tracing::debug;

/// Parse CSV bytes (header row required) into rows
pub fn rows_from_csv(csv_bytes: &[u8]) -> Result<Vec<Row>> {
    if csv_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(csv_bytes))
        .finish()?;

    debug!(
        "Imported CSV with {} columns, {} rows",
        df.width(),
        df.height()
    );

    dataframe_to_rows(&df)
}

/// Convert a Polars DataFrame into rows, column by column
pub fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<Row>> {
    let mut rows = vec![Row::new(); df.height()];

    for column in df.get_columns() {
        let name = column.name().to_string();
        for (row_idx, row) in rows.iter_mut().enumerate() {
            let value = any_value_to_value(column.get(row_idx)?);
            row.insert(name.clone(), value);
        }
    }

    Ok(rows)
}

fn any_value_to_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::Text(s.to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        other => match other.extract::<f64>() {
            Some(n) => Value::Number(n),
            None => Value::Text(other.to_string()),
        },
    }
}

/// Parse a JSON array of flat objects into rows
pub fn rows_from_json(json_bytes: &[u8]) -> Result<Vec<Row>> {
    if json_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: serde_json::Value = serde_json::from_slice(json_bytes)?;
    let items = match parsed {
        serde_json::Value::Array(items) => items,
        _ => {
            return Err(EngineError::Import(
                "Expected a JSON array of row objects".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, json_scalar(v)))
                .collect::<Row>()),
            _ => Err(EngineError::Import(format!(
                "Row {} is not a JSON object",
                idx
            ))),
        })
        .collect()
}

/// Nested arrays/objects are kept as their JSON text
fn json_scalar(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}
