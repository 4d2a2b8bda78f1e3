//! Row conversion into ordered JSON maps.
//!
//! Generated queries project dynamic column sets, so results are surfaced as
//! `name -> value` maps preserving projection order rather than static
//! structs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tokio_postgres::types::Type;
use tokio_postgres::Row;

use crate::error::{StoreError, StoreResult};

/// One result row as an ordered `column -> JSON value` map.
pub type JsonRow = IndexMap<String, Value>;

/// Convert a batch of rows.
pub fn rows_to_json(rows: &[Row]) -> StoreResult<Vec<JsonRow>> {
    rows.iter().map(row_to_json).collect()
}

/// Convert one row, mapping each column by its PostgreSQL type.
pub fn row_to_json(row: &Row) -> StoreResult<JsonRow> {
    let mut map = IndexMap::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_to_json(row, idx, column.type_())
            .map_err(|e| StoreError::conversion(format!("column '{}': {e}", column.name())))?;
        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}

fn column_to_json(row: &Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    } else if *ty == Type::INT2 {
        int_value(row.try_get::<_, Option<i16>>(idx)?.map(i64::from))
    } else if *ty == Type::INT4 {
        int_value(row.try_get::<_, Option<i32>>(idx)?.map(i64::from))
    } else if *ty == Type::INT8 {
        int_value(row.try_get::<_, Option<i64>>(idx)?)
    } else if *ty == Type::FLOAT4 {
        float_value(row.try_get::<_, Option<f32>>(idx)?.map(f64::from))
    } else if *ty == Type::FLOAT8 {
        float_value(row.try_get::<_, Option<f64>>(idx)?)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)?.unwrap_or(Value::Null)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| Value::String(ts.to_string()))
            .unwrap_or(Value::Null)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null)
    } else {
        // TEXT, VARCHAR, NAME, and anything else textual.
        row.try_get::<_, Option<String>>(idx)?
            .map(Value::String)
            .unwrap_or(Value::Null)
    };
    Ok(value)
}

fn int_value(value: Option<i64>) -> Value {
    value.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
}

fn float_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
