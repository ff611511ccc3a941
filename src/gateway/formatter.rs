//! Driver rows to the wire result shape.
//!
//! Values are rendered without locale dependence:
//!
//! | Value                     | JSON                                   |
//! |---------------------------|----------------------------------------|
//! | NULL                      | `null`                                 |
//! | exact numeric             | string, digits as stored               |
//! | integer beyond 2^53 - 1   | string                                 |
//! | float NaN / infinity      | string (`"NaN"`, `"Infinity"`, ...)    |
//! | date                      | `"YYYY-MM-DD"`                         |
//! | time                      | `"HH:MM:SS.ffffff"`                    |
//! | timestamp                 | `"YYYY-MM-DDTHH:MM:SS.ffffff"`         |
//! | timestamp with time zone  | same, UTC, with a `Z` suffix           |
//! | binary                    | base64 string                          |

use crate::models::{ExecutionResult, RawRowSet, SqlValue};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Number, Value as JsonValue};

/// Largest integer a JSON consumer can hold in an IEEE double without loss.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.6f";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Render one value.
pub fn format_value(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Bool(b) => JsonValue::Bool(*b),
        SqlValue::Int(i) => {
            if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(i) {
                JsonValue::Number((*i).into())
            } else {
                JsonValue::String(i.to_string())
            }
        }
        SqlValue::UInt(u) => {
            if *u <= MAX_SAFE_INTEGER as u64 {
                JsonValue::Number((*u).into())
            } else {
                JsonValue::String(u.to_string())
            }
        }
        SqlValue::Float(f) => match Number::from_f64(*f) {
            Some(n) => JsonValue::Number(n),
            None if f.is_nan() => JsonValue::String("NaN".into()),
            None if *f > 0.0 => JsonValue::String("Infinity".into()),
            None => JsonValue::String("-Infinity".into()),
        },
        SqlValue::Decimal(s) | SqlValue::Text(s) | SqlValue::Uuid(s) => JsonValue::String(s.clone()),
        SqlValue::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
        SqlValue::Date(d) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
        SqlValue::Time(t) => JsonValue::String(t.format(TIME_FORMAT).to_string()),
        SqlValue::DateTime(dt) => JsonValue::String(dt.format(DATETIME_FORMAT).to_string()),
        SqlValue::DateTimeTz(dt) => {
            JsonValue::String(format!("{}Z", dt.naive_utc().format(DATETIME_FORMAT)))
        }
        SqlValue::Json(v) => v.clone(),
    }
}

/// Apply the row cap and normalize every value.
///
/// `raw` may hold up to `max_rows + 1` rows; the extra row only signals
/// truncation and is discarded. Execution time is filled in by the caller.
pub fn format(raw: RawRowSet, max_rows: usize) -> ExecutionResult {
    let truncated = raw.rows.len() > max_rows;
    let rows: Vec<Vec<JsonValue>> = raw
        .rows
        .iter()
        .take(max_rows)
        .map(|row| row.iter().map(format_value).collect())
        .collect();

    ExecutionResult {
        columns: raw.columns,
        row_count: rows.len(),
        rows,
        truncated,
        execution_time_ms: 0,
    }
}
