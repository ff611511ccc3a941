//! Result data models.
//!
//! Driver rows are decoded into [`SqlValue`] and turned into the stable
//! [`ExecutionResult`] by the formatter. [`ExecutionResponse`] is the
//! caller-facing envelope: a full result or an error, never both.

use crate::error::GatewayError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific declared type (e.g., "int8", "varchar", "TEXT")
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A decoded driver value, before wire normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact numeric kept as text to avoid precision loss
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<Utc>),
    Json(JsonValue),
    Uuid(String),
}

/// Rows exactly as the driver produced them, up to the fetch limit.
#[derive(Debug, Clone, Default)]
pub struct RawRowSet {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Normalized, row-capped query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<&GatewayError> for ErrorDescriptor {
    fn from(err: &GatewayError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            suggestion: err.suggestion().map(String::from),
        }
    }
}

/// Response shape returned to tool callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResponse {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub error: Option<ErrorDescriptor>,
}

impl ExecutionResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<ExecutionResult> for ExecutionResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows,
            row_count: result.row_count,
            truncated: result.truncated,
            execution_time_ms: Some(result.execution_time_ms),
            error: None,
        }
    }
}

impl From<GatewayError> for ExecutionResponse {
    fn from(err: GatewayError) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            execution_time_ms: None,
            error: Some(ErrorDescriptor::from(&err)),
        }
    }
}

impl From<Result<ExecutionResult, GatewayError>> for ExecutionResponse {
    fn from(result: Result<ExecutionResult, GatewayError>) -> Self {
        match result {
            Ok(r) => r.into(),
            Err(e) => e.into(),
        }
    }
}
