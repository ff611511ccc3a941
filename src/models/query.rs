//! Query-related data models.
//!
//! A [`Query`] is either raw SQL text with bound parameters or a structured
//! [`TableQuery`]. Both are immutable once built.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default row cap for query results.
pub const DEFAULT_MAX_ROWS: u32 = 1000;

/// Hard upper bound for any row cap.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum query timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a scalar JSON value into a parameter.
    ///
    /// Arrays and objects are rejected; they have no single-parameter meaning.
    pub fn from_json(value: &JsonValue) -> GatewayResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::Null),
            JsonValue::Bool(b) => Ok(Self::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(GatewayError::invalid_input(format!(
                        "Numeric value out of range: {}",
                        n
                    )))
                }
            }
            JsonValue::String(s) => Ok(Self::String(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => Err(GatewayError::invalid_input(
                "Parameter values must be scalars (string, number, bool or null)",
            )),
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Comparison operator of a structured filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    /// Key suffixes, longest first so `NOT LIKE` wins over `LIKE` and `>=` over `=`.
    const SUFFIXES: [(&'static str, FilterOp); 12] = [
        (" NOT LIKE", FilterOp::NotLike),
        (" NOT IN", FilterOp::NotIn),
        (" IS NOT", FilterOp::IsNotNull),
        (" LIKE", FilterOp::Like),
        (" IN", FilterOp::In),
        (" >=", FilterOp::Ge),
        (" <=", FilterOp::Le),
        (" !=", FilterOp::Ne),
        (" <>", FilterOp::Ne),
        (" =", FilterOp::Eq),
        (" >", FilterOp::Gt),
        (" <", FilterOp::Lt),
    ];

    /// SQL text of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Split a filter key such as `"age >="` into column and operator.
    fn split_key(key: &str) -> (&str, FilterOp) {
        let trimmed = key.trim_end();
        let upper = trimmed.to_ascii_uppercase();
        for (suffix, op) in Self::SUFFIXES {
            if upper.ends_with(suffix) {
                let column = trimmed[..trimmed.len() - suffix.len()].trim();
                return (column, op);
            }
        }
        (trimmed.trim_start(), FilterOp::Eq)
    }
}

/// One predicate of a structured filter request. Values are always bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<QueryParam>,
}

impl Filter {
    /// Build a filter from a `{"column op": value}` entry.
    ///
    /// A JSON `null` turns the predicate into `IS NULL` (or `IS NOT NULL` for
    /// the `IS NOT` suffix). `IN` and `NOT IN` take a non-empty array.
    pub fn parse(key: &str, value: &JsonValue) -> GatewayResult<Self> {
        let (column, op) = FilterOp::split_key(key);
        if column.is_empty() {
            return Err(GatewayError::invalid_input(format!(
                "Filter key '{}' has no column name",
                key
            )));
        }
        let column = column.to_string();

        if value.is_null() {
            let op = match op {
                FilterOp::IsNotNull | FilterOp::Ne => FilterOp::IsNotNull,
                _ => FilterOp::IsNull,
            };
            return Ok(Self {
                column,
                op,
                values: Vec::new(),
            });
        }

        match op {
            FilterOp::IsNotNull => Err(GatewayError::invalid_input(format!(
                "Filter '{}' expects a null value",
                key
            ))),
            FilterOp::In | FilterOp::NotIn => {
                let items = value.as_array().ok_or_else(|| {
                    GatewayError::invalid_input(format!("Filter '{}' expects an array", key))
                })?;
                if items.is_empty() {
                    return Err(GatewayError::invalid_input(format!(
                        "Filter '{}' needs at least one value",
                        key
                    )));
                }
                let values = items
                    .iter()
                    .map(QueryParam::from_json)
                    .collect::<GatewayResult<Vec<_>>>()?;
                Ok(Self { column, op, values })
            }
            _ => Ok(Self {
                column,
                op,
                values: vec![QueryParam::from_json(value)?],
            }),
        }
    }
}

/// Sort direction for structured queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

/// Structured filter request: no free text from the caller reaches the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    /// `table` or `schema.table`
    pub table: String,
    /// Empty means all columns.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub sort: Option<SortSpec>,
    pub limit: Option<u32>,
    pub offset: u64,
}

impl TableQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            sort: None,
            limit: None,
            offset: 0,
        }
    }

    /// Parse every entry of a JSON filter map.
    pub fn with_filter_map(
        mut self,
        filters: &serde_json::Map<String, JsonValue>,
    ) -> GatewayResult<Self> {
        for (key, value) in filters {
            self.filters.push(Filter::parse(key, value)?);
        }
        Ok(self)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// A request admitted to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Sql {
        text: String,
        params: Vec<QueryParam>,
    },
    Table(TableQuery),
}

impl Query {
    pub fn sql(text: impl Into<String>) -> Self {
        Self::Sql {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn sql_with_params(text: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self::Sql {
            text: text.into(),
            params,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::Table(_) => "table",
        }
    }
}

/// Per-call execution options. Unset fields fall back to the gateway defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Narrows the allow-list for this call; never widens it.
    pub schema_scope: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub max_rows: Option<u32>,
}

impl RunOptions {
    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_schema_scope<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema_scope = Some(schemas.into_iter().map(Into::into).collect());
        self
    }

    /// Row cap clamped to [`MAX_ROW_LIMIT`].
    pub fn effective_max_rows(&self, default: u32) -> u32 {
        self.max_rows.unwrap_or(default).min(MAX_ROW_LIMIT)
    }

    /// Timeout clamped to [`MAX_QUERY_TIMEOUT_SECS`].
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout
            .unwrap_or(default)
            .min(Duration::from_secs(MAX_QUERY_TIMEOUT_SECS))
    }
}
