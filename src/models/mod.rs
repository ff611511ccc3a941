//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod result;

pub use connection::{ConnectionSettings, DatabaseType};
pub use query::{
    DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, Filter, FilterOp, MAX_QUERY_TIMEOUT_SECS,
    MAX_ROW_LIMIT, Query, QueryParam, RunOptions, SortDirection, SortSpec, TableQuery,
};
pub use result::{
    ColumnMetadata, ErrorDescriptor, ExecutionResponse, ExecutionResult, RawRowSet, SqlValue,
};
