//! Query admission and execution.
//!
//! - [`SchemaAllowList`]: permitted schemas
//! - [`QueryValidator`]: read-only admission policy
//! - [`ExecutionGateway`]: validate, acquire, execute under timeout, release
//! - [`formatter`]: driver rows to the wire result shape
//! - [`schema`]: catalog reads for schema discovery

pub mod allow_list;
pub mod catalog;
pub mod executor;
pub mod formatter;
pub mod lexer;
pub mod middleware;
pub mod query_builder;
pub mod schema;
pub mod validator;

pub use allow_list::SchemaAllowList;
pub use executor::{ExecutionGateway, SqlGateway};
pub use validator::{AdmittedQuery, QueryValidator, Rejection, StatementKind, ValidationVerdict};
