//! Database abstraction layer.
//!
//! - Bounded connection pool generic over a [`Connector`]
//! - sqlx-backed read-only sessions for MySQL, PostgreSQL and SQLite
//! - Parameter binding and result type mappings
//! - Backend dispatch macro

pub mod connection;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod types;

pub use connection::{DbConnection, QueryConnection, SqlxConnector, TableColumns};
pub use pool::{ConnectionPool, Connector, PoolConfig, PoolStatus, PooledConnection};
pub use types::{RowDecoder, TypeCategory, categorize_type};
