//! SQL Gateway MCP Library
//!
//! Read-only SQL query admission and execution for AI agents: validates
//! free-form SELECTs and structured table requests against a schema
//! allow-list, runs them on a bounded connection pool under timeout and
//! returns row-capped, type-normalized results.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod models;
pub mod transport;

pub use config::{Config, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{ExecutionGateway, SqlGateway};
pub use mcp::GatewayService;
