//! MCP server integration module.
//!
//! Exposes the gateway's entry points as MCP tools using the rmcp framework.

pub mod service;

pub use service::GatewayService;
