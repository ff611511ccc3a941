//! Transport layer for the MCP server.
//!
//! Only stdio is provided: the gateway is launched per agent session and
//! speaks JSON-RPC over standard input/output.

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::GatewayResult;
use std::future::Future;

/// Trait for MCP transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and block until it shuts down.
    fn run(&self) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
