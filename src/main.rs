//! SQL Gateway MCP - Main entry point.
//!
//! Serves read-only SQL access to one database (PostgreSQL, MySQL or
//! SQLite) as MCP tools over stdio.

use sql_gateway_mcp::config::{Config, GatewayConfig};
use sql_gateway_mcp::gateway::SqlGateway;
use sql_gateway_mcp::transport::{StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Stdout carries the MCP channel, so logs go to stderr.
fn init_tracing(config: &GatewayConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::parse_args().resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Usage: sql-gateway-mcp --database-url <connection_string> --allowed-schemas <list>");
            eprintln!("       sql-gateway-mcp --driver <postgres|mysql|sqlite> --server <host[:port]> --database <name>");
            eprintln!();
            eprintln!("Settings may also come from SQLMCP_*, bare (DB_SERVER, ...) or DB_USER_* environment variables.");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    info!(
        database = %config.connection.masked_connection_string(),
        db_type = %config.connection.db_type,
        schemas = ?config.allowed_schemas,
        default_schema = %config.default_schema,
        max_rows = config.max_rows,
        timeout_secs = config.query_timeout.as_secs(),
        "Starting SQL Gateway MCP v{}",
        env!("CARGO_PKG_VERSION")
    );

    let gateway = Arc::new(SqlGateway::from_config(&config)?);

    if let Err(e) = gateway.pool().prewarm().await {
        error!(error = %e, "Failed to open initial connections");
        gateway.pool().close().await;
        return Err(e.into());
    }

    let transport = StdioTransport::new(gateway);
    info!(transport = transport.name(), "Serving MCP");

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
