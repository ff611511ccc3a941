//! Configuration handling for the SQL gateway.
//!
//! Settings come from CLI arguments first. Anything not given on the command
//! line is looked up in the environment under three prefixes, in order:
//! `SQLMCP_` (primary), no prefix (transitional), `DB_USER_` (legacy).
//! The result is one immutable [`GatewayConfig`] built at startup.

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    ConnectionSettings, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType,
    MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT,
};
use clap::Parser;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SCHEMA: &str = "dbo";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Pool configuration defaults
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDLE_TTL_SECS: u64 = 600;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Environment prefixes in precedence order.
pub const ENV_PREFIXES: [&str; 3] = ["SQLMCP_", "", "DB_USER_"];

/// Connection pool options. Unset fields use the defaults above.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    pub min_connections: Option<u32>,
    pub max_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub idle_ttl_secs: Option<u64>,
    pub reap_interval_secs: Option<u64>,
    /// Ping idle connections before handing them out (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn connect_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    pub fn idle_ttl_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs.unwrap_or(DEFAULT_IDLE_TTL_SECS))
    }

    pub fn reap_interval_or_default(&self) -> Duration {
        Duration::from_secs(
            self.reap_interval_secs
                .unwrap_or(DEFAULT_REAP_INTERVAL_SECS),
        )
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let min = self.min_connections_or_default();
        let max = self.max_connections_or_default();
        if max == 0 {
            return Err("pool max must be greater than 0".to_string());
        }
        if min > max {
            return Err(format!(
                "pool min ({}) cannot exceed pool max ({})",
                min, max
            ));
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire timeout must be greater than 0".to_string());
        }
        if self.reap_interval_secs == Some(0) {
            return Err("reap interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Command line configuration. Every field may also come from the environment.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "sql-gateway-mcp",
    about = "Read-only SQL gateway for AI agents - validated SELECT queries over MCP",
    version,
    author
)]
pub struct Config {
    /// Database driver: postgres, mysql or sqlite [env: DB_DRIVER]
    #[arg(long)]
    pub driver: Option<String>,

    /// Database server as host[:port] [env: DB_SERVER]
    #[arg(long)]
    pub server: Option<String>,

    /// Database name, or file path for sqlite [env: DB_NAME]
    #[arg(long = "database")]
    pub database: Option<String>,

    /// [env: DB_USERNAME]
    #[arg(long)]
    pub username: Option<String>,

    /// [env: DB_PASSWORD]
    #[arg(long)]
    pub password: Option<String>,

    /// Full connection URL; overrides driver/server/database/credentials [env: DATABASE_URL]
    #[arg(long)]
    pub database_url: Option<String>,

    /// Allowed schemas as a JSON array or comma separated list [env: ALLOWED_SCHEMAS]
    #[arg(long)]
    pub allowed_schemas: Option<String>,

    /// Schema assumed for unqualified table references [env: DEFAULT_SCHEMA]
    #[arg(long)]
    pub default_schema: Option<String>,

    /// Procedures permitted after EXEC/EXECUTE [env: ALLOWED_PROCEDURES]
    #[arg(long)]
    pub allowed_procedures: Option<String>,

    /// Default row cap per call [env: MAX_ROWS]
    #[arg(long)]
    pub max_rows: Option<u32>,

    /// Query timeout in seconds [env: QUERY_TIMEOUT]
    #[arg(long)]
    pub query_timeout: Option<u64>,

    /// [env: POOL_MIN]
    #[arg(long)]
    pub pool_min: Option<u32>,

    /// [env: POOL_MAX]
    #[arg(long)]
    pub pool_max: Option<u32>,

    /// Seconds to wait for a free connection [env: ACQUIRE_TIMEOUT]
    #[arg(long)]
    pub acquire_timeout: Option<u64>,

    /// Seconds allowed to open a connection [env: CONNECT_TIMEOUT]
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Seconds an idle connection is kept [env: IDLE_TTL]
    #[arg(long)]
    pub idle_ttl: Option<u64>,

    /// Seconds between idle reaping passes [env: REAP_INTERVAL]
    #[arg(long)]
    pub reap_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [env: LOG_LEVEL]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable JSON logging format [env: JSON_LOGS]
    #[arg(long)]
    pub json_logs: bool,
}

/// Fully resolved, immutable gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub connection: ConnectionSettings,
    pub allowed_schemas: Vec<String>,
    pub default_schema: String,
    pub allowed_procedures: Vec<String>,
    pub max_rows: u32,
    pub query_timeout: Duration,
    pub pool: PoolOptions,
    pub log_level: String,
    pub json_logs: bool,
}

impl GatewayConfig {
    /// Configuration for a known connection with all other settings at defaults.
    pub fn for_connection(connection: ConnectionSettings) -> Self {
        Self {
            connection,
            allowed_schemas: vec![DEFAULT_SCHEMA.to_string()],
            default_schema: DEFAULT_SCHEMA.to_string(),
            allowed_procedures: Vec::new(),
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            pool: PoolOptions::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }

    pub fn with_allowed_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> GatewayResult<()> {
        self.pool.validate().map_err(GatewayError::config)?;
        if self.allowed_schemas.is_empty() {
            return Err(GatewayError::config("allowed schema list is empty"));
        }
        if self.max_rows == 0 || self.max_rows > MAX_ROW_LIMIT {
            return Err(GatewayError::config(format!(
                "max rows must be between 1 and {}",
                MAX_ROW_LIMIT
            )));
        }
        let secs = self.query_timeout.as_secs();
        if secs == 0 || secs > MAX_QUERY_TIMEOUT_SECS {
            return Err(GatewayError::config(format!(
                "query timeout must be between 1 and {} seconds",
                MAX_QUERY_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

/// Three-prefix environment lookup over any key/value source.
pub struct EnvResolver<F> {
    lookup: F,
}

impl<F> EnvResolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// First non-empty value of `name` across [`ENV_PREFIXES`].
    pub fn get(&self, name: &str) -> Option<String> {
        ENV_PREFIXES.iter().find_map(|prefix| {
            (self.lookup)(&format!("{}{}", prefix, name)).filter(|v| !v.trim().is_empty())
        })
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> GatewayResult<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    GatewayError::config(format!("invalid value for {}: {}", name, e))
                })
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

impl EnvResolver<fn(&str) -> Option<String>> {
    /// Resolver over the process environment.
    pub fn from_process() -> Self {
        Self::new(|key| std::env::var(key).ok())
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> GatewayResult<GatewayConfig> {
        self.resolve_with(&EnvResolver::from_process())
    }

    /// Resolve every setting: CLI value, then environment, then default.
    pub fn resolve_with<F>(self, env: &EnvResolver<F>) -> GatewayResult<GatewayConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection = self.resolve_connection(env)?;

        let allowed_schemas = match self.allowed_schemas.or_else(|| env.get("ALLOWED_SCHEMAS")) {
            Some(raw) => parse_name_list(&raw)?,
            None => vec![DEFAULT_SCHEMA.to_string()],
        };
        let allowed_procedures = match self
            .allowed_procedures
            .or_else(|| env.get("ALLOWED_PROCEDURES"))
        {
            Some(raw) => parse_name_list(&raw)?,
            None => Vec::new(),
        };
        let default_schema = self
            .default_schema
            .or_else(|| env.get("DEFAULT_SCHEMA"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());

        let max_rows = or_env(self.max_rows, env, "MAX_ROWS")?.unwrap_or(DEFAULT_MAX_ROWS);
        let query_timeout = or_env(self.query_timeout, env, "QUERY_TIMEOUT")?
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        let pool = PoolOptions {
            min_connections: or_env(self.pool_min, env, "POOL_MIN")?,
            max_connections: or_env(self.pool_max, env, "POOL_MAX")?,
            acquire_timeout_secs: or_env(self.acquire_timeout, env, "ACQUIRE_TIMEOUT")?,
            connect_timeout_secs: or_env(self.connect_timeout, env, "CONNECT_TIMEOUT")?,
            idle_ttl_secs: or_env(self.idle_ttl, env, "IDLE_TTL")?,
            reap_interval_secs: or_env(self.reap_interval, env, "REAP_INTERVAL")?,
            test_before_acquire: None,
        };

        let config = GatewayConfig {
            connection,
            allowed_schemas,
            default_schema,
            allowed_procedures,
            max_rows,
            query_timeout: Duration::from_secs(query_timeout),
            pool,
            log_level: self
                .log_level
                .or_else(|| env.get("LOG_LEVEL"))
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json_logs: self.json_logs || env.flag("JSON_LOGS"),
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_connection<F>(&self, env: &EnvResolver<F>) -> GatewayResult<ConnectionSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = self.password.clone().or_else(|| env.get("DB_PASSWORD"));

        if let Some(raw) = self.database_url.clone().or_else(|| env.get("DATABASE_URL")) {
            let db_type = DatabaseType::from_connection_string(&raw).ok_or_else(|| {
                GatewayError::config("DATABASE_URL has an unsupported scheme")
            })?;
            let mut settings = ConnectionSettings::new(db_type, raw.clone());
            if let Ok(url) = Url::parse(&raw) {
                if let Some(p) = url.password() {
                    settings = settings.with_secret(p);
                }
            }
            if let Some(p) = password {
                settings = settings.with_secret(p);
            }
            return Ok(settings);
        }

        let driver = self
            .driver
            .clone()
            .or_else(|| env.get("DB_DRIVER"))
            .unwrap_or_else(|| "postgres".to_string());
        let db_type = DatabaseType::from_driver_name(&driver)
            .ok_or_else(|| GatewayError::config(format!("unsupported driver '{}'", driver)))?;
        let database = self
            .database
            .clone()
            .or_else(|| env.get("DB_NAME"))
            .ok_or_else(|| GatewayError::config("database name (DB_NAME) is required"))?;

        if db_type == DatabaseType::SQLite {
            return Ok(ConnectionSettings::new(
                db_type,
                format!("sqlite:{}", database),
            ));
        }

        let server = self
            .server
            .clone()
            .or_else(|| env.get("DB_SERVER"))
            .ok_or_else(|| GatewayError::config("database server (DB_SERVER) is required"))?;
        let username = self.username.clone().or_else(|| env.get("DB_USERNAME"));

        let url = build_url(
            db_type,
            &server,
            &database,
            username.as_deref(),
            password.as_deref(),
        )?;
        let mut settings = ConnectionSettings::new(db_type, url);
        if let Some(p) = password {
            settings = settings.with_secret(p);
        }
        Ok(settings)
    }
}

fn or_env<T, F>(cli: Option<T>, env: &EnvResolver<F>, name: &str) -> GatewayResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match cli {
        Some(v) => Ok(Some(v)),
        None => env.parse(name),
    }
}

/// Assemble a server URL; credentials are percent-encoded by `url`.
fn build_url(
    db_type: DatabaseType,
    server: &str,
    database: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> GatewayResult<String> {
    let mut url = Url::parse(&format!("{}://{}", db_type.scheme(), server.trim()))
        .map_err(|e| GatewayError::config(format!("invalid server address: {}", e)))?;
    if url.port().is_none() {
        url.set_port(db_type.default_port())
            .map_err(|_| GatewayError::config("server address cannot carry a port"))?;
    }
    url.set_path(database.trim());
    if let Some(user) = username {
        url.set_username(user)
            .map_err(|_| GatewayError::config("server address cannot carry a username"))?;
    }
    if let Some(pass) = password {
        url.set_password(Some(pass))
            .map_err(|_| GatewayError::config("server address cannot carry a password"))?;
    }
    Ok(url.to_string())
}

/// Parse a name list given as a JSON array or comma separated text.
pub fn parse_name_list(raw: &str) -> GatewayResult<Vec<String>> {
    let trimmed = raw.trim();
    let items: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| GatewayError::config(format!("invalid JSON list '{}': {}", trimmed, e)))?
    } else {
        trimmed.split(',').map(String::from).collect()
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
