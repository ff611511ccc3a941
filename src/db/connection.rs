//! sqlx-backed sessions for the gateway pool.
//!
//! Uses database-specific connection types (MySqlConnection, PgConnection,
//! SqliteConnection) rather than `Any` to keep full type support. Sessions are
//! opened read-only wherever the backend allows it, and statements always go
//! through the prepared-statement path so a second statement cannot ride along.

use crate::db::params::bind_params;
use crate::db::pool::Connector;
use crate::db::types::RowDecoder;
use crate::error::{GatewayError, GatewayResult};
use crate::impl_db_dispatch;
use crate::models::{ColumnMetadata, ConnectionSettings, DatabaseType, QueryParam, RawRowSet};
use futures_util::StreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Statement, TypeInfo};
use std::future::Future;
use std::str::FromStr;
use tracing::debug;

/// Columns of one table as the catalog reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumns {
    /// Table name as stored in the catalog.
    pub table: String,
    pub columns: Vec<String>,
}

/// Operations the gateway needs from a checked-out session.
pub trait QueryConnection: Send {
    fn database_type(&self) -> DatabaseType;

    /// Run one prepared statement and return at most `fetch_limit` rows.
    fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> impl Future<Output = GatewayResult<RawRowSet>> + Send;

    /// Look up a table's columns. `None` when the table does not exist.
    fn table_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = GatewayResult<Option<TableColumns>>> + Send;
}

/// A live database session.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl QueryConnection for DbConnection {
    fn database_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> GatewayResult<RawRowSet> {
        debug!(sql = %sql, params = params.len(), fetch_limit, "Executing statement");
        impl_db_dispatch!(self, {
            MySql(c) => mysql::fetch_rows(c, sql, params, fetch_limit).await,
            Postgres(c) => postgres::fetch_rows(c, sql, params, fetch_limit).await,
            SQLite(c) => sqlite::fetch_rows(c, sql, params, fetch_limit).await,
        })
    }

    async fn table_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> GatewayResult<Option<TableColumns>> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::table_columns(c, schema, table).await,
            Postgres(c) => postgres::table_columns(c, schema, table).await,
            SQLite(c) => sqlite::table_columns(c, schema, table).await,
        })
    }
}

/// Longest statement a PostgreSQL session will run, in milliseconds.
const PG_STATEMENT_TIMEOUT_MS: &str = "300000";

/// Opens sessions from resolved [`ConnectionSettings`].
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    settings: ConnectionSettings,
}

impl SqlxConnector {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    async fn open(&self) -> GatewayResult<DbConnection> {
        let url = &self.settings.connection_string;
        let db_type = self.settings.db_type;
        let connected = match db_type {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(url)
                    .map_err(|e| invalid_url(db_type, e))?
                    .charset("utf8mb4");
                let mut conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_failed(db_type, e))?;
                sqlx::query("SET SESSION TRANSACTION READ ONLY")
                    .execute(&mut conn)
                    .await
                    .map_err(|e| connect_failed(db_type, e))?;
                DbConnection::MySql(conn)
            }
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(url)
                    .map_err(|e| invalid_url(db_type, e))?
                    .options([
                        ("default_transaction_read_only", "on"),
                        // server-side backstop; per-call timeouts are enforced by the gateway
                        ("statement_timeout", PG_STATEMENT_TIMEOUT_MS),
                    ]);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_failed(db_type, e))?;
                DbConnection::Postgres(conn)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| invalid_url(db_type, e))?
                    .read_only(true);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_failed(db_type, e))?;
                DbConnection::SQLite(conn)
            }
        };
        Ok(connected)
    }
}

impl Connector for SqlxConnector {
    type Connection = DbConnection;

    fn connect(&self) -> impl Future<Output = GatewayResult<DbConnection>> + Send {
        self.open()
    }

    async fn ping(&self, conn: &mut DbConnection) -> GatewayResult<()> {
        impl_db_dispatch!(conn, {
            MySql(c) => c.ping().await,
            Postgres(c) => c.ping().await,
            SQLite(c) => c.ping().await,
        })
        .map_err(GatewayError::from)
    }

    async fn close(&self, conn: DbConnection) {
        let result = impl_db_dispatch!(conn, {
            MySql(c) => c.close().await,
            Postgres(c) => c.close().await,
            SQLite(c) => c.close().await,
        });
        if let Err(e) = result {
            debug!(error = %e, "Error while closing connection");
        }
    }

    async fn close_hard(&self, conn: DbConnection) {
        let result = impl_db_dispatch!(conn, {
            MySql(c) => c.close_hard().await,
            Postgres(c) => c.close_hard().await,
            SQLite(c) => c.close_hard().await,
        });
        if let Err(e) = result {
            debug!(error = %e, "Error while dropping broken connection");
        }
    }
}

fn invalid_url(db_type: DatabaseType, e: sqlx::Error) -> GatewayError {
    GatewayError::connection(
        format!("Invalid {} connection string: {}", db_type, e),
        format!(
            "Check the connection settings; expected {}://user:pass@host/database",
            db_type.scheme()
        ),
    )
}

fn connect_failed(db_type: DatabaseType, e: sqlx::Error) -> GatewayError {
    let suggestion = connection_suggestion(db_type, &e);
    GatewayError::connection(format!("Failed to connect: {}", e), suggestion)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }
    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the configured username and password".to_string();
    }
    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }
    match db_type {
        DatabaseType::SQLite => "Verify the database file exists and is readable".to_string(),
        _ => format!("Verify DB_SERVER and DB_NAME for {}", db_type),
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> GatewayResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(GatewayError::from)?);
    }
    Ok(rows)
}

fn row_set<R: RowDecoder>(rows: &[R], columns: Vec<ColumnMetadata>) -> RawRowSet {
    RawRowSet {
        columns,
        rows: rows.iter().map(RowDecoder::decode_values).collect(),
    }
}

/// Column metadata of a prepared statement, used when a query produced no rows.
fn described_columns<'q, S: Statement<'q>>(
    prepared: Result<S, sqlx::Error>,
) -> Vec<ColumnMetadata> {
    match prepared {
        Ok(statement) => statement
            .columns()
            .iter()
            .map(|c| ColumnMetadata::new(c.name(), c.type_info().name()))
            .collect(),
        Err(e) => {
            debug!(error = %e, "Could not describe empty result");
            Vec::new()
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> GatewayResult<RawRowSet> {
        let results = bind_params::<sqlx::MySql>(sql, params)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>()
            .await;
        let rows: Vec<MySqlRow> = collect_rows(results)?;
        let columns = match rows.first() {
            Some(row) => row.column_metadata(),
            None => described_columns((&mut *conn).prepare(sql).await),
        };
        Ok(row_set(&rows, columns))
    }

    /// MySQL may return catalog strings as VARBINARY.
    fn text_at(row: &MySqlRow, idx: usize) -> Option<String> {
        row.try_get::<String, _>(idx).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(idx)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
        })
    }

    pub async fn table_columns(
        conn: &mut MySqlConnection,
        schema: &str,
        table: &str,
    ) -> GatewayResult<Option<TableColumns>> {
        let rows = sqlx::query(
            r#"
            SELECT TABLE_NAME, COLUMN_NAME
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
        Ok(to_table_columns(
            rows.iter()
                .filter_map(|r| Some((text_at(r, 0)?, text_at(r, 1)?))),
        ))
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::PgRow;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> GatewayResult<RawRowSet> {
        let results = bind_params::<sqlx::Postgres>(sql, params)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>()
            .await;
        let rows: Vec<PgRow> = collect_rows(results)?;
        let columns = match rows.first() {
            Some(row) => row.column_metadata(),
            None => described_columns((&mut *conn).prepare(sql).await),
        };
        Ok(row_set(&rows, columns))
    }

    pub async fn table_columns(
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> GatewayResult<Option<TableColumns>> {
        // Unquoted identifiers fold to lower case in PostgreSQL; match either spelling.
        let rows = sqlx::query(
            r#"
            SELECT table_name::text, column_name::text
            FROM information_schema.columns
            WHERE table_schema = $1
              AND (table_name = $2 OR table_name = lower($2))
            ORDER BY (table_name = $2) DESC, ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
        let first_table: Option<String> = rows.first().and_then(|r| r.try_get(0).ok());
        Ok(to_table_columns(rows.iter().filter_map(|r| {
            let t: String = r.try_get(0).ok()?;
            let c: String = r.try_get(1).ok()?;
            // Keep only the best-matching spelling.
            (Some(&t) == first_table.as_ref()).then_some((t, c))
        })))
    }
}

mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// VM instructions between cancellation checks.
    const PROGRESS_OPS: i32 = 1000;

    /// Interrupts the session's running statement if dropped while armed.
    ///
    /// The gateway cancels a timed-out call by dropping its future. SQLite
    /// runs the statement on a worker thread that would otherwise keep going,
    /// so the progress handler polls this flag and aborts the statement.
    pub(super) struct InterruptGuard {
        cancelled: Arc<AtomicBool>,
        armed: bool,
    }

    impl InterruptGuard {
        pub(super) async fn install(conn: &mut SqliteConnection) -> GatewayResult<Self> {
            let cancelled = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancelled);
            conn.lock_handle()
                .await?
                .set_progress_handler(PROGRESS_OPS, move || !flag.load(Ordering::Acquire));
            Ok(Self {
                cancelled,
                armed: true,
            })
        }

        pub(super) fn disarm(mut self) {
            self.armed = false;
        }
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            if self.armed {
                self.cancelled.store(true, Ordering::Release);
            }
        }
    }

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> GatewayResult<RawRowSet> {
        let guard = InterruptGuard::install(conn).await?;
        let outcome = run_fetch(conn, sql, params, fetch_limit).await;
        guard.disarm();
        outcome
    }

    async fn run_fetch(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        fetch_limit: usize,
    ) -> GatewayResult<RawRowSet> {
        let results = bind_params::<sqlx::Sqlite>(sql, params)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>()
            .await;
        let rows: Vec<SqliteRow> = collect_rows(results)?;
        let columns = match rows.first() {
            Some(row) => row.column_metadata(),
            None => described_columns((&mut *conn).prepare(sql).await),
        };
        Ok(row_set(&rows, columns))
    }

    pub async fn table_columns(
        conn: &mut SqliteConnection,
        schema: &str,
        table: &str,
    ) -> GatewayResult<Option<TableColumns>> {
        // SQLite identifiers are case-insensitive, so the requested spelling works as-is.
        let guard = InterruptGuard::install(conn).await?;
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await;
        guard.disarm();
        let rows = rows?;
        Ok(to_table_columns(rows.iter().filter_map(|r| {
            let c: String = r.try_get(0).ok()?;
            Some((table.to_string(), c))
        })))
    }
}

fn to_table_columns<I>(pairs: I) -> Option<TableColumns>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut table = None;
    let mut columns = Vec::new();
    for (t, c) in pairs {
        table.get_or_insert(t);
        columns.push(c);
    }
    table.map(|table| TableColumns { table, columns })
}
