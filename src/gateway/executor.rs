//! The execution gateway.
//!
//! Single path every query takes:
//!
//! 1. validate against the (optionally narrowed) allow-list; rejections
//!    return before the pool is touched
//! 2. acquire a pooled connection under the acquire timeout
//! 3. run the admitted statement under the query timeout, fetching at most
//!    `row_cap + 1` rows
//! 4. release the connection on every path; a timed-out or broken session
//!    is released unhealthy and replaced by the pool
//! 5. format, then pass the outcome through the middleware chain
//!
//! A connection-level failure during execution is retried once on a fresh
//! connection. Read-only statements make that safe.

use super::allow_list::SchemaAllowList;
use super::catalog::ColumnCatalog;
use super::formatter;
use super::middleware::Middleware;
use super::schema::{self, CatalogQuery};
use super::validator::{AdmittedQuery, QueryValidator, TableTarget};
use crate::config::GatewayConfig;
use crate::db::{
    ConnectionPool, Connector, PoolConfig, PoolStatus, QueryConnection, SqlxConnector,
};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType, ExecutionResult, Query, QueryParam, RawRowSet,
    RunOptions, TableQuery,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Gateway over real database sessions.
pub type SqlGateway = ExecutionGateway<SqlxConnector>;

/// What to run once a connection is in hand.
enum Plan<'a> {
    Admitted(&'a AdmittedQuery),
    /// Structured request whose columns still need the catalog.
    Table {
        query: &'a TableQuery,
        target: &'a TableTarget,
    },
    /// Gateway-authored catalog read.
    Catalog(&'a CatalogQuery),
}

pub struct ExecutionGateway<C: Connector> {
    pool: ConnectionPool<C>,
    validator: QueryValidator,
    allow_list: SchemaAllowList,
    catalog: ColumnCatalog,
    middleware: Middleware,
    default_max_rows: u32,
    default_timeout: Duration,
}

impl<C: Connector> std::fmt::Debug for ExecutionGateway<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGateway")
            .field("pool", &self.pool)
            .field("validator", &self.validator)
            .field("allow_list", &self.allow_list)
            .field("default_max_rows", &self.default_max_rows)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl ExecutionGateway<SqlxConnector> {
    /// Build the gateway and its pool from resolved configuration.
    ///
    /// Must be called inside a Tokio runtime; the pool starts its reaper here.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let allow_list =
            SchemaAllowList::new(&config.allowed_schemas, config.default_schema.clone())?;
        let validator = QueryValidator::new(config.connection.db_type)
            .with_allowed_procedures(&config.allowed_procedures);
        let pool = ConnectionPool::new(
            SqlxConnector::new(config.connection.clone()),
            PoolConfig::from(&config.pool),
        );
        Ok(Self::new(pool, validator, allow_list)
            .with_defaults(config.max_rows, config.query_timeout)
            .with_secrets(config.connection.secrets.clone()))
    }
}

impl<C> ExecutionGateway<C>
where
    C: Connector,
    C::Connection: QueryConnection,
{
    pub fn new(
        pool: ConnectionPool<C>,
        validator: QueryValidator,
        allow_list: SchemaAllowList,
    ) -> Self {
        Self {
            pool,
            validator,
            allow_list,
            catalog: ColumnCatalog::default(),
            middleware: Middleware::default(),
            default_max_rows: DEFAULT_MAX_ROWS,
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Row cap and query timeout used when a call does not set its own.
    pub fn with_defaults(mut self, max_rows: u32, timeout: Duration) -> Self {
        self.default_max_rows = max_rows;
        self.default_timeout = timeout;
        self
    }

    /// Values to scrub from every error message, on top of URL credentials.
    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.middleware = Middleware::standard(secrets);
        self
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn allow_list(&self) -> &SchemaAllowList {
        &self.allow_list
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Free-form SQL path.
    pub async fn execute_select(
        &self,
        sql: &str,
        params: Vec<QueryParam>,
        max_rows: Option<u32>,
    ) -> GatewayResult<ExecutionResult> {
        let options = RunOptions {
            max_rows,
            ..RunOptions::default()
        };
        self.run(Query::sql_with_params(sql, params), options).await
    }

    /// Structured path. The row cap is the smaller of `query.limit` and the gateway default.
    pub async fn query_table(&self, query: TableQuery) -> GatewayResult<ExecutionResult> {
        self.run(Query::Table(query), RunOptions::default()).await
    }

    /// Tables in one allowed schema, or in all of them.
    pub async fn list_tables(
        &self,
        schema: Option<&str>,
        include_views: bool,
    ) -> GatewayResult<ExecutionResult> {
        self.middleware
            .run("list_tables", self.list_tables_inner(schema, include_views))
            .await
    }

    /// Columns of one table. A table that does not exist is an error.
    pub async fn describe_table(&self, table: &str) -> GatewayResult<ExecutionResult> {
        self.middleware
            .run("describe_table", self.describe_table_inner(table))
            .await
    }

    /// Foreign keys declared on one table.
    pub async fn find_foreign_keys(&self, table: &str) -> GatewayResult<ExecutionResult> {
        self.middleware
            .run("find_foreign_keys", self.find_foreign_keys_inner(table))
            .await
    }

    async fn list_tables_inner(
        &self,
        schema: Option<&str>,
        include_views: bool,
    ) -> GatewayResult<ExecutionResult> {
        let schemas: Vec<String> = match schema {
            Some(name) if !self.allow_list.contains(name) => {
                return Err(GatewayError::schema_access_denied(name.trim(), "*"));
            }
            Some(name) => vec![name.trim().to_string()],
            None => self.allow_list.names().map(str::to_string).collect(),
        };
        if schemas.is_empty() {
            return Err(GatewayError::validation_rejected("No schemas are allowed"));
        }
        let query = schema::list_tables(self.db_type(), &schemas, include_views);
        self.run_catalog(&query).await
    }

    async fn describe_table_inner(&self, table: &str) -> GatewayResult<ExecutionResult> {
        let target = self.validator.resolve_table(table, &self.allow_list)?;
        let query = schema::describe_table(self.db_type(), &target);
        let result = self.run_catalog(&query).await?;
        if result.row_count == 0 {
            return Err(GatewayError::validation_rejected(format!(
                "Table '{}.{}' does not exist",
                target.schema, target.table
            )));
        }
        Ok(result)
    }

    async fn find_foreign_keys_inner(&self, table: &str) -> GatewayResult<ExecutionResult> {
        let target = self.validator.resolve_table(table, &self.allow_list)?;
        let query = schema::foreign_keys(self.db_type(), &target);
        self.run_catalog(&query).await
    }

    fn db_type(&self) -> DatabaseType {
        self.validator.database_type()
    }

    async fn run_catalog(&self, query: &CatalogQuery) -> GatewayResult<ExecutionResult> {
        debug!(params = query.params.len(), "Reading catalog");
        let cap = self.default_max_rows;
        let raw = self
            .execute(&Plan::Catalog(query), cap, self.default_timeout)
            .await?;
        Ok(formatter::format(raw, cap as usize))
    }

    /// Validate, execute and format one request.
    pub async fn run(&self, query: Query, options: RunOptions) -> GatewayResult<ExecutionResult> {
        self.middleware
            .run(query.kind(), self.run_inner(query, options))
            .await
    }

    async fn run_inner(&self, query: Query, options: RunOptions) -> GatewayResult<ExecutionResult> {
        let allowed = self.allow_list.scoped(options.schema_scope.as_deref());
        let timeout = options.effective_timeout(self.default_timeout);
        let cap = options.effective_max_rows(self.default_max_rows);

        let (raw, row_cap) = match query {
            Query::Sql { text, params } => {
                let admitted = self.validator.admit_sql(&text, params, &allowed)?;
                debug!(sql = %admitted.sql(), params = admitted.params().len(), "Admitted query");
                let raw = self.execute(&Plan::Admitted(&admitted), cap, timeout).await?;
                (raw, cap)
            }
            Query::Table(table_query) => {
                let row_cap = table_query.limit.map_or(cap, |limit| limit.min(cap));
                let target = self.validator.resolve_table(&table_query.table, &allowed)?;
                let raw = match self.catalog.get(&target.schema, &target.table) {
                    Some(known) => {
                        let admitted =
                            self.validator.admit_table(&table_query, &target, &known, row_cap)?;
                        self.execute(&Plan::Admitted(&admitted), row_cap, timeout).await?
                    }
                    None => {
                        let plan = Plan::Table {
                            query: &table_query,
                            target: &target,
                        };
                        self.execute(&plan, row_cap, timeout).await?
                    }
                };
                (raw, row_cap)
            }
        };

        Ok(formatter::format(raw, row_cap as usize))
    }

    /// Run a plan, retrying once when the session fails underneath it.
    async fn execute(
        &self,
        plan: &Plan<'_>,
        row_cap: u32,
        timeout: Duration,
    ) -> GatewayResult<RawRowSet> {
        match self.attempt(plan, row_cap, timeout).await? {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Connection failed during execution, retrying once");
                self.attempt(plan, row_cap, timeout).await?
            }
            outcome => outcome,
        }
    }

    /// One acquire-execute-release cycle.
    ///
    /// The outer error is an acquire failure, which is never retried here;
    /// the inner result is the execution outcome.
    async fn attempt(
        &self,
        plan: &Plan<'_>,
        row_cap: u32,
        timeout: Duration,
    ) -> GatewayResult<GatewayResult<RawRowSet>> {
        let mut pooled = self.pool.acquire_default().await?;

        let outcome = match pooled.connection() {
            Ok(conn) => tokio::time::timeout(timeout, self.run_plan(conn, plan, row_cap)).await,
            Err(e) => Ok(Err(e)),
        };

        match outcome {
            Ok(Ok(rows)) => {
                pooled.release(true).await;
                Ok(Ok(rows))
            }
            Ok(Err(e)) => {
                pooled.release(!e.is_retryable()).await;
                Ok(Err(e))
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Query timed out, discarding connection"
                );
                pooled.release(false).await;
                Ok(Err(GatewayError::timeout("query", timeout.as_secs())))
            }
        }
    }

    async fn run_plan(
        &self,
        conn: &mut C::Connection,
        plan: &Plan<'_>,
        row_cap: u32,
    ) -> GatewayResult<RawRowSet> {
        let fetch_limit = row_cap as usize + 1;
        match plan {
            Plan::Admitted(admitted) => {
                conn.fetch_rows(admitted.sql(), admitted.params(), fetch_limit)
                    .await
            }
            Plan::Table { query, target } => {
                let known = match self.catalog.get(&target.schema, &target.table) {
                    Some(known) => known,
                    None => {
                        let columns = conn
                            .table_columns(&target.schema, &target.table)
                            .await?
                            .ok_or_else(|| {
                                GatewayError::validation_rejected(format!(
                                    "Table '{}.{}' does not exist",
                                    target.schema, target.table
                                ))
                            })?;
                        self.catalog.insert(&target.schema, &target.table, columns)
                    }
                };
                let admitted = self
                    .validator
                    .admit_table(query, target, &known, row_cap)?;
                debug!(sql = %admitted.sql(), params = admitted.params().len(), "Admitted table query");
                conn.fetch_rows(admitted.sql(), admitted.params(), fetch_limit)
                    .await
            }
            Plan::Catalog(query) => {
                conn.fetch_rows(&query.sql, &query.params, fetch_limit)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::testing::{MockConnector, config};
    use crate::models::{ColumnMetadata, DatabaseType, SqlValue};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn rows(n: usize) -> RawRowSet {
        RawRowSet {
            columns: vec![
                ColumnMetadata::new("id", "INTEGER"),
                ColumnMetadata::new("city", "TEXT"),
            ],
            rows: (0..n)
                .map(|i| vec![SqlValue::Int(i as i64), SqlValue::Text("Springfield".into())])
                .collect(),
        }
    }

    fn gateway(
        connector: Arc<MockConnector>,
        max: u32,
    ) -> ExecutionGateway<Arc<MockConnector>> {
        let pool = ConnectionPool::new(Arc::clone(&connector), config(0, max));
        let allow_list = SchemaAllowList::new(["dbo"], "dbo").unwrap();
        ExecutionGateway::new(pool, QueryValidator::new(DatabaseType::SQLite), allow_list)
    }

    #[tokio::test]
    async fn test_truncation_when_more_rows_than_cap() {
        let connector = MockConnector::with_rows(rows(10));
        let gw = gateway(Arc::clone(&connector), 2);
        let result = gw
            .execute_select("SELECT * FROM dbo.Customers", Vec::new(), Some(4))
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.row_count, 4);
        assert_eq!(connector.last_sql().unwrap().2, 5);
    }

    #[tokio::test]
    async fn test_no_truncation_when_rows_fit() {
        let connector = MockConnector::with_rows(rows(3));
        let gw = gateway(Arc::clone(&connector), 2);
        for cap in [3, 10] {
            let result = gw
                .execute_select("SELECT * FROM dbo.Customers", Vec::new(), Some(cap))
                .await
                .unwrap();
            assert!(!result.truncated);
            assert_eq!(result.row_count, 3);
            assert_eq!(result.rows[0], vec![json!(0), json!("Springfield")]);
        }
    }

    #[tokio::test]
    async fn test_rejection_never_touches_pool() {
        let connector = MockConnector::with_rows(rows(1));
        let gw = gateway(Arc::clone(&connector), 2);
        let err = gw
            .execute_select("SELECT * FROM dbo.Orders; DROP TABLE dbo.Orders;", Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_rejected");

        let err = gw
            .execute_select("SELECT * FROM sys.objects", Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");

        assert_eq!(gw.pool_status().acquisitions, 0);
        assert_eq!(connector.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schema_scope_narrows() {
        let connector = MockConnector::with_rows(rows(1));
        let gw = gateway(Arc::clone(&connector), 2);
        let options = RunOptions::default().with_schema_scope(["sales"]);
        let err = gw
            .run(Query::sql("SELECT * FROM dbo.Orders"), options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");
        assert_eq!(gw.pool_status().acquisitions, 0);
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let connector = MockConnector::with_rows(rows(1));
        connector.set_delay(Duration::from_millis(500));
        let gw = gateway(Arc::clone(&connector), 2);
        let options = RunOptions::default().with_timeout(Duration::from_millis(50));
        let err = gw
            .run(Query::sql("SELECT 1"), options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "query_timeout");

        let status = gw.pool_status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(status.discarded, 1);
    }

    #[tokio::test]
    async fn test_timeout_returns_at_deadline_when_close_hangs() {
        let connector = MockConnector::with_rows(rows(1));
        connector.set_delay(Duration::from_secs(30));
        connector.hang_close.store(true, Ordering::SeqCst);
        let gw = gateway(Arc::clone(&connector), 1);

        let started = std::time::Instant::now();
        let options = RunOptions::default().with_timeout(Duration::from_millis(50));
        let err = gw
            .run(Query::sql("SELECT 1"), options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "query_timeout");
        assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());

        // The single slot is usable again while the old session is still closing.
        connector.set_delay(Duration::ZERO);
        let result = gw.execute_select("SELECT 1", Vec::new(), None).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(gw.pool_status().open, 1);
    }

    #[tokio::test]
    async fn test_connection_failure_retried_once() {
        let connector = MockConnector::with_rows(rows(2));
        connector.query_failures.store(1, Ordering::SeqCst);
        let gw = gateway(Arc::clone(&connector), 2);
        let result = gw.execute_select("SELECT 1", Vec::new(), None).await.unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(connector.queries.load(Ordering::SeqCst), 2);
        assert_eq!(gw.pool_status().discarded, 1);
    }

    #[tokio::test]
    async fn test_connection_failure_surfaces_after_retry() {
        let connector = MockConnector::with_rows(rows(2));
        connector.query_failures.store(5, Ordering::SeqCst);
        let gw = gateway(Arc::clone(&connector), 2).with_secrets(vec!["pw1234".into()]);
        let err = gw.execute_select("SELECT 1", Vec::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), "connection_error");
        assert_eq!(connector.queries.load(Ordering::SeqCst), 2);
        assert_eq!(gw.pool_status().checked_out, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_scrubbed() {
        let connector = MockConnector::with_rows(rows(1));
        connector.fail_connect.store(true, Ordering::SeqCst);
        let gw = gateway(Arc::clone(&connector), 2);
        let err = gw.execute_select("SELECT 1", Vec::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), "connection_error");
        assert!(!err.to_string().contains("pw1234"), "{}", err);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_with_two_slots() {
        let connector = MockConnector::with_rows(rows(1));
        connector.set_delay(Duration::from_millis(600));
        let gw = Arc::new(gateway(Arc::clone(&connector), 2));

        let slow = |gw: Arc<ExecutionGateway<Arc<MockConnector>>>| async move {
            gw.execute_select("SELECT 1", Vec::new(), None).await
        };
        let first = tokio::spawn(slow(Arc::clone(&gw)));
        let second = tokio::spawn(slow(Arc::clone(&gw)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gw.pool_status().checked_out, 2);

        // Acquire timeout in the test pool config is 200ms.
        let third = gw.execute_select("SELECT 1", Vec::new(), None).await;
        assert_eq!(third.unwrap_err().kind(), "pool_exhausted");

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        let status = gw.pool_status();
        assert_eq!(status.peak_checked_out, 2);
        assert_eq!(status.exhausted, 1);
        assert_eq!(status.checked_out, 0);
    }

    #[tokio::test]
    async fn test_query_table_uses_catalog_and_binds_values() {
        let connector = MockConnector::with_rows(rows(2));
        connector.set_table("Customers", &["Id", "City"]);
        let gw = gateway(Arc::clone(&connector), 2);
        let query = TableQuery::new("customers")
            .with_filter_map(
                json!({"city": "Springfield' OR '1'='1"})
                    .as_object()
                    .unwrap(),
            )
            .unwrap()
            .with_limit(2);
        let result = gw.query_table(query).await.unwrap();
        assert_eq!(result.row_count, 2);
        assert!(!result.truncated);

        let (sql, params, fetch) = connector.last_sql().unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "dbo"."Customers" WHERE "City" = ? LIMIT 3"#
        );
        assert_eq!(params, vec![QueryParam::String("Springfield' OR '1'='1".into())]);
        assert_eq!(fetch, 3);
    }

    #[tokio::test]
    async fn test_query_table_unknown_column_and_table() {
        let connector = MockConnector::with_rows(rows(1));
        connector.set_table("Customers", &["Id", "City"]);
        let gw = gateway(Arc::clone(&connector), 2);

        let query = TableQuery::new("Customers").with_columns(["Password"]);
        let err = gw.query_table(query).await.unwrap_err();
        assert_eq!(err.kind(), "validation_rejected");

        let err = gw.query_table(TableQuery::new("Missing")).await.unwrap_err();
        assert_eq!(err.kind(), "validation_rejected");

        // Catalog is cached now: a second bad request fails before acquiring.
        let before = gw.pool_status().acquisitions;
        let query = TableQuery::new("Customers").with_columns(["Password"]);
        assert!(gw.query_table(query).await.is_err());
        assert_eq!(gw.pool_status().acquisitions, before);
        assert_eq!(gw.pool_status().checked_out, 0);
    }

    #[tokio::test]
    async fn test_query_table_rejects_foreign_schema() {
        let connector = MockConnector::with_rows(rows(1));
        let gw = gateway(Arc::clone(&connector), 2);
        let err = gw
            .query_table(TableQuery::new("sys.objects"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");
        assert_eq!(gw.pool_status().acquisitions, 0);
    }

    #[tokio::test]
    async fn test_list_tables_binds_allowed_schemas() {
        let connector = MockConnector::with_rows(rows(2));
        let gw = gateway(Arc::clone(&connector), 2);
        let result = gw.list_tables(None, false).await.unwrap();
        assert_eq!(result.row_count, 2);

        let (sql, params, _) = connector.last_sql().unwrap();
        assert!(sql.contains("pragma_table_list"));
        assert_eq!(params, vec![QueryParam::String("dbo".into())]);
        let status = gw.pool_status();
        assert_eq!(status.acquisitions, 1);
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 1);
    }

    #[tokio::test]
    async fn test_catalog_reads_respect_allow_list() {
        let connector = MockConnector::with_rows(rows(1));
        let gw = gateway(Arc::clone(&connector), 2);

        let err = gw.list_tables(Some("sys"), true).await.unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");
        let err = gw.describe_table("sys.objects").await.unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");
        let err = gw.find_foreign_keys("secret.keys").await.unwrap_err();
        assert_eq!(err.kind(), "schema_access_denied");

        assert_eq!(gw.pool_status().acquisitions, 0);
        assert_eq!(connector.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_describe_missing_table_releases_healthy() {
        let connector = MockConnector::with_rows(RawRowSet::default());
        let gw = gateway(Arc::clone(&connector), 2);
        let err = gw.describe_table("Nope").await.unwrap_err();
        assert_eq!(err.kind(), "validation_rejected");
        assert!(err.to_string().contains("dbo.Nope"), "{}", err);

        let status = gw.pool_status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 1);
        assert_eq!(status.discarded, 0);
    }

    #[tokio::test]
    async fn test_foreign_keys_bind_target() {
        let connector = MockConnector::with_rows(RawRowSet::default());
        let gw = gateway(Arc::clone(&connector), 2);
        let result = gw.find_foreign_keys("dbo.Orders").await.unwrap();
        assert_eq!(result.row_count, 0);

        let (_, params, _) = connector.last_sql().unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::String("dbo".into()),
                QueryParam::String("Orders".into()),
                QueryParam::String("dbo".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_catalog_read_times_out() {
        let connector = MockConnector::with_rows(rows(1));
        connector.set_delay(Duration::from_millis(500));
        let gw = gateway(Arc::clone(&connector), 2).with_defaults(100, Duration::from_millis(50));
        let err = gw.list_tables(None, true).await.unwrap_err();
        assert_eq!(err.kind(), "query_timeout");
        assert_eq!(gw.pool_status().discarded, 1);
    }
}
