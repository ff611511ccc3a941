//! Bounded connection pool.
//!
//! The pool is generic over a [`Connector`] so that the checkout protocol can
//! be exercised without a database. Checked-out connections are bounded by a
//! semaphore holding `max` permits. A healthy connection is pushed back to the
//! idle queue *before* its permit is returned, so a waiter that wakes up on the
//! permit always sees it and the live count never exceeds `max`.
//!
//! # Concurrency
//!
//! - The idle queue is a `std::sync::Mutex`; it is never held across an await.
//! - Pings, connects and closes run outside every lock.
//! - A broken session is closed on a detached task, so releasing it never
//!   waits on a wedged driver. Every close is bounded by [`CLOSE_TIMEOUT`].
//! - The reaper holds a `Weak` reference and exits when the pool is dropped.

use crate::config::PoolOptions;
use crate::error::{GatewayError, GatewayResult};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opens, checks and closes raw database sessions for the pool.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new session.
    fn connect(&self) -> impl Future<Output = GatewayResult<Self::Connection>> + Send;

    /// Lightweight liveness check.
    fn ping(&self, conn: &mut Self::Connection)
    -> impl Future<Output = GatewayResult<()>> + Send;

    /// Close a session gracefully.
    fn close(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;

    /// Tear down a session in an unknown state without a graceful shutdown.
    fn close_hard(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;
}

/// Upper bound on closing a single session.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved pool sizing and timing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: u32,
    pub max: u32,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_ttl: Duration,
    pub reap_interval: Duration,
    pub test_before_acquire: bool,
}

impl From<&PoolOptions> for PoolConfig {
    fn from(opts: &PoolOptions) -> Self {
        Self {
            min: opts.min_connections_or_default(),
            max: opts.max_connections_or_default(),
            acquire_timeout: opts.acquire_timeout_or_default(),
            connect_timeout: opts.connect_timeout_or_default(),
            idle_ttl: opts.idle_ttl_or_default(),
            reap_interval: opts.reap_interval_or_default(),
            test_before_acquire: opts.test_before_acquire_or_default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolOptions::default())
    }
}

/// Point-in-time pool health snapshot.
#[derive(Debug, Clone, serde::Serialize, schemars::JsonSchema)]
pub struct PoolStatus {
    pub min: u32,
    pub max: u32,
    /// Idle plus checked out.
    pub open: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub peak_checked_out: usize,
    pub acquisitions: u64,
    pub exhausted: u64,
    pub opened: u64,
    pub discarded: u64,
    pub reaped: u64,
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct IdleConnection<T> {
    conn: T,
    idle_since: Instant,
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
    acquisitions: AtomicU64,
    exhausted: AtomicU64,
    opened: AtomicU64,
    discarded: AtomicU64,
    reaped: AtomicU64,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    counters: Counters,
    last_error: Mutex<Option<String>>,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> PoolInner<C> {
    fn idle_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<IdleConnection<C::Connection>>> {
        // A poisoned queue still holds valid connections.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_error(&self, err: &GatewayError) {
        let mut slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(err.to_string());
    }

    async fn open(&self) -> GatewayResult<C::Connection> {
        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::connection(
                format!("Timed out opening connection after {:?}", timeout),
                "Check network connectivity or increase the connect timeout",
            )),
        };
        match result {
            Ok(conn) => {
                self.counters.live.fetch_add(1, Ordering::AcqRel);
                self.counters.opened.fetch_add(1, Ordering::Relaxed);
                debug!("Opened database connection");
                Ok(conn)
            }
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        }
    }

    /// Open a connection, retrying once.
    async fn open_with_retry(&self) -> GatewayResult<C::Connection> {
        match self.open().await {
            Ok(conn) => Ok(conn),
            Err(first) => {
                warn!(error = %first, "Opening connection failed, retrying once");
                self.open().await
            }
        }
    }

    async fn discard(&self, conn: C::Connection) {
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        if tokio::time::timeout(CLOSE_TIMEOUT, self.connector.close(conn))
            .await
            .is_err()
        {
            warn!(timeout_secs = CLOSE_TIMEOUT.as_secs(), "Closing connection timed out");
        }
    }

    /// Forget a broken session now and tear it down in the background.
    fn discard_broken(self: &Arc<Self>, conn: C::Connection) {
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::time::timeout(CLOSE_TIMEOUT, pool.connector.close_hard(conn))
                .await
                .is_err()
            {
                warn!(
                    timeout_secs = CLOSE_TIMEOUT.as_secs(),
                    "Abandoned a broken connection that would not close"
                );
            }
        });
    }

    /// Reuse an idle connection when it passes the liveness check, otherwise open one.
    async fn checkout(&self) -> GatewayResult<C::Connection> {
        let candidate = self.idle_queue().pop_back();
        if let Some(idle) = candidate {
            let mut conn = idle.conn;
            if !self.config.test_before_acquire {
                return Ok(conn);
            }
            match self.connector.ping(&mut conn).await {
                Ok(()) => return Ok(conn),
                Err(e) => {
                    warn!(error = %e, "Idle connection failed liveness check, replacing");
                    self.record_error(&e);
                    self.discard(conn).await;
                }
            }
        }
        self.open_with_retry().await
    }

    fn mark_checked_out(&self) {
        let now = self.counters.checked_out.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .peak_checked_out
            .fetch_max(now, Ordering::AcqRel);
    }

    /// Close idle connections past their TTL, keeping at least `min` open.
    async fn reap(&self) -> usize {
        let ttl = self.config.idle_ttl;
        let expired: Vec<C::Connection> = {
            let mut idle = self.idle_queue();
            let live = self.counters.live.load(Ordering::Acquire);
            let mut removable = live.saturating_sub(self.config.min as usize);
            let mut expired = Vec::new();
            // Oldest entries sit at the front.
            while removable > 0 {
                match idle.front() {
                    Some(entry) if entry.idle_since.elapsed() > ttl => {
                        if let Some(entry) = idle.pop_front() {
                            expired.push(entry.conn);
                            removable -= 1;
                        }
                    }
                    _ => break,
                }
            }
            expired
        };

        let count = expired.len();
        for conn in expired {
            self.counters.reaped.fetch_add(1, Ordering::Relaxed);
            self.discard(conn).await;
        }
        count
    }
}

impl<C: Connector> Drop for PoolInner<C> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Bounded pool of database sessions. Cheap to clone.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field(
                "checked_out",
                &self.inner.counters.checked_out.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an empty pool and start its reaper.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            connector,
            permits: Arc::new(Semaphore::new(config.max as usize)),
            idle: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
            last_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let interval = inner.config.reap_interval;
        let handle = tokio::spawn(async move {
            Self::reap_task(weak, interval).await;
        });
        if let Ok(mut slot) = inner.reaper.lock() {
            *slot = Some(handle);
        }

        Self { inner }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Open `min` connections up front.
    pub async fn prewarm(&self) -> GatewayResult<()> {
        let target = self.inner.config.min as usize;
        while self.inner.counters.live.load(Ordering::Acquire) < target {
            let permit = self.acquire_permit(self.inner.config.acquire_timeout).await?;
            let conn = self.inner.open_with_retry().await?;
            self.inner.idle_queue().push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
            drop(permit);
        }
        info!(connections = target, "Connection pool pre-warmed");
        Ok(())
    }

    async fn acquire_permit(&self, timeout: Duration) -> GatewayResult<OwnedSemaphorePermit> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(pool_closed());
        }
        let started = Instant::now();
        match tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned()).await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(pool_closed()),
            Err(_) => {
                self.inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                let waited = started.elapsed();
                warn!(
                    waited_ms = waited.as_millis() as u64,
                    max = self.inner.config.max,
                    "Connection pool exhausted"
                );
                Err(GatewayError::pool_exhausted(waited))
            }
        }
    }

    /// Check out a connection, waiting up to `timeout` for a free slot.
    pub async fn acquire(&self, timeout: Duration) -> GatewayResult<PooledConnection<C>> {
        self.inner
            .counters
            .acquisitions
            .fetch_add(1, Ordering::Relaxed);
        let permit = self.acquire_permit(timeout).await?;
        // On failure the permit drops here and the slot frees up.
        let conn = self.inner.checkout().await?;
        self.inner.mark_checked_out();
        debug!(
            checked_out = self.inner.counters.checked_out.load(Ordering::Relaxed),
            "Connection checked out"
        );
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Check out a connection using the configured acquire timeout.
    pub async fn acquire_default(&self) -> GatewayResult<PooledConnection<C>> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    /// Return a connection. Unhealthy ones are closed and never re-queued.
    pub async fn release(&self, conn: PooledConnection<C>, healthy: bool) {
        conn.release(healthy).await;
    }

    pub fn status(&self) -> PoolStatus {
        let c = &self.inner.counters;
        let idle = self.inner.idle_queue().len();
        let last_error = self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        PoolStatus {
            min: self.inner.config.min,
            max: self.inner.config.max,
            open: c.live.load(Ordering::Acquire),
            idle,
            checked_out: c.checked_out.load(Ordering::Acquire),
            peak_checked_out: c.peak_checked_out.load(Ordering::Acquire),
            acquisitions: c.acquisitions.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            opened: c.opened.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            reaped: c.reaped.load(Ordering::Relaxed),
            closed: self.inner.closed.load(Ordering::Acquire),
            last_error,
        }
    }

    /// Run one reaping pass now.
    pub async fn reap_idle(&self) -> usize {
        self.inner.reap().await
    }

    /// Stop handing out connections and close every idle one.
    ///
    /// Checked-out connections are closed as they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();
        if let Ok(mut slot) = self.inner.reaper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        let drained: Vec<_> = self.inner.idle_queue().drain(..).collect();
        for entry in drained {
            self.inner.discard(entry.conn).await;
        }
        info!("Connection pool closed");
    }

    async fn reap_task(weak: Weak<PoolInner<C>>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                debug!("Connection pool dropped, reaper exiting");
                return;
            };
            let reaped = inner.reap().await;
            if reaped > 0 {
                info!(reaped, "Closed idle connections past their TTL");
            }
            // Release the strong reference before sleeping.
            drop(inner);
        }
    }
}

fn pool_closed() -> GatewayError {
    GatewayError::connection("Connection pool is closed", "The gateway is shutting down")
}

/// A checked-out connection. Exactly one owner at a time.
///
/// Return it with [`PooledConnection::release`]. Dropping it without a release
/// discards the session, since its state is unknown.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("held", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> PooledConnection<C> {
    /// Borrow the underlying session.
    pub fn connection(&mut self) -> GatewayResult<&mut C::Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| GatewayError::internal("connection already released"))
    }

    /// Return the connection to the pool.
    pub async fn release(mut self, healthy: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        pool.counters.checked_out.fetch_sub(1, Ordering::AcqRel);

        if !healthy {
            debug!("Discarding broken connection");
            pool.discard_broken(conn);
        } else if pool.closed.load(Ordering::Acquire) {
            debug!("Pool closed, closing returned connection");
            pool.discard(conn).await;
        } else {
            pool.idle_queue().push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
            debug!("Connection returned to pool");
        }
        drop(permit);
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.pool.counters.checked_out.fetch_sub(1, Ordering::AcqRel);
        self.pool.counters.live.fetch_sub(1, Ordering::AcqRel);
        self.pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
        drop(conn);
        warn!("Connection released via Drop - consider using explicit release()");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector for exercising the pool and gateway.

    use super::*;
    use crate::db::connection::{QueryConnection, TableColumns};
    use crate::models::{DatabaseType, QueryParam, RawRowSet};

    #[derive(Debug)]
    pub struct MockConnection {
        pub id: usize,
        connector: Arc<MockConnector>,
    }

    /// Scripted connector. Queries return `rows` truncated to the fetch limit.
    #[derive(Default)]
    pub struct MockConnector {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub pings: AtomicUsize,
        pub queries: AtomicUsize,
        pub fail_connect: AtomicBool,
        pub fail_ping: AtomicBool,
        /// Closing never completes.
        pub hang_close: AtomicBool,
        pub hard_closed: AtomicUsize,
        /// Number of upcoming queries that fail with a connection error.
        pub query_failures: AtomicUsize,
        pub rows: Mutex<RawRowSet>,
        pub delay: Mutex<Duration>,
        pub table: Mutex<Option<TableColumns>>,
        pub last_sql: Mutex<Option<(String, Vec<QueryParam>, usize)>>,
    }

    impl std::fmt::Debug for MockConnector {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockConnector")
                .field("opened", &self.opened)
                .field("closed", &self.closed)
                .finish_non_exhaustive()
        }
    }

    impl MockConnector {
        pub fn with_rows(rows: RawRowSet) -> Arc<Self> {
            let connector = Self::default();
            *connector.rows.lock().unwrap() = rows;
            Arc::new(connector)
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }

        pub fn set_table(&self, table: &str, columns: &[&str]) {
            *self.table.lock().unwrap() = Some(TableColumns {
                table: table.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
            });
        }

        pub fn last_sql(&self) -> Option<(String, Vec<QueryParam>, usize)> {
            self.last_sql.lock().unwrap().clone()
        }
    }

    impl Connector for Arc<MockConnector> {
        type Connection = MockConnection;

        fn connect(&self) -> impl Future<Output = GatewayResult<MockConnection>> + Send {
            let this = Arc::clone(self);
            async move {
                if this.fail_connect.load(Ordering::SeqCst) {
                    return Err(GatewayError::connection(
                        "connection refused by postgres://svc:pw1234@db/x",
                        "check server",
                    ));
                }
                let id = this.opened.fetch_add(1, Ordering::SeqCst);
                Ok(MockConnection {
                    id,
                    connector: this,
                })
            }
        }

        fn ping(
            &self,
            _conn: &mut MockConnection,
        ) -> impl Future<Output = GatewayResult<()>> + Send {
            let this = Arc::clone(self);
            async move {
                this.pings.fetch_add(1, Ordering::SeqCst);
                if this.fail_ping.load(Ordering::SeqCst) {
                    Err(GatewayError::connection("ping failed", "reconnect"))
                } else {
                    Ok(())
                }
            }
        }

        fn close(&self, _conn: MockConnection) -> impl Future<Output = ()> + Send {
            self.closed.fetch_add(1, Ordering::SeqCst);
            let hang = self.hang_close.load(Ordering::SeqCst);
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
            }
        }

        fn close_hard(&self, _conn: MockConnection) -> impl Future<Output = ()> + Send {
            self.hard_closed.fetch_add(1, Ordering::SeqCst);
            let hang = self.hang_close.load(Ordering::SeqCst);
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    impl QueryConnection for MockConnection {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::SQLite
        }

        async fn fetch_rows(
            &mut self,
            sql: &str,
            params: &[QueryParam],
            fetch_limit: usize,
        ) -> GatewayResult<RawRowSet> {
            let connector = Arc::clone(&self.connector);
            connector.queries.fetch_add(1, Ordering::SeqCst);
            *connector.last_sql.lock().unwrap() =
                Some((sql.to_string(), params.to_vec(), fetch_limit));
            let delay = *connector.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failing = connector
                .query_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(GatewayError::connection(
                    "server closed the connection unexpectedly",
                    "retry",
                ));
            }
            let mut set = connector.rows.lock().unwrap().clone();
            set.rows.truncate(fetch_limit);
            Ok(set)
        }

        async fn table_columns(
            &mut self,
            _schema: &str,
            table: &str,
        ) -> GatewayResult<Option<TableColumns>> {
            let known = self.connector.table.lock().unwrap().clone();
            Ok(known.filter(|t| t.table.eq_ignore_ascii_case(table)))
        }
    }

    pub fn config(min: u32, max: u32) -> PoolConfig {
        PoolConfig {
            min,
            max,
            acquire_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(1),
            idle_ttl: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
            test_before_acquire: true,
        }
    }
}
