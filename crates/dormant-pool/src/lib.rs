//! Connection pooling for dormant.
//!
//! [`ConnectionPool`] keeps idle connections made by a [`ConnectionFactory`]
//! and hands them out as [`PooledConnection`]s. It implements
//! [`ConnectionProvider`], so isolated work and sessions can borrow from it.
//!
//! Connections are checked on the way out: those past their maximum lifetime
//! or idle timeout are closed, and with `test_on_checkout` a `SELECT 1` check
//! weeds out broken ones. When every connection is in use, `acquire` waits
//! in FIFO order on an `asupersync` semaphore until one is released or the
//! acquire timeout passes.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use asupersync::CancelReason;
use asupersync::sync::{AcquireError, Semaphore};
use asupersync::time::{timeout, wall_now};
use dormant_core::error::{PoolError, PoolErrorKind};
use dormant_core::{Connection, ConnectionProvider, Cx, Dialect, Error, Outcome, Row, Value, try_outcome};
use serde::{Deserialize, Serialize};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain
    pub min_connections: usize,
    /// Maximum number of connections allowed
    pub max_connections: usize,
    /// Connection idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Maximum time to wait for a connection in milliseconds
    pub acquire_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds
    pub max_lifetime_ms: u64,
    /// Test connections before giving them out
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout_ms: 600_000,   // 10 minutes
            acquire_timeout_ms: 30_000, // 30 seconds
            max_lifetime_ms: 1_800_000, // 30 minutes
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    pub fn idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn acquire_timeout(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    pub fn max_lifetime(mut self, ms: u64) -> Self {
        self.max_lifetime_ms = ms;
        self
    }

    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(pool_error(PoolErrorKind::Config, "max_connections must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(pool_error(
                PoolErrorKind::Config,
                format!(
                    "min_connections ({}) exceeds max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        Ok(())
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of active connections
    pub active_connections: usize,
    /// Number of pending acquire requests
    pub pending_requests: usize,
}

/// Opens new physical connections for a pool.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
    })
}

/// A connection borrowed from the pool. Hand it back with
/// [`ConnectionProvider::release`].
#[derive(Debug)]
pub struct PooledConnection<C> {
    conn: C,
    created_at: Instant,
}

impl<C> PooledConnection<C> {
    /// Get the inner connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// How long ago the physical connection was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<C> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.conn.query(cx, sql, params)
    }

    fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.conn.execute(cx, sql, params)
    }

    fn execute_returning_keys(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        key_columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.conn.execute_returning_keys(cx, sql, params, key_columns)
    }

    fn auto_commit(&self) -> bool {
        self.conn.auto_commit()
    }

    fn set_auto_commit(&self, cx: &Cx, enabled: bool) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.set_auto_commit(cx, enabled)
    }

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.begin(cx)
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.commit(cx)
    }

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.rollback(cx)
    }
}

struct IdleConnection<C> {
    conn: PooledConnection<C>,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    total: usize,
    active: usize,
    pending: usize,
}

/// Counts a caller waiting for a permit, however the wait ends.
struct Waiting<'a, C> {
    state: &'a Mutex<PoolState<C>>,
}

impl<'a, C> Waiting<'a, C> {
    fn enter(state: &'a Mutex<PoolState<C>>) -> Self {
        state.lock().unwrap_or_else(PoisonError::into_inner).pending += 1;
        Self { state }
    }
}

impl<C> Drop for Waiting<'_, C> {
    fn drop(&mut self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).pending -= 1;
    }
}

fn closed_error() -> Error {
    pool_error(PoolErrorKind::Closed, "connection pool is closed")
}

/// A bounded pool of connections.
///
/// Every checked-out connection holds one permit of a FIFO semaphore sized
/// to `max_connections`; callers beyond that wait in line on the semaphore
/// until a connection is released or the acquire timeout fires.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    permits: Semaphore,
    state: Mutex<PoolState<F::Connection>>,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a new connection pool. No connection is opened yet; see
    /// [`warm_up`](Self::warm_up).
    #[allow(clippy::result_large_err)]
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            factory,
            permits: Semaphore::new(config.max_connections),
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                active: 0,
                pending: 0,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_connections: state.total,
            idle_connections: state.idle.len(),
            active_connections: state.active,
            pending_requests: state.pending,
        }
    }

    /// Check if every connection the pool may hold is checked out.
    pub fn at_capacity(&self) -> bool {
        self.permits.available_permits() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the pool and drop its idle connections. Waiting callers fail
    /// with a closed-pool error; connections still out are dropped when
    /// released.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let mut state = self.lock();
        let dropped = state.idle.len();
        state.total -= dropped;
        state.idle.clear();
        tracing::info!(dropped, "Closed connection pool");
    }

    fn expired(&self, conn: &PooledConnection<F::Connection>, idle_since: Option<Instant>) -> bool {
        if conn.age() >= Duration::from_millis(self.config.max_lifetime_ms) {
            return true;
        }
        idle_since.is_some_and(|since| since.elapsed() >= Duration::from_millis(self.config.idle_timeout_ms))
    }

    /// Take a permit, waiting in line up to the acquire timeout.
    async fn reserve(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Ok(permit) = self.permits.try_acquire(1) {
            permit.forget();
            return Outcome::Ok(());
        }
        if self.permits.is_closed() {
            return Outcome::Err(closed_error());
        }

        let wait = Duration::from_millis(self.config.acquire_timeout_ms);
        tracing::trace!(timeout_ms = self.config.acquire_timeout_ms, "Waiting for a pooled connection");
        let acquired = {
            let _waiting = Waiting::enter(&self.state);
            timeout(wall_now(), wait, self.permits.acquire(cx, 1)).await
        };
        match acquired {
            Ok(Ok(permit)) => {
                permit.forget();
                Outcome::Ok(())
            }
            Ok(Err(AcquireError::Cancelled)) => Outcome::Cancelled(
                cx.cancel_reason()
                    .unwrap_or_else(|| CancelReason::user("pooled connection checkout cancelled")),
            ),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Connection pool closed while waiting");
                Outcome::Err(closed_error())
            }
            Err(_) => Outcome::Err(pool_error(
                PoolErrorKind::Exhausted,
                format!(
                    "timed out after {} ms waiting for one of {} connections",
                    self.config.acquire_timeout_ms, self.config.max_connections
                ),
            )),
        }
    }

    /// Pop the oldest idle connection that has not expired.
    fn take_idle(&self) -> Option<PooledConnection<F::Connection>> {
        let mut state = self.lock();
        while let Some(idle) = state.idle.pop_front() {
            if self.expired(&idle.conn, Some(idle.idle_since)) {
                state.total -= 1;
                tracing::debug!("Closing expired idle connection");
                continue;
            }
            state.active += 1;
            return Some(idle.conn);
        }
        None
    }

    /// Forget a checked-out connection; its permit stays with the caller.
    fn drop_checked_out(&self) {
        let mut state = self.lock();
        state.total -= 1;
        state.active -= 1;
    }

    /// Forget a checked-out connection and give its permit back.
    fn discard(&self) {
        self.drop_checked_out();
        self.permits.add_permits(1);
    }

    async fn open(&self, cx: &Cx) -> Outcome<PooledConnection<F::Connection>, Error> {
        {
            let mut state = self.lock();
            state.total += 1;
            state.active += 1;
        }
        match self.factory.connect(cx).await {
            Outcome::Ok(conn) => {
                tracing::debug!("Opened pooled connection");
                Outcome::Ok(PooledConnection {
                    conn,
                    created_at: Instant::now(),
                })
            }
            Outcome::Err(e) => {
                self.discard();
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                self.discard();
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                self.discard();
                Outcome::Panicked(p)
            }
        }
    }

    /// Check out a connection, opening one if no idle connection passes its checks.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn get(&self, cx: &Cx) -> Outcome<PooledConnection<F::Connection>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if self.is_closed() {
            return Outcome::Err(closed_error());
        }
        try_outcome!(self.reserve(cx).await);

        while let Some(conn) = self.take_idle() {
            if !self.config.test_on_checkout {
                return Outcome::Ok(conn);
            }
            match conn.query(cx, "SELECT 1", &[]).await {
                Outcome::Ok(_) => return Outcome::Ok(conn),
                Outcome::Err(e) => {
                    tracing::warn!(error = %e, "Discarding connection that failed its checkout test");
                    self.drop_checked_out();
                }
                Outcome::Cancelled(r) => {
                    self.discard();
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => {
                    self.discard();
                    return Outcome::Panicked(p);
                }
            }
        }
        // Holding a permit with no idle connection left means total < max.
        self.open(cx).await
    }

    /// Return a connection to the pool.
    pub fn put(&self, conn: PooledConnection<F::Connection>) {
        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            if self.is_closed() || self.expired(&conn, None) {
                state.total = state.total.saturating_sub(1);
                tracing::debug!("Closing released connection");
            } else {
                state.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
            }
        }
        self.permits.add_permits(1);
    }

    /// Open connections until `min_connections` are idle or in use.
    pub async fn warm_up(&self, cx: &Cx) -> Outcome<usize, Error> {
        let mut opened = 0;
        while self.lock().total < self.config.min_connections {
            let Ok(permit) = self.permits.try_acquire(1) else {
                break;
            };
            permit.forget();
            let conn = try_outcome!(self.open(cx).await);
            self.put(conn);
            opened += 1;
        }
        tracing::debug!(opened, "Warmed up connection pool");
        Outcome::Ok(opened)
    }
}

impl<F: ConnectionFactory> ConnectionProvider for ConnectionPool<F> {
    type Connection = PooledConnection<F::Connection>;

    fn acquire(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send {
        self.get(cx)
    }

    fn release(&self, connection: Self::Connection) {
        self.put(connection);
    }
}
