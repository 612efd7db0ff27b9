//! Database connection traits.
//!
//! This module defines the seams between the persistence engine and drivers:
//!
//! - [`Connection`] - executes parameterized SQL and manages the physical transaction
//! - [`ConnectionProvider`] - hands out connections for work isolated from the
//!   session's ambient transaction
//!
//! All operations integrate with asupersync's structured concurrency via `Cx` context
//! for proper cancellation and timeout handling.

use crate::dialect::Dialect;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// A database connection capable of executing queries.
///
/// All operations are async and take a `Cx` context for cancellation/timeout support.
/// Implementations must be `Send + Sync` for use across async boundaries.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT * FROM users WHERE id = $1", &[Value::Int(1)]).await;
/// conn.begin(&cx).await;
/// conn.execute(&cx, "INSERT INTO logs (msg) VALUES ($1)", &[Value::Text("action".into())]).await;
/// conn.commit(&cx).await;
/// ```
pub trait Connection: Send + Sync {
    /// The SQL dialect statements for this connection must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute an INSERT and return the driver-reported generated keys.
    ///
    /// The returned rows carry the requested `key_columns`. Drivers that
    /// cannot report keys return an empty vector.
    fn execute_returning_keys(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        key_columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Current auto-commit mode of the physical connection.
    fn auto_commit(&self) -> bool;

    /// Switch auto-commit on or off.
    fn set_auto_commit(
        &self,
        cx: &Cx,
        enabled: bool,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Start a transaction on this connection.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move { discard_count(self.execute(cx, "BEGIN", &[]).await) }
    }

    /// Commit the current transaction.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move { discard_count(self.execute(cx, "COMMIT", &[]).await) }
    }

    /// Roll back the current transaction.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move { discard_count(self.execute(cx, "ROLLBACK", &[]).await) }
    }
}

fn discard_count(outcome: Outcome<u64, crate::Error>) -> Outcome<(), crate::Error> {
    match outcome {
        Outcome::Ok(_) => Outcome::Ok(()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// A source of connections independent of any session.
///
/// Used for isolated work that must run outside the ambient transaction.
/// Every acquired connection is handed back through [`release`](Self::release).
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    fn acquire(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Self::Connection, crate::Error>> + Send;

    fn release(&self, connection: Self::Connection);
}
