//! Physical transaction control for a session.
//!
//! [`TransactionCoordinator`] drives `begin`, `commit` and `rollback` on the
//! session's connection and tracks where the transaction stands:
//!
//! ```text
//! NotActive --begin--> Active --commit--> Committed
//!                        |  \--rollback--> RolledBack
//!                        |   \--commit fails--> FailedCommit
//!                        \--mark_rollback_only--> MarkedRollback --commit/rollback--> RolledBack
//! ```
//!
//! Registered [`TransactionObserver`]s hear about each transition.

use std::sync::Arc;

use dormant_core::error::TransactionErrorKind;
use dormant_core::{Connection, Cx, Error, Outcome};

use crate::statistics::Statistics;

/// Where the current transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    NotActive,
    Active,
    /// Still open, but the only way out is a rollback.
    MarkedRollback,
    Committed,
    RolledBack,
    FailedCommit,
}

impl TransactionStatus {
    /// Whether a transaction is open on the connection.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::MarkedRollback)
    }
}

/// Callbacks around transaction completion.
pub trait TransactionObserver: Send + Sync {
    fn after_begin(&self) {}

    /// Runs before the commit is attempted; not called for rollbacks.
    fn before_completion(&self) {}

    fn after_completion(&self, successful: bool) {
        let _ = successful;
    }
}

/// Begins, commits and rolls back the transaction of one session.
pub struct TransactionCoordinator {
    status: TransactionStatus,
    observers: Vec<Arc<dyn TransactionObserver>>,
    statistics: Arc<Statistics>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("status", &self.status)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    pub fn new(statistics: Arc<Statistics>) -> Self {
        Self {
            status: TransactionStatus::NotActive,
            observers: Vec::new(),
            statistics,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TransactionObserver>) {
        self.observers.push(observer);
    }

    /// Doom the open transaction. Has no effect when none is open.
    pub fn mark_rollback_only(&mut self) {
        if self.status == TransactionStatus::Active {
            tracing::debug!("Marking transaction for rollback only");
            self.status = TransactionStatus::MarkedRollback;
        }
    }

    fn complete(&mut self, status: TransactionStatus) {
        self.status = status;
        let successful = status == TransactionStatus::Committed;
        for observer in &self.observers {
            observer.after_completion(successful);
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn begin<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        if self.status.is_active() {
            return Outcome::Err(Error::transaction(
                TransactionErrorKind::AlreadyActive,
                "a transaction is already active",
            ));
        }
        match conn.begin(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.status = TransactionStatus::Active;
        self.statistics.transaction_begun();
        for observer in &self.observers {
            observer.after_begin();
        }
        tracing::debug!("Transaction begun");
        Outcome::Ok(())
    }

    /// Commit the open transaction.
    ///
    /// A transaction marked rollback-only is rolled back instead and the call
    /// fails with a `RolledBack` transaction error. If the commit itself
    /// fails, a rollback is attempted; a failed rollback is attached to the
    /// `FailedCommit` error as suppressed.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn commit<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::MarkedRollback => {
                let rolled_back = Error::transaction(
                    TransactionErrorKind::RolledBack,
                    "transaction was marked for rollback only; it has been rolled back",
                );
                return match conn.rollback(cx).await {
                    Outcome::Ok(()) => {
                        tracing::info!("Rolled back transaction marked for rollback only");
                        self.complete(TransactionStatus::RolledBack);
                        Outcome::Err(rolled_back)
                    }
                    Outcome::Err(e) => {
                        tracing::warn!(error = %e, "Rollback of doomed transaction failed");
                        self.complete(TransactionStatus::FailedCommit);
                        Outcome::Err(rolled_back.with_suppressed(e))
                    }
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
            }
            _ => {
                return Outcome::Err(Error::transaction(
                    TransactionErrorKind::NotActive,
                    "no transaction is active",
                ));
            }
        }

        for observer in &self.observers {
            observer.before_completion();
        }
        match conn.commit(cx).await {
            Outcome::Ok(()) => {
                self.statistics.transaction_committed();
                self.complete(TransactionStatus::Committed);
                tracing::info!("Transaction committed");
                Outcome::Ok(())
            }
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "Commit failed; rolling back");
                let mut error = Error::transaction(
                    TransactionErrorKind::FailedCommit,
                    format!("commit failed: {e}"),
                );
                if let Outcome::Err(rollback) = conn.rollback(cx).await {
                    error = error.with_suppressed(rollback);
                }
                self.complete(TransactionStatus::FailedCommit);
                Outcome::Err(error)
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn rollback<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        if !self.status.is_active() {
            return Outcome::Err(Error::transaction(
                TransactionErrorKind::NotActive,
                "no transaction is active",
            ));
        }
        match conn.rollback(cx).await {
            Outcome::Ok(()) => {
                self.complete(TransactionStatus::RolledBack);
                tracing::info!("Transaction rolled back");
                Outcome::Ok(())
            }
            Outcome::Err(e) => {
                self.complete(TransactionStatus::RolledBack);
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}
