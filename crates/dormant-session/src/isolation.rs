//! Work that runs outside the session's transaction.
//!
//! [`IsolationDelegate`] borrows a fresh connection from a
//! [`ConnectionProvider`], optionally wraps the work in its own transaction,
//! and always hands the connection back. The connection is held by a guard
//! whose `Drop` releases it, so failures, panics and cancellation all return
//! it to the provider.

use std::future::Future;
use std::pin::Pin;

use dormant_core::{Connection, ConnectionProvider, Cx, Error, Outcome};

/// Future returned by isolated work.
pub type WorkFuture<'c, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'c>>;

/// Owns an acquired connection until it is dropped.
/// The connection is only taken out in `Drop`.
struct Lease<'p, P: ConnectionProvider> {
    provider: &'p P,
    connection: Option<P::Connection>,
}

impl<P: ConnectionProvider> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::trace!("Releasing isolated connection");
            self.provider.release(connection);
        }
    }
}

/// Runs units of work on connections of their own.
#[derive(Debug)]
pub struct IsolationDelegate<'p, P> {
    provider: &'p P,
}

impl<'p, P: ConnectionProvider> IsolationDelegate<'p, P> {
    pub fn new(provider: &'p P) -> Self {
        Self { provider }
    }

    /// Run `work` on a newly acquired connection.
    ///
    /// With `transacted`, auto-commit is switched off for the duration of the
    /// work, which is then committed, or rolled back when it fails. A failed
    /// rollback is attached to the work's error as suppressed. Auto-commit is
    /// restored afterwards either way.
    #[tracing::instrument(level = "debug", skip_all, fields(transacted = transacted))]
    pub async fn do_work<T, F>(&self, cx: &Cx, transacted: bool, work: F) -> Outcome<T, Error>
    where
        T: Send,
        F: for<'c> FnOnce(&'c Cx, &'c P::Connection) -> WorkFuture<'c, T>,
    {
        let connection = match self.provider.acquire(cx).await {
            Outcome::Ok(connection) => connection,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let lease = Lease {
            provider: self.provider,
            connection: Some(connection),
        };
        let Some(conn) = lease.connection.as_ref() else {
            return Outcome::Err(Error::Custom("isolated connection was already released".into()));
        };

        if !transacted {
            return work(cx, conn).await;
        }

        let was_auto_commit = conn.auto_commit();
        if was_auto_commit {
            match conn.set_auto_commit(cx, false).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let outcome = match work(cx, conn).await {
            Outcome::Ok(value) => match conn.commit(cx).await {
                Outcome::Ok(()) => Outcome::Ok(value),
                Outcome::Err(e) => Outcome::Err(rollback_after(cx, conn, e).await),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            Outcome::Err(e) => Outcome::Err(rollback_after(cx, conn, e).await),
            Outcome::Cancelled(r) => {
                if let Outcome::Err(e) = conn.rollback(cx).await {
                    tracing::warn!(error = %e, "Rollback after cancelled isolated work failed");
                }
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => Outcome::Panicked(p),
        };

        if was_auto_commit {
            if let Outcome::Err(e) = conn.set_auto_commit(cx, true).await {
                tracing::warn!(error = %e, "Could not restore auto-commit on isolated connection");
            }
        }
        outcome
    }
}

async fn rollback_after<C: Connection>(cx: &Cx, conn: &C, primary: Error) -> Error {
    tracing::debug!(error = %primary, "Isolated work failed; rolling back");
    match conn.rollback(cx).await {
        Outcome::Err(rollback) => {
            tracing::warn!(error = %rollback, "Rollback of isolated work failed");
            primary.with_suppressed(rollback)
        }
        _ => primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, MockProvider, expect_err, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use dormant_core::{Dialect, Value};

    #[test]
    fn transacted_work_commits_and_restores_auto_commit() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let provider = MockProvider::new(MockConnection::new(Dialect::Postgres));
        let delegate = IsolationDelegate::new(&provider);

        let count = rt.block_on(async {
            unwrap_outcome(
                delegate
                    .do_work(&cx, true, |cx, conn| {
                        Box::pin(async move {
                            conn.execute(cx, "UPDATE hilo SET next = next + 1", &[Value::BigInt(1)])
                                .await
                        })
                    })
                    .await,
            )
        });
        assert_eq!(count, 1);
        assert_eq!(
            provider.connection.statements(),
            vec!["UPDATE hilo SET next = next + 1", "COMMIT"]
        );
        assert!(provider.connection.auto_commit());
        assert_eq!(provider.released(), 1);
    }

    #[test]
    fn failed_work_rolls_back_and_releases() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let provider = MockProvider::new(MockConnection::new(Dialect::Postgres));
        let delegate = IsolationDelegate::new(&provider);

        rt.block_on(async {
            let err = expect_err(
                delegate
                    .do_work(&cx, true, |_cx, _conn| {
                        Box::pin(async move { Outcome::<(), Error>::Err(Error::Custom("boom".into())) })
                    })
                    .await,
            );
            assert!(err.suppressed().is_empty());
            assert!(matches!(err, Error::Custom(ref m) if m == "boom"));
        });
        assert_eq!(provider.connection.statements(), vec!["ROLLBACK"]);
        assert_eq!(provider.released(), 1);
    }

    #[test]
    fn rollback_failures_are_suppressed() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let connection = MockConnection::new(Dialect::Postgres);
        connection.fail_matching("ROLLBACK");
        let provider = MockProvider::new(connection);
        let delegate = IsolationDelegate::new(&provider);

        rt.block_on(async {
            let err = expect_err(
                delegate
                    .do_work(&cx, true, |_cx, _conn| {
                        Box::pin(async move { Outcome::<(), Error>::Err(Error::Custom("boom".into())) })
                    })
                    .await,
            );
            assert!(matches!(err.primary(), Error::Custom(m) if m == "boom"));
            assert_eq!(err.suppressed().len(), 1);
        });
        assert_eq!(provider.released(), 1);
    }

    #[test]
    fn untransacted_work_leaves_auto_commit_alone() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let provider = MockProvider::new(MockConnection::new(Dialect::Postgres));
        let delegate = IsolationDelegate::new(&provider);

        rt.block_on(async {
            let rows = unwrap_outcome(
                delegate
                    .do_work(&cx, false, |cx, conn| {
                        Box::pin(async move { conn.query(cx, "SELECT 1", &[]).await })
                    })
                    .await,
            );
            assert!(rows.is_empty());
        });
        assert_eq!(provider.connection.statements(), vec!["SELECT 1"]);
        assert_eq!(provider.released(), 1);
    }
}
