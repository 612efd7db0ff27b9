//! SQL for entities and collections.
//!
//! Persisters are built once per mapping when the session factory is
//! created. They render statements through the dialect-aware statement tree,
//! execute them on a [`Connection`](dormant_core::Connection) and translate
//! driver failures with [`SqlExceptionHelper`].

pub mod collection;
pub mod entity;

pub use collection::CollectionPersister;
pub use entity::EntityPersister;

use dormant_core::{Error, Outcome, SqlExceptionHelper};

/// Normalize the error of a driver outcome.
pub(crate) fn convert<T>(
    helper: SqlExceptionHelper,
    outcome: Outcome<T, Error>,
    context: &str,
    sql: &str,
) -> Outcome<T, Error> {
    match outcome {
        Outcome::Err(e) => Outcome::Err(helper.convert(e, context, sql)),
        other => other,
    }
}
