//! Core types and traits for the dormant persistence engine.
//!
//! This crate provides the foundational abstractions shared by the session,
//! collection and event crates:
//!
//! - `Value` / `Row` for dynamically typed state and result rows
//! - `Error` taxonomy and `SqlExceptionHelper` for normalizing driver errors
//! - `Connection` / `ConnectionProvider` seams to database drivers
//! - `Dialect` capabilities and a small SQL statement tree
//! - `PersistentType` dirtiness predicates and entity mapping metadata
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod dialect;
pub mod error;
pub mod metadata;
pub mod model;
pub mod row;
pub mod sql;
pub mod sql_exception;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionProvider};
pub use dialect::{Dialect, LockMode, LockOptions, LockWait, MutationKind};
pub use error::{Error, Result};
pub use metadata::{
    EntityMetadata, GenerationTiming, IdGenerator, IdentifierPart, ModelPart, PartRef,
};
pub use model::Model;
pub use row::Row;
pub use sql_exception::SqlExceptionHelper;
pub use types::{PersistentType, SqlType};
pub use value::{Value, ValueKey};

/// Unwrap an [`Outcome`], returning early from the enclosing function on
/// anything other than `Ok`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(err) => return $crate::Outcome::Err(err),
            $crate::Outcome::Cancelled(reason) => return $crate::Outcome::Cancelled(reason),
            $crate::Outcome::Panicked(payload) => return $crate::Outcome::Panicked(payload),
        }
    };
}

/// Unwrap a [`Result`] inside a function returning [`Outcome`].
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            ::std::result::Result::Ok(value) => value,
            ::std::result::Result::Err(err) => return $crate::Outcome::Err(err),
        }
    };
}
