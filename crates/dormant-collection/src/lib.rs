//! Lazy persistent collections for the dormant persistence engine.
//!
//! A persistent collection wraps the live content of an entity's collection
//! property and tracks what the database holds for it:
//!
//! - content is loaded on first access through the owning session's
//!   [`CollectionLoader`], reached via a [`SessionLink`] that closing the
//!   session invalidates
//! - a [`Snapshot`] taken at load time (and refreshed at every flush) is
//!   compared with the current content to compute a [`CollectionDiff`]
//! - inverse and extra-lazy roles record mutations as [`DelayedOperation`]s
//!   while unloaded and replay them in order once loaded
//!
//! The four shapes are [`PersistentSet`], [`PersistentList`],
//! [`PersistentArrayHolder`] and [`PersistentMap`]; [`AnyCollection`] holds
//! any of them. The flush talks to all of them through
//! [`PersistentCollection`].

pub mod any;
pub mod array;
pub mod list;
pub mod loader;
pub mod map;
pub mod metadata;
pub mod middle;
pub mod operation;
pub mod persistent;
pub mod set;
pub mod snapshot;
pub mod state;

#[cfg(test)]
mod testing;

pub use any::AnyCollection;
pub use array::PersistentArrayHolder;
pub use list::PersistentList;
pub use loader::{BoxFuture, CollectionLoader, SessionLink};
pub use map::PersistentMap;
pub use metadata::{CollectionKind, CollectionMetadata, CollectionMetadataBuilder};
pub use middle::{ComponentMapper, MiddleComponentData, MiddleComponentMapper, SimpleValueMapper};
pub use operation::DelayedOperation;
pub use persistent::PersistentCollection;
pub use set::PersistentSet;
pub use snapshot::{CollectionDiff, CollectionRow, RowKey, Snapshot};
pub use state::CollectionState;
