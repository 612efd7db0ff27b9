//! Unit of work for the dormant persistence engine.
//!
//! `dormant-session` turns mapping metadata into a working session:
//!
//! - **Session factory**: validated, immutable bootstrap state (persisters,
//!   listeners, configuration, statistics) shared by every session.
//! - **Persistence context**: one managed entry per entity identity, with the
//!   state loaded from the database kept beside the application's state.
//! - **Flush**: dirty-checks entities and collections, orders the resulting
//!   actions so foreign keys hold, and fires lifecycle events around each.
//! - **Transactions**: a coordinator with a rollback-only state, plus an
//!   isolation delegate for work that needs a connection of its own.
//!
//! All I/O is `async`, takes a `&Cx` and returns `Outcome<T, Error>`.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::builder()
//!     .dialect(Dialect::Postgres)
//!     .entity::<Order>()
//!     .collection(tags)
//!     .build()?;
//!
//! let mut session = factory.open_session(connection)?;
//! let mut order = Order::new(1, "A-1");
//! session.persist(&cx, &mut order).await?;
//! session.commit(&cx).await?;
//! ```

pub mod change_tracker;
pub mod config;
pub mod context;
pub mod factory;
pub mod flush;
pub mod generated;
pub mod isolation;
mod loader;
pub mod persister;
pub mod session;
pub mod statistics;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use change_tracker::{dirty_properties, find_dirty, next_version};
pub use config::{FlushMode, SessionConfig};
pub use context::{CollectionEntry, CollectionKey, EntityEntry, EntityKey, EntityStatus, PersistenceContext};
pub use factory::{SessionFactory, SessionFactoryBuilder};
pub use flush::{ActionQueue, FlushOrderer, FlushPlan, FlushSummary};
pub use generated::{GeneratedValues, GeneratedValuesDelegate, GeneratedValuesMappingProducer, ResultBuilder};
pub use isolation::{IsolationDelegate, WorkFuture};
pub use persister::{CollectionPersister, EntityPersister};
pub use session::Session;
pub use statistics::{Statistics, StatisticsSnapshot};
pub use transaction::{TransactionCoordinator, TransactionObserver, TransactionStatus};
