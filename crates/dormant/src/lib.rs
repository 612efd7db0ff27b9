//! dormant - a unit-of-work persistence context for Rust.
//!
//! dormant keeps track of the entities an application loads and changes,
//! then writes the differences back in one ordered flush:
//!
//! - Identity map and snapshot dirty-checking of mapped entities
//! - Lazy persistent collections (sets, lists, maps, arrays) with queued
//!   operations for inverse and extra-lazy roles
//! - Pre/post lifecycle events with vetoes and duplicate-listener strategies
//! - Optimistic versioning and pessimistic lock clauses
//! - Isolated work on connections from a [`ConnectionPool`]
//!
//! # Quick Start
//!
//! ```ignore
//! use dormant::prelude::*;
//!
//! async fn rename(cx: &Cx, factory: &SessionFactory, conn: MyConnection) -> Outcome<(), Error> {
//!     let mut session = match factory.open_session(conn) {
//!         Ok(session) => session,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     let Some(mut order) = try_outcome!(session.find::<Order>(cx, Value::BigInt(1)).await) else {
//!         return Outcome::Ok(());
//!     };
//!     order.number = "A-2".into();
//!     try_result!(session.update(&order));
//!     session.commit(cx).await
//! }
//! ```
//!
//! # Crates
//!
//! - `dormant-core`: values, rows, mapping metadata, the `Connection` trait and errors
//! - `dormant-event`: the event listener registry
//! - `dormant-collection`: persistent collection wrappers
//! - `dormant-session`: session factory, session, flush and transactions
//! - `dormant-pool`: connection pooling

pub use dormant_core::{
    // asupersync re-exports
    Budget,
    // Core types
    Connection,
    ConnectionProvider,
    Cx,
    Dialect,
    EntityMetadata,
    Error,
    GenerationTiming,
    IdGenerator,
    IdentifierPart,
    LockMode,
    LockOptions,
    LockWait,
    Model,
    ModelPart,
    MutationKind,
    Outcome,
    PersistentType,
    RegionId,
    Result,
    Row,
    SqlExceptionHelper,
    SqlType,
    TaskId,
    Value,
    ValueKey,
    try_outcome,
    try_result,
    types,
};

pub use dormant_event::{
    CollectionAction, CollectionEvent, CollectionEventListener, DuplicationAction, DuplicationStrategy,
    EventListenerGroup, EventListenerRegistry, EventType, FLUSH, FlushEvent, FlushEventListener,
    INIT_COLLECTION, InitializeCollectionEvent, InitializeCollectionEventListener, POST_COLLECTION_RECREATE,
    POST_COLLECTION_REMOVE, POST_COLLECTION_UPDATE, POST_DELETE, POST_INSERT, POST_UPDATE,
    PRE_COLLECTION_RECREATE, PRE_COLLECTION_REMOVE, PRE_COLLECTION_UPDATE, PRE_DELETE, PRE_INSERT,
    PRE_UPDATE, PostDeleteEvent, PostDeleteEventListener, PostInsertEvent, PostInsertEventListener,
    PostUpdateEvent, PostUpdateEventListener, PreDeleteEvent, PreDeleteEventListener, PreInsertEvent,
    PreInsertEventListener, PreUpdateEvent, PreUpdateEventListener,
};

pub use dormant_collection::{
    AnyCollection, CollectionKind, CollectionLoader, CollectionMetadata, CollectionMetadataBuilder,
    ComponentMapper, DelayedOperation, PersistentArrayHolder, PersistentCollection, PersistentList,
    PersistentMap, PersistentSet, SimpleValueMapper,
};

pub use dormant_session::{
    FlushMode, FlushSummary, IsolationDelegate, Session, SessionConfig, SessionFactory,
    SessionFactoryBuilder, Statistics, StatisticsSnapshot, TransactionObserver, TransactionStatus,
    WorkFuture,
};

pub use dormant_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};

/// Error payloads and kinds.
pub mod error {
    pub use dormant_core::error::*;
}

/// Event listener registry and strategies.
pub mod event {
    pub use dormant_event::*;
}

/// Persistent collections and their snapshots.
pub mod collection {
    pub use dormant_collection::*;
}

/// Session internals: persistence context, flush plan, persisters.
pub mod session {
    pub use dormant_session::*;
}

/// Connection pooling.
pub mod pool {
    pub use dormant_pool::*;
}

/// The items most applications need.
pub mod prelude {
    pub use crate::{
        // asupersync
        Budget,
        // Core traits and types
        Connection,
        ConnectionProvider,
        Cx,
        Dialect,
        EntityMetadata,
        Error,
        IdentifierPart,
        LockMode,
        LockOptions,
        Model,
        ModelPart,
        Outcome,
        Result,
        Row,
        Value,
        // Collections
        CollectionKind,
        CollectionMetadata,
        PersistentCollection,
        SimpleValueMapper,
        // Session
        FlushMode,
        IsolationDelegate,
        Session,
        SessionConfig,
        SessionFactory,
        TransactionStatus,
        // Pool
        ConnectionFactory,
        ConnectionPool,
        PoolConfig,
        // Macros
        try_outcome,
        try_result,
        types,
    };
}
