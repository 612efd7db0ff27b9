//! Lifecycle event dispatch for the dormant persistence engine.
//!
//! Cross-cutting behavior (auditing, validation, cache invalidation) hooks
//! into entity and collection lifecycles by registering listeners in an
//! [`EventListenerRegistry`]. Each [`EventType`] selects one ordered
//! [`EventListenerGroup`]; duplicate registrations are resolved by
//! [`DuplicationStrategy`] values.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = EventListenerRegistry::new();
//! registry.append_listener(POST_INSERT, Arc::new(AuditTrail::default()) as Arc<dyn PostInsertEventListener>)?;
//!
//! registry
//!     .event_listener_group(POST_INSERT)
//!     .fire_lazy_event_on_each_listener(
//!         || PostInsertEvent { entity_name: "Order", id: &id, state: &state },
//!         |listener, event| listener.on_post_insert(event),
//!     )?;
//! ```

pub mod events;
pub mod group;
pub mod registry;
pub mod strategy;

pub use events::{
    CollectionAction, CollectionEvent, CollectionEventListener, FlushEvent, FlushEventListener,
    InitializeCollectionEvent, InitializeCollectionEventListener, PostDeleteEvent,
    PostDeleteEventListener, PostInsertEvent, PostInsertEventListener, PostUpdateEvent,
    PostUpdateEventListener, PreDeleteEvent, PreDeleteEventListener, PreInsertEvent,
    PreInsertEventListener, PreUpdateEvent, PreUpdateEventListener,
};
pub use group::EventListenerGroup;
pub use registry::{
    EVENT_TYPE_NAMES, EventListenerRegistry, EventType, FLUSH, INIT_COLLECTION,
    POST_COLLECTION_RECREATE, POST_COLLECTION_REMOVE, POST_COLLECTION_UPDATE, POST_DELETE,
    POST_INSERT, POST_UPDATE, PRE_COLLECTION_RECREATE, PRE_COLLECTION_REMOVE,
    PRE_COLLECTION_UPDATE, PRE_DELETE, PRE_INSERT, PRE_UPDATE,
};
pub use strategy::{
    DuplicationAction, DuplicationStrategy, ListenerIdentity, ListenerInfo, SameInstanceStrategy,
    SameTypeStrategy,
};
