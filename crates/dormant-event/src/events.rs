//! Lifecycle events and the listener traits that receive them.
//!
//! Events borrow the state they describe; they are built only when a group
//! actually has listeners (see
//! [`fire_lazy_event_on_each_listener`](crate::EventListenerGroup::fire_lazy_event_on_each_listener)).

use dormant_core::{Result, Value};

use crate::strategy::ListenerIdentity;

/// An entity is about to be inserted.
#[derive(Debug, Clone, Copy)]
pub struct PreInsertEvent<'a> {
    pub entity_name: &'a str,
    /// `Value::Null` when the database will generate the identifier.
    pub id: &'a Value,
    pub state: &'a [Value],
}

/// An entity was inserted; `id` and `state` include generated values.
#[derive(Debug, Clone, Copy)]
pub struct PostInsertEvent<'a> {
    pub entity_name: &'a str,
    pub id: &'a Value,
    pub state: &'a [Value],
}

#[derive(Debug, Clone, Copy)]
pub struct PreUpdateEvent<'a> {
    pub entity_name: &'a str,
    pub id: &'a Value,
    pub state: &'a [Value],
    pub old_state: &'a [Value],
    /// Indexes of the dirty properties.
    pub dirty: &'a [usize],
}

#[derive(Debug, Clone, Copy)]
pub struct PostUpdateEvent<'a> {
    pub entity_name: &'a str,
    pub id: &'a Value,
    pub state: &'a [Value],
    pub old_state: &'a [Value],
    pub dirty: &'a [usize],
}

#[derive(Debug, Clone, Copy)]
pub struct PreDeleteEvent<'a> {
    pub entity_name: &'a str,
    pub id: &'a Value,
    pub deleted_state: &'a [Value],
}

#[derive(Debug, Clone, Copy)]
pub struct PostDeleteEvent<'a> {
    pub entity_name: &'a str,
    pub id: &'a Value,
    pub deleted_state: &'a [Value],
}

/// Which collection action a [`CollectionEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionAction {
    Recreate,
    Update,
    Remove,
}

/// A collection is about to be, or has been, written.
#[derive(Debug, Clone, Copy)]
pub struct CollectionEvent<'a> {
    pub action: CollectionAction,
    pub role: &'a str,
    pub owner_entity: &'a str,
    pub owner_id: &'a Value,
}

/// A lazy collection finished loading.
#[derive(Debug, Clone, Copy)]
pub struct InitializeCollectionEvent<'a> {
    pub role: &'a str,
    pub owner_id: &'a Value,
    pub element_count: usize,
}

/// A flush completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushEvent {
    pub entity_actions: usize,
    pub collection_actions: usize,
}

pub trait PreInsertEventListener: ListenerIdentity + Send + Sync {
    /// Returns `true` to veto the insert.
    fn on_pre_insert(&self, event: &PreInsertEvent<'_>) -> Result<bool>;
}

pub trait PostInsertEventListener: ListenerIdentity + Send + Sync {
    fn on_post_insert(&self, event: &PostInsertEvent<'_>) -> Result<()>;
}

pub trait PreUpdateEventListener: ListenerIdentity + Send + Sync {
    /// Returns `true` to veto the update.
    fn on_pre_update(&self, event: &PreUpdateEvent<'_>) -> Result<bool>;
}

pub trait PostUpdateEventListener: ListenerIdentity + Send + Sync {
    fn on_post_update(&self, event: &PostUpdateEvent<'_>) -> Result<()>;
}

pub trait PreDeleteEventListener: ListenerIdentity + Send + Sync {
    /// Returns `true` to veto the delete.
    fn on_pre_delete(&self, event: &PreDeleteEvent<'_>) -> Result<bool>;
}

pub trait PostDeleteEventListener: ListenerIdentity + Send + Sync {
    fn on_post_delete(&self, event: &PostDeleteEvent<'_>) -> Result<()>;
}

/// Receives collection recreate/update/remove events; registered per event type.
pub trait CollectionEventListener: ListenerIdentity + Send + Sync {
    fn on_collection_event(&self, event: &CollectionEvent<'_>) -> Result<()>;
}

pub trait InitializeCollectionEventListener: ListenerIdentity + Send + Sync {
    fn on_initialize_collection(&self, event: &InitializeCollectionEvent<'_>) -> Result<()>;
}

pub trait FlushEventListener: ListenerIdentity + Send + Sync {
    fn on_flush(&self, event: &FlushEvent) -> Result<()>;
}
