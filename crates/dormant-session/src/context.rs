//! The persistence context: one managed entry per entity identity.
//!
//! Every entity a session knows about is tracked under an [`EntityKey`]
//! (entity name plus identifier), so reading the same row twice yields the
//! same entry. Each entry keeps the state the application last handed to the
//! session next to the state that was loaded from (or last flushed to) the
//! database; comparing the two is how updates are discovered.
//!
//! Collections owned by managed entities live beside them under a
//! [`CollectionKey`] (role plus owner identifier).
//!
//! # Example
//!
//! ```ignore
//! let key = EntityKey::new("Order", Value::BigInt(1));
//! context.add_entity(key.clone(), EntityEntry::loaded(metadata, id, state));
//! assert!(context.entity(&key).is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dormant_collection::{AnyCollection, PersistentCollection};
use dormant_core::{EntityMetadata, Value, ValueKey};

/// Widen integer identifiers so `Int(1)` and `BigInt(1)` name the same row.
fn normalize_identifier(id: Value) -> Value {
    match id {
        Value::SmallInt(v) => Value::BigInt(i64::from(v)),
        Value::Int(v) => Value::BigInt(i64::from(v)),
        other => other,
    }
}

/// Identity of a managed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity: String,
    id: ValueKey,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: Value) -> Self {
        Self {
            entity: entity.into(),
            id: ValueKey(normalize_identifier(id)),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn identifier(&self) -> &Value {
        self.id.value()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id.value())
    }
}

/// Identity of a collection instance: its role and the owner's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    role: String,
    owner_id: ValueKey,
}

impl CollectionKey {
    pub fn new(role: impl Into<String>, owner_id: Value) -> Self {
        Self {
            role: role.into(),
            owner_id: ValueKey(normalize_identifier(owner_id)),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn owner_id(&self) -> &Value {
        self.owner_id.value()
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.owner_id.value())
    }
}

/// Lifecycle status of a managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Tracked and dirty-checked at flush.
    Managed,
    /// Tracked but never dirty-checked.
    ReadOnly,
    /// Scheduled for deletion at the next flush.
    Deleted,
    /// Deleted from the database; kept until the session clears.
    Gone,
}

/// What the persistence context knows about one entity.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    pub metadata: Arc<EntityMetadata>,
    pub id: Value,
    /// State most recently handed to the session by the application.
    pub state: Vec<Value>,
    /// State as the database holds it, taken at load and refreshed after flush.
    /// `None` until the row has been inserted.
    pub loaded_state: Option<Vec<Value>>,
    pub status: EntityStatus,
    pub exists_in_database: bool,
}

impl EntityEntry {
    /// Entry for a row read from the database.
    pub fn loaded(metadata: Arc<EntityMetadata>, id: Value, state: Vec<Value>) -> Self {
        let loaded_state = Some(deep_copy_state(&metadata, &state));
        let status = if metadata.mutable {
            EntityStatus::Managed
        } else {
            EntityStatus::ReadOnly
        };
        Self {
            metadata,
            id,
            state,
            loaded_state,
            status,
            exists_in_database: true,
        }
    }

    /// Entry for an entity that still has to be inserted.
    pub fn pending_insert(metadata: Arc<EntityMetadata>, id: Value, state: Vec<Value>) -> Self {
        Self {
            metadata,
            id,
            state,
            loaded_state: None,
            status: EntityStatus::Managed,
            exists_in_database: false,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.metadata.name.clone(), self.id.clone())
    }

    /// Current value of the version property, if the entity is versioned.
    pub fn version(&self) -> Option<&Value> {
        self.metadata
            .version_index()
            .and_then(|i| self.loaded_state.as_ref()?.get(i))
    }

    /// Whether the entity is waiting for its insert.
    pub fn is_pending_insert(&self) -> bool {
        !self.exists_in_database && self.status == EntityStatus::Managed
    }

    /// Record that the database now holds `state`.
    pub fn mark_synchronized(&mut self) {
        self.loaded_state = Some(deep_copy_state(&self.metadata, &self.state));
        self.exists_in_database = true;
    }
}

pub(crate) fn deep_copy_state(metadata: &EntityMetadata, state: &[Value]) -> Vec<Value> {
    state
        .iter()
        .zip(&metadata.properties)
        .map(|(value, part)| part.ty.deep_copy(value))
        .collect()
}

/// A collection owned by a managed entity.
#[derive(Debug)]
pub struct CollectionEntry {
    pub owner: EntityKey,
    pub collection: AnyCollection,
}

/// Entities and collections managed by one session.
#[derive(Debug, Default)]
pub struct PersistenceContext {
    entities: HashMap<EntityKey, EntityEntry>,
    entity_order: Vec<EntityKey>,
    collections: HashMap<CollectionKey, CollectionEntry>,
    collection_order: Vec<CollectionKey>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entities.get(key)
    }

    pub fn entity_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry> {
        self.entities.get_mut(key)
    }

    /// Track an entity; an existing entry for the same key is replaced.
    pub fn add_entity(&mut self, key: EntityKey, entry: EntityEntry) {
        tracing::trace!(entity = %key, status = ?entry.status, "Adding entity to persistence context");
        if self.entities.insert(key.clone(), entry).is_none() {
            self.entity_order.push(key);
        }
    }

    /// Stop tracking an entity and every collection it owns.
    ///
    /// Removed collections are detached from the session.
    pub fn remove_entity(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        let entry = self.entities.remove(key)?;
        self.entity_order.retain(|k| k != key);
        let owned: Vec<CollectionKey> = self
            .collection_order
            .iter()
            .filter(|ck| self.collections.get(*ck).is_some_and(|c| &c.owner == key))
            .cloned()
            .collect();
        for ck in owned {
            if let Some(mut removed) = self.remove_collection(&ck) {
                removed.collection.state_mut().unset_session();
            }
        }
        Some(entry)
    }

    /// Keys in the order entities entered the context.
    pub fn entity_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entity_order.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&EntityKey, &EntityEntry)> {
        self.entity_order
            .iter()
            .filter_map(|k| self.entities.get(k).map(|e| (k, e)))
    }

    pub fn add_collection(&mut self, key: CollectionKey, owner: EntityKey, collection: AnyCollection) {
        tracing::trace!(collection = %key, "Adding collection to persistence context");
        if self
            .collections
            .insert(key.clone(), CollectionEntry { owner, collection })
            .is_none()
        {
            self.collection_order.push(key);
        }
    }

    pub fn collection(&self, key: &CollectionKey) -> Option<&CollectionEntry> {
        self.collections.get(key)
    }

    pub fn collection_mut(&mut self, key: &CollectionKey) -> Option<&mut CollectionEntry> {
        self.collections.get_mut(key)
    }

    pub fn remove_collection(&mut self, key: &CollectionKey) -> Option<CollectionEntry> {
        let entry = self.collections.remove(key)?;
        self.collection_order.retain(|k| k != key);
        Some(entry)
    }

    /// Collection keys in the order collections entered the context.
    pub fn collection_keys(&self) -> Vec<CollectionKey> {
        self.collection_order.clone()
    }

    /// Collections owned by `owner`.
    pub fn collections_of(&self, owner: &EntityKey) -> Vec<CollectionKey> {
        self.collection_order
            .iter()
            .filter(|k| self.collections.get(*k).is_some_and(|c| &c.owner == owner))
            .cloned()
            .collect()
    }

    /// Forget everything, detaching all collections.
    pub fn clear(&mut self) {
        for entry in self.collections.values_mut() {
            entry.collection.state_mut().unset_session();
        }
        self.collections.clear();
        self.collection_order.clear();
        self.entities.clear();
        self.entity_order.clear();
    }
}
