//! Flush planning and execution.
//!
//! A flush writes everything the persistence context knows and the database
//! does not, in an order that keeps foreign keys satisfied:
//!
//! 1. entity inserts, referenced entities before the entities referencing them
//! 2. entity updates
//! 3. collection removals
//! 4. collection row updates (deletes, updates, then inserts of rows)
//! 5. collection recreations
//! 6. entity deletes, referencing entities before the entities they reference
//!
//! Each action is surrounded by its pre and post events; a pre-event veto
//! skips the action.

use std::collections::{HashMap, HashSet};

use dormant_collection::PersistentCollection;
use dormant_core::{Connection, Cx, EntityMetadata, Error, Outcome, Result, Value, try_outcome, try_result};
use dormant_event::{
    CollectionAction, CollectionEvent, FLUSH, FlushEvent, POST_COLLECTION_RECREATE, POST_COLLECTION_REMOVE,
    POST_COLLECTION_UPDATE, POST_DELETE, POST_INSERT, POST_UPDATE, PRE_COLLECTION_RECREATE,
    PRE_COLLECTION_REMOVE, PRE_COLLECTION_UPDATE, PRE_DELETE, PRE_INSERT, PRE_UPDATE, PostDeleteEvent,
    PostInsertEvent, PostUpdateEvent, PreDeleteEvent, PreInsertEvent, PreUpdateEvent,
};

use crate::change_tracker::{dirty_properties, next_version};
use crate::context::{CollectionKey, EntityKey, EntityStatus, PersistenceContext};
use crate::factory::SessionFactory;

/// Entity inserts and deletes requested since the last flush, in request order.
#[derive(Debug, Default)]
pub struct ActionQueue {
    insertions: Vec<EntityKey>,
    deletions: Vec<EntityKey>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_insertion(&mut self, key: EntityKey) {
        self.insertions.push(key);
    }

    pub fn add_deletion(&mut self, key: EntityKey) {
        if !self.deletions.contains(&key) {
            self.deletions.push(key);
        }
    }

    /// Drop a pending insert, returning whether there was one.
    pub fn cancel_insertion(&mut self, key: &EntityKey) -> bool {
        let before = self.insertions.len();
        self.insertions.retain(|k| k != key);
        before != self.insertions.len()
    }

    pub fn cancel_deletion(&mut self, key: &EntityKey) {
        self.deletions.retain(|k| k != key);
    }

    pub fn insertions(&self) -> &[EntityKey] {
        &self.insertions
    }

    pub fn deletions(&self) -> &[EntityKey] {
        &self.deletions
    }

    pub fn has_pending(&self) -> bool {
        !self.insertions.is_empty() || !self.deletions.is_empty()
    }

    pub fn clear(&mut self) {
        self.insertions.clear();
        self.deletions.clear();
    }
}

/// Orders entity actions by mapped references between entities.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Entity name -> entities it references.
    dependencies: HashMap<String, Vec<String>>,
}

impl FlushOrderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the references of one entity. Self-references are ignored.
    pub fn register_entity(&mut self, metadata: &EntityMetadata) {
        let depends_on = metadata
            .dependencies()
            .into_iter()
            .filter(|target| *target != metadata.name)
            .map(str::to_string)
            .collect();
        self.dependencies.insert(metadata.name.clone(), depends_on);
    }

    /// Entity names ordered parents first. Names are taken in first-seen
    /// order wherever references leave a choice; members of a reference cycle
    /// keep that order too.
    fn rank(&self, names: &[&str]) -> Vec<String> {
        let present: HashSet<&str> = names.iter().copied().collect();
        let mut remaining: Vec<&str> = names.to_vec();
        let mut ordered: Vec<String> = Vec::with_capacity(names.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|name| {
                self.dependencies.get(*name).is_none_or(|deps| {
                    deps.iter()
                        .all(|d| !present.contains(d.as_str()) || ordered.iter().any(|o| o == d))
                })
            });
            match ready {
                Some(index) => ordered.push(remaining.remove(index).to_string()),
                None => {
                    tracing::warn!(entities = ?remaining, "Reference cycle between entities; keeping request order");
                    ordered.extend(remaining.drain(..).map(str::to_string));
                }
            }
        }
        ordered
    }

    fn group(&self, keys: &[EntityKey], parents_first: bool) -> Vec<EntityKey> {
        let mut names: Vec<&str> = Vec::new();
        for key in keys {
            if !names.contains(&key.entity_name()) {
                names.push(key.entity_name());
            }
        }
        let mut ranked = self.rank(&names);
        if !parents_first {
            ranked.reverse();
        }
        ranked
            .iter()
            .flat_map(|name| keys.iter().filter(move |k| k.entity_name() == name).cloned())
            .collect()
    }

    /// Inserts: referenced entities first.
    pub fn order_inserts(&self, keys: &[EntityKey]) -> Vec<EntityKey> {
        self.group(keys, true)
    }

    /// Deletes: referencing entities first.
    pub fn order_deletes(&self, keys: &[EntityKey]) -> Vec<EntityKey> {
        self.group(keys, false)
    }
}

/// Actions of one flush, in execution order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlushPlan {
    pub inserts: Vec<EntityKey>,
    /// Entities with the indexes of their dirty properties.
    pub updates: Vec<(EntityKey, Vec<usize>)>,
    pub collection_removes: Vec<CollectionKey>,
    pub collection_updates: Vec<CollectionKey>,
    pub collection_recreates: Vec<CollectionKey>,
    pub deletes: Vec<EntityKey>,
}

impl FlushPlan {
    /// Dirty-check the context and order the resulting actions.
    #[allow(clippy::result_large_err)]
    pub fn build(
        context: &PersistenceContext,
        queue: &ActionQueue,
        orderer: &FlushOrderer,
        order_inserts: bool,
    ) -> Result<Self> {
        let pending: Vec<EntityKey> = queue
            .insertions()
            .iter()
            .filter(|k| context.entity(k).is_some_and(|e| e.is_pending_insert()))
            .cloned()
            .collect();
        let inserts = if order_inserts {
            orderer.order_inserts(&pending)
        } else {
            pending
        };

        let updates = context
            .entries()
            .filter_map(|(key, entry)| {
                let dirty = dirty_properties(entry);
                (!dirty.is_empty()).then(|| (key.clone(), dirty))
            })
            .collect();

        let mut collection_removes = Vec::new();
        let mut collection_updates = Vec::new();
        let mut collection_recreates = Vec::new();
        for key in context.collection_keys() {
            let Some(entry) = context.collection(&key) else {
                continue;
            };
            let Some(owner) = context.entity(&entry.owner) else {
                continue;
            };
            let collection = &entry.collection;
            if owner.status == EntityStatus::Deleted {
                if owner.exists_in_database {
                    collection_removes.push(key);
                }
            } else if collection.needs_recreate() {
                collection_recreates.push(key);
            } else if collection.was_initialized() && collection.has_changes() {
                if !collection.state().metadata().mutable {
                    return Err(Error::UnsupportedOperation(format!(
                        "changed an immutable collection instance: [{key}]"
                    )));
                }
                collection_updates.push(key);
            }
        }

        let deleted: Vec<EntityKey> = queue
            .deletions()
            .iter()
            .filter(|k| context.entity(k).is_some_and(|e| e.status == EntityStatus::Deleted))
            .cloned()
            .collect();
        let deletes = orderer.order_deletes(&deleted);

        Ok(Self {
            inserts,
            updates,
            collection_removes,
            collection_updates,
            collection_recreates,
            deletes,
        })
    }

    pub fn entity_actions(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn collection_actions(&self) -> usize {
        self.collection_removes.len() + self.collection_updates.len() + self.collection_recreates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_actions() == 0 && self.collection_actions() == 0
    }
}

/// What a flush actually wrote; vetoed actions are not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub collections_removed: usize,
    pub collections_updated: usize,
    pub collections_recreated: usize,
}

impl FlushSummary {
    pub fn entity_actions(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn collection_actions(&self) -> usize {
        self.collections_removed + self.collections_updated + self.collections_recreated
    }
}

/// Load uninitialized collections that have queued operations so their
/// changes can be diffed.
pub(crate) async fn initialize_queued_collections(cx: &Cx, context: &mut PersistenceContext) -> Outcome<(), Error> {
    for key in context.collection_keys() {
        let Some(entry) = context.collection_mut(&key) else {
            continue;
        };
        let state = entry.collection.state();
        if state.was_initialized() || !state.has_queued_operations() {
            continue;
        }
        tracing::debug!(collection = %key, "Initializing collection with queued operations before flush");
        try_outcome!(entry.collection.initialize(cx).await);
    }
    Outcome::Ok(())
}

fn version_failure(factory: &SessionFactory, error: Error) -> Error {
    if error.is_stale_state() {
        factory.statistics().optimistic_failure();
    }
    error
}

/// Run `plan` against `conn`, updating `context` as actions succeed.
#[tracing::instrument(level = "info", skip_all)]
pub(crate) async fn execute<C: Connection>(
    cx: &Cx,
    factory: &SessionFactory,
    conn: &C,
    context: &mut PersistenceContext,
    plan: &FlushPlan,
) -> Outcome<FlushSummary, Error> {
    tracing::info!(
        inserts = plan.inserts.len(),
        updates = plan.updates.len(),
        collection_removes = plan.collection_removes.len(),
        collection_updates = plan.collection_updates.len(),
        collection_recreates = plan.collection_recreates.len(),
        deletes = plan.deletes.len(),
        "Executing flush plan"
    );
    let start = std::time::Instant::now();
    let listeners = factory.listeners();
    let statistics = factory.statistics();
    let mut summary = FlushSummary::default();

    // 1. Inserts
    for key in &plan.inserts {
        let Some(entry) = context.entity(key) else {
            continue;
        };
        let persister = try_result!(factory.entity_persister(key.entity_name()));
        let id = entry.id.clone();
        let state = entry.state.clone();
        let veto = try_result!(listeners.event_listener_group(PRE_INSERT).fire_veto_event_on_each_listener(
            || PreInsertEvent {
                entity_name: key.entity_name(),
                id: &id,
                state: &state,
            },
            |l, e| l.on_pre_insert(e),
        ));
        if veto {
            tracing::debug!(entity = %key, "Insert vetoed");
            context.remove_entity(key);
            continue;
        }
        let generated = try_outcome!(persister.insert(cx, conn, &id, &state).await);
        let Some(entry) = context.entity_mut(key) else {
            continue;
        };
        if let Some(values) = generated {
            values.apply(&mut entry.state);
        }
        entry.mark_synchronized();
        statistics.entity_inserted();
        summary.inserted += 1;
        let state = entry.state.clone();
        try_result!(listeners.event_listener_group(POST_INSERT).fire_lazy_event_on_each_listener(
            || PostInsertEvent {
                entity_name: key.entity_name(),
                id: &id,
                state: &state,
            },
            |l, e| l.on_post_insert(e),
        ));
    }

    // 2. Updates
    for (key, dirty) in &plan.updates {
        let Some(entry) = context.entity(key) else {
            continue;
        };
        let persister = try_result!(factory.entity_persister(key.entity_name()));
        let id = entry.id.clone();
        let mut state = entry.state.clone();
        let old_state = entry.loaded_state.clone().unwrap_or_default();
        let previous_version = entry.version().cloned();
        if let Some(v) = entry.metadata.version_index() {
            let current = previous_version.as_ref().unwrap_or(&Value::Null);
            state[v] = try_result!(next_version(current));
        }
        let veto = try_result!(listeners.event_listener_group(PRE_UPDATE).fire_veto_event_on_each_listener(
            || PreUpdateEvent {
                entity_name: key.entity_name(),
                id: &id,
                state: &state,
                old_state: &old_state,
                dirty,
            },
            |l, e| l.on_pre_update(e),
        ));
        if veto {
            tracing::debug!(entity = %key, "Update vetoed");
            continue;
        }
        let generated = match persister
            .update(cx, conn, &id, &state, dirty, previous_version.as_ref())
            .await
        {
            Outcome::Ok(generated) => generated,
            Outcome::Err(e) => return Outcome::Err(version_failure(factory, e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if let Some(values) = generated {
            values.apply(&mut state);
        }
        let Some(entry) = context.entity_mut(key) else {
            continue;
        };
        entry.state = state;
        entry.mark_synchronized();
        statistics.entity_updated();
        summary.updated += 1;
        let state = entry.state.clone();
        try_result!(listeners.event_listener_group(POST_UPDATE).fire_lazy_event_on_each_listener(
            || PostUpdateEvent {
                entity_name: key.entity_name(),
                id: &id,
                state: &state,
                old_state: &old_state,
                dirty,
            },
            |l, e| l.on_post_update(e),
        ));
    }

    // 3. Collection removals
    for key in &plan.collection_removes {
        let persister = try_result!(factory.collection_persister(key.role()));
        let event = || CollectionEvent {
            action: CollectionAction::Remove,
            role: key.role(),
            owner_entity: &persister.metadata().owner_entity,
            owner_id: key.owner_id(),
        };
        try_result!(listeners
            .event_listener_group(PRE_COLLECTION_REMOVE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
        try_outcome!(persister.remove(cx, conn, key.owner_id()).await);
        statistics.collection_removed();
        summary.collections_removed += 1;
        try_result!(listeners
            .event_listener_group(POST_COLLECTION_REMOVE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
    }

    // 4. Collection row updates
    for key in &plan.collection_updates {
        let Some(entry) = context.collection(key) else {
            continue;
        };
        let persister = try_result!(factory.collection_persister(key.role()));
        let diff = entry.collection.diff();
        let event = || CollectionEvent {
            action: CollectionAction::Update,
            role: key.role(),
            owner_entity: &persister.metadata().owner_entity,
            owner_id: key.owner_id(),
        };
        try_result!(listeners
            .event_listener_group(PRE_COLLECTION_UPDATE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
        tracing::debug!(
            collection = %key,
            deletes = diff.deletes.len(),
            updates = diff.updates.len(),
            inserts = diff.inserts.len(),
            "Updating collection rows"
        );
        try_outcome!(persister.delete_rows(cx, conn, key.owner_id(), &diff.deletes).await);
        try_outcome!(persister.update_rows(cx, conn, key.owner_id(), &diff.updates).await);
        try_outcome!(persister.insert_rows(cx, conn, key.owner_id(), &diff.inserts).await);
        statistics.collection_updated();
        summary.collections_updated += 1;
        try_result!(listeners
            .event_listener_group(POST_COLLECTION_UPDATE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
    }

    // 5. Collection recreations
    for key in &plan.collection_recreates {
        let Some(entry) = context.collection(key) else {
            continue;
        };
        let persister = try_result!(factory.collection_persister(key.role()));
        let rows = entry.collection.entries();
        let event = || CollectionEvent {
            action: CollectionAction::Recreate,
            role: key.role(),
            owner_entity: &persister.metadata().owner_entity,
            owner_id: key.owner_id(),
        };
        try_result!(listeners
            .event_listener_group(PRE_COLLECTION_RECREATE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
        try_outcome!(persister.recreate(cx, conn, key.owner_id(), &rows).await);
        statistics.collection_recreated();
        summary.collections_recreated += 1;
        try_result!(listeners
            .event_listener_group(POST_COLLECTION_RECREATE)
            .fire_lazy_event_on_each_listener(event, |l, e| l.on_collection_event(e)));
    }

    // 6. Deletes
    let mut gone = Vec::new();
    for key in &plan.deletes {
        let Some(entry) = context.entity(key) else {
            continue;
        };
        let persister = try_result!(factory.entity_persister(key.entity_name()));
        let id = entry.id.clone();
        let deleted_state = entry.loaded_state.clone().unwrap_or_else(|| entry.state.clone());
        let version = entry.version().cloned();
        let veto = try_result!(listeners.event_listener_group(PRE_DELETE).fire_veto_event_on_each_listener(
            || PreDeleteEvent {
                entity_name: key.entity_name(),
                id: &id,
                deleted_state: &deleted_state,
            },
            |l, e| l.on_pre_delete(e),
        ));
        if veto {
            tracing::debug!(entity = %key, "Delete vetoed");
            if let Some(entry) = context.entity_mut(key) {
                entry.status = EntityStatus::Managed;
            }
            continue;
        }
        match persister.delete(cx, conn, &id, version.as_ref()).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(version_failure(factory, e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        if let Some(entry) = context.entity_mut(key) {
            entry.status = EntityStatus::Gone;
        }
        gone.push(key.clone());
        statistics.entity_deleted();
        summary.deleted += 1;
        try_result!(listeners.event_listener_group(POST_DELETE).fire_lazy_event_on_each_listener(
            || PostDeleteEvent {
                entity_name: key.entity_name(),
                id: &id,
                deleted_state: &deleted_state,
            },
            |l, e| l.on_post_delete(e),
        ));
    }

    // Refresh snapshots of written collections, then forget deleted entities.
    for key in plan.collection_updates.iter().chain(&plan.collection_recreates) {
        if let Some(entry) = context.collection_mut(key) {
            entry.collection.post_flush();
        }
    }
    for key in &gone {
        context.remove_entity(key);
    }

    statistics.flushed();
    let event = FlushEvent {
        entity_actions: summary.entity_actions(),
        collection_actions: summary.collection_actions(),
    };
    try_result!(listeners
        .event_listener_group(FLUSH)
        .fire_event_on_each_listener(&event, |l, e| l.on_flush(e)));
    tracing::info!(
        entity_actions = event.entity_actions,
        collection_actions = event.collection_actions,
        elapsed_ms = start.elapsed().as_millis(),
        "Flush complete"
    );
    Outcome::Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntityEntry;
    use crate::testing::{Line, Order};
    use dormant_core::{IdentifierPart, Model, ModelPart, types};
    use std::sync::Arc;

    fn orderer() -> FlushOrderer {
        let mut orderer = FlushOrderer::new();
        orderer.register_entity(&Order::metadata().unwrap());
        orderer.register_entity(&Line::metadata().unwrap());
        orderer
    }

    fn key(entity: &str, id: i64) -> EntityKey {
        EntityKey::new(entity, Value::BigInt(id))
    }

    #[test]
    fn inserts_parents_first_and_deletes_children_first() {
        let orderer = orderer();
        let keys = vec![key("Line", 1), key("Order", 1), key("Line", 2)];
        assert_eq!(
            orderer.order_inserts(&keys),
            vec![key("Order", 1), key("Line", 1), key("Line", 2)]
        );
        assert_eq!(
            orderer.order_deletes(&[key("Order", 1), key("Line", 1)]),
            vec![key("Line", 1), key("Order", 1)]
        );
    }

    #[test]
    fn cycles_keep_request_order() {
        let mut orderer = FlushOrderer::new();
        for (name, target) in [("A", "B"), ("B", "A")] {
            let metadata = EntityMetadata::builder(name, name, IdentifierPart::assigned("id", "id", types::long()))
                .property(ModelPart::new("other", "other_id", types::long()).references(target))
                .build()
                .unwrap();
            orderer.register_entity(&metadata);
        }
        let keys = vec![key("B", 1), key("A", 1)];
        assert_eq!(orderer.order_inserts(&keys), keys);
    }

    #[test]
    fn plan_classifies_entities() {
        let order_meta = Arc::new(Order::metadata().unwrap());
        let mut context = PersistenceContext::new();
        let mut queue = ActionQueue::new();

        let state = vec![Value::Text("A-1".into()), Value::Decimal("1".into()), Value::BigInt(0)];
        context.add_entity(key("Order", 1), EntityEntry::loaded(Arc::clone(&order_meta), Value::BigInt(1), state.clone()));
        context.entity_mut(&key("Order", 1)).unwrap().state[1] = Value::Decimal("2".into());

        context.add_entity(key("Order", 2), EntityEntry::pending_insert(Arc::clone(&order_meta), Value::BigInt(2), state.clone()));
        queue.add_insertion(key("Order", 2));

        let mut doomed = EntityEntry::loaded(Arc::clone(&order_meta), Value::BigInt(3), state);
        doomed.status = EntityStatus::Deleted;
        context.add_entity(key("Order", 3), doomed);
        queue.add_deletion(key("Order", 3));

        let plan = FlushPlan::build(&context, &queue, &orderer(), true).unwrap();
        assert_eq!(plan.inserts, vec![key("Order", 2)]);
        assert_eq!(plan.updates, vec![(key("Order", 1), vec![1])]);
        assert_eq!(plan.deletes, vec![key("Order", 3)]);
        assert_eq!(plan.entity_actions(), 3);
        assert!(plan.collection_removes.is_empty());
    }

    #[test]
    fn queue_cancels_pending_inserts() {
        let mut queue = ActionQueue::new();
        queue.add_insertion(key("Order", 1));
        assert!(queue.has_pending());
        assert!(queue.cancel_insertion(&key("Order", 1)));
        assert!(!queue.cancel_insertion(&key("Order", 1)));
        queue.add_deletion(key("Order", 2));
        queue.add_deletion(key("Order", 2));
        assert_eq!(queue.deletions().len(), 1);
        queue.clear();
        assert!(!queue.has_pending());
    }
}
