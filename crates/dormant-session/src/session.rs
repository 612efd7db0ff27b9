//! The session: one unit of work over one connection.
//!
//! A [`Session`] tracks every entity it reads or is handed in its
//! [`PersistenceContext`], queues inserts and deletes, and writes all pending
//! changes at [`flush`](Session::flush). Reading an identifier twice yields
//! the same managed state; changes made through [`update`](Session::update)
//! are discovered by comparing against the state loaded from the database.
//!
//! Collections of managed entities are reached with
//! [`collection_mut`](Session::collection_mut). They load lazily through the
//! session's connection the first time their content is needed.
//!
//! # Example
//!
//! ```ignore
//! let mut session = factory.open_session(connection)?;
//! let mut order = session.find::<Order>(&cx, Value::BigInt(1)).await?.unwrap();
//! order.total = "12.00".into();
//! session.update(&order)?;
//! session.commit(&cx).await?;
//! ```

use std::sync::Arc;

use dormant_collection::{AnyCollection, PersistentCollection, SessionLink};
use dormant_core::error::StaleStateError;
use dormant_core::{
    Connection, Cx, EntityMetadata, Error, IdGenerator, LockOptions, Model, Outcome, Result, Value, try_outcome,
    try_result,
};
use dormant_event::{POST_INSERT, PRE_INSERT, PostInsertEvent, PreInsertEvent};

use crate::change_tracker::{dirty_properties, next_version};
use crate::config::FlushMode;
use crate::context::{CollectionKey, EntityEntry, EntityKey, EntityStatus, PersistenceContext};
use crate::factory::SessionFactory;
use crate::flush::{self, ActionQueue, FlushPlan, FlushSummary};
use crate::loader::SessionCollectionLoader;
use crate::statistics::Statistics;
use crate::transaction::{TransactionCoordinator, TransactionObserver, TransactionStatus};

/// A unit of work. Not shared between tasks.
pub struct Session<C: Connection + 'static> {
    factory: SessionFactory,
    connection: Arc<C>,
    link: SessionLink,
    context: PersistenceContext,
    actions: ActionQueue,
    transaction: TransactionCoordinator,
    closed: bool,
}

impl<C: Connection + 'static> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.factory.dialect())
            .field("entities", &self.context.len())
            .field("transaction", &self.transaction.status())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn not_managed(key: &EntityKey) -> Error {
    Error::Custom(format!("instance is not managed by this session: [{key}]"))
}

impl<C: Connection + 'static> Session<C> {
    pub(crate) fn new(factory: SessionFactory, connection: C) -> Self {
        let connection = Arc::new(connection);
        let loader = Arc::new(SessionCollectionLoader::new(Arc::clone(&connection), factory.clone()));
        let link = SessionLink::with_operation_queue(loader, factory.config().operation_queue);
        let transaction = TransactionCoordinator::new(Arc::clone(factory.statistics()));
        tracing::debug!(dialect = factory.dialect().name(), "Opened session");
        Self {
            factory,
            connection,
            link,
            context: PersistenceContext::new(),
            actions: ActionQueue::new(),
            transaction,
            closed: false,
        }
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        self.factory.statistics()
    }

    pub fn persistence_context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction.status()
    }

    pub fn add_transaction_observer(&mut self, observer: Arc<dyn TransactionObserver>) {
        self.transaction.add_observer(observer);
    }

    #[allow(clippy::result_large_err)]
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::unsupported("session is closed"));
        }
        Ok(())
    }

    async fn ensure_transaction(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.factory.config().auto_begin && !self.transaction.is_active() {
            return self.transaction.begin(cx, &*self.connection).await;
        }
        Outcome::Ok(())
    }

    /// Wrap fresh collections for every role of a new entity.
    #[allow(clippy::result_large_err)]
    fn add_new_collections(&mut self, metadata: &EntityMetadata, owner: &EntityKey) -> Result<()> {
        for role in &metadata.collections {
            let persister = self.factory.collection_persister(role)?;
            let mut collection = AnyCollection::empty(Arc::clone(persister.metadata()));
            collection
                .state_mut()
                .set_current_session(self.link.clone(), owner.identifier().clone())?;
            self.context
                .add_collection(CollectionKey::new(role.clone(), owner.identifier().clone()), owner.clone(), collection);
        }
        Ok(())
    }

    /// Track a row read from the database, with lazy collections.
    #[allow(clippy::result_large_err)]
    fn add_loaded(&mut self, metadata: &Arc<EntityMetadata>, key: &EntityKey, state: Vec<Value>) -> Result<()> {
        let id = key.identifier().clone();
        self.context
            .add_entity(key.clone(), EntityEntry::loaded(Arc::clone(metadata), id.clone(), state));
        for role in &metadata.collections {
            let persister = self.factory.collection_persister(role)?;
            let collection = AnyCollection::uninitialized(Arc::clone(persister.metadata()), id.clone(), self.link.clone());
            self.context
                .add_collection(CollectionKey::new(role.clone(), id.clone()), key.clone(), collection);
        }
        self.factory.statistics().entity_loaded();
        Ok(())
    }

    /// Make a new entity managed.
    ///
    /// Entities with an assigned identifier are inserted at the next flush.
    /// Identity-generated identifiers are only known after the insert, so
    /// those entities are inserted immediately and `entity` receives the
    /// generated values.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = M::ENTITY_NAME))]
    pub async fn persist<M: Model>(&mut self, cx: &Cx, entity: &mut M) -> Outcome<(), Error> {
        try_result!(self.check_open());
        let persister = Arc::clone(try_result!(self.factory.entity_persister(M::ENTITY_NAME)));
        let metadata = Arc::clone(persister.metadata());
        let mut state = entity.state();
        if state.len() != metadata.properties.len() {
            return Outcome::Err(Error::config(format!(
                "{} produced {} state values but maps {} properties",
                M::ENTITY_NAME,
                state.len(),
                metadata.properties.len()
            )));
        }
        if let Some(v) = metadata.version_index() {
            if state[v].is_null() {
                state[v] = try_result!(next_version(&Value::Null));
            }
        }

        let key = match metadata.identifier.generator {
            IdGenerator::Assigned => {
                let id = entity.identifier();
                if id.is_null() {
                    return Outcome::Err(Error::Custom(format!(
                        "identifiers of {} must be assigned before calling persist",
                        M::ENTITY_NAME
                    )));
                }
                let key = EntityKey::new(M::ENTITY_NAME, id.clone());
                if let Some(existing) = self.context.entity_mut(&key) {
                    if existing.status != EntityStatus::Deleted {
                        return Outcome::Err(Error::Custom(format!(
                            "a different object with the same identifier value was already associated with the session: [{key}]"
                        )));
                    }
                    tracing::debug!(entity = %key, "Persisting a removed entity; cancelling its delete");
                    existing.status = EntityStatus::Managed;
                    existing.state = state.clone();
                    self.actions.cancel_deletion(&key);
                    *entity = try_result!(M::from_state(id, state));
                    return Outcome::Ok(());
                }
                self.context
                    .add_entity(key.clone(), EntityEntry::pending_insert(Arc::clone(&metadata), id.clone(), state.clone()));
                self.actions.add_insertion(key.clone());
                *entity = try_result!(M::from_state(id, state));
                key
            }
            IdGenerator::Identity => {
                try_outcome!(self.ensure_transaction(cx).await);
                let listeners = self.factory.listeners();
                let veto = try_result!(listeners.event_listener_group(PRE_INSERT).fire_veto_event_on_each_listener(
                    || PreInsertEvent {
                        entity_name: M::ENTITY_NAME,
                        id: &Value::Null,
                        state: &state,
                    },
                    |l, e| l.on_pre_insert(e),
                ));
                if veto {
                    tracing::debug!(entity = M::ENTITY_NAME, "Identity insert vetoed");
                    return Outcome::Ok(());
                }
                let generated = match persister.insert(cx, &*self.connection, &Value::Null, &state).await {
                    Outcome::Ok(generated) => generated,
                    Outcome::Err(e) => {
                        self.transaction.mark_rollback_only();
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                let Some(id) = generated.as_ref().and_then(|values| values.apply(&mut state)) else {
                    return Outcome::Err(Error::GeneratedValues(dormant_core::error::GeneratedValuesError {
                        entity: M::ENTITY_NAME.to_string(),
                        message: "the identity insert did not return an identifier".into(),
                    }));
                };
                let key = EntityKey::new(M::ENTITY_NAME, id.clone());
                let mut entry = EntityEntry::pending_insert(Arc::clone(&metadata), id.clone(), state.clone());
                entry.mark_synchronized();
                self.context.add_entity(key.clone(), entry);
                self.factory.statistics().entity_inserted();
                try_result!(listeners.event_listener_group(POST_INSERT).fire_lazy_event_on_each_listener(
                    || PostInsertEvent {
                        entity_name: M::ENTITY_NAME,
                        id: &id,
                        state: &state,
                    },
                    |l, e| l.on_post_insert(e),
                ));
                *entity = try_result!(M::from_state(id, state));
                key
            }
        };
        try_result!(self.add_new_collections(&metadata, &key));
        Outcome::Ok(())
    }

    /// The entity with identifier `id`, from the persistence context when it
    /// is already managed, otherwise from the database.
    ///
    /// With [`FlushMode::Auto`], pending inserts and deletes are flushed
    /// before the database is read.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = M::ENTITY_NAME))]
    pub async fn find<M: Model>(&mut self, cx: &Cx, id: Value) -> Outcome<Option<M>, Error> {
        try_result!(self.check_open());
        let key = EntityKey::new(M::ENTITY_NAME, id);
        if let Some(entry) = self.context.entity(&key) {
            tracing::trace!(entity = %key, "Resolved from persistence context");
            return match entry.status {
                EntityStatus::Deleted | EntityStatus::Gone => Outcome::Ok(None),
                EntityStatus::Managed | EntityStatus::ReadOnly => {
                    Outcome::Ok(Some(try_result!(M::from_state(entry.id.clone(), entry.state.clone()))))
                }
            };
        }
        if self.factory.config().flush_mode == FlushMode::Auto && self.actions.has_pending() {
            tracing::debug!("Auto-flushing pending actions before load");
            try_outcome!(self.flush(cx).await);
        }

        let persister = Arc::clone(try_result!(self.factory.entity_persister(M::ENTITY_NAME)));
        let Some(state) = try_outcome!(persister.load(cx, &*self.connection, key.identifier(), None).await) else {
            return Outcome::Ok(None);
        };
        try_result!(self.add_loaded(persister.metadata(), &key, state.clone()));
        Outcome::Ok(Some(try_result!(M::from_state(key.identifier().clone(), state))))
    }

    /// Like [`find`](Self::find), holding a pessimistic lock on the row.
    ///
    /// A managed entity is locked with a version-checked `SELECT ... FOR
    /// UPDATE`; otherwise the row is read with the lock clause appended.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = M::ENTITY_NAME, mode = ?options.mode))]
    pub async fn find_with_lock<M: Model>(
        &mut self,
        cx: &Cx,
        id: Value,
        options: LockOptions,
    ) -> Outcome<Option<M>, Error> {
        try_result!(self.check_open());
        try_outcome!(self.ensure_transaction(cx).await);
        let key = EntityKey::new(M::ENTITY_NAME, id);
        let persister = Arc::clone(try_result!(self.factory.entity_persister(M::ENTITY_NAME)));

        if let Some(entry) = self.context.entity(&key) {
            if matches!(entry.status, EntityStatus::Deleted | EntityStatus::Gone) {
                return Outcome::Ok(None);
            }
            if entry.exists_in_database {
                let version = entry.version().cloned();
                try_outcome!(
                    persister
                        .lock(cx, &*self.connection, key.identifier(), version.as_ref(), options)
                        .await
                );
            }
            let Some(entry) = self.context.entity(&key) else {
                return Outcome::Ok(None);
            };
            return Outcome::Ok(Some(try_result!(M::from_state(entry.id.clone(), entry.state.clone()))));
        }

        let Some(state) =
            try_outcome!(persister.load(cx, &*self.connection, key.identifier(), Some(options)).await)
        else {
            return Outcome::Ok(None);
        };
        try_result!(self.add_loaded(persister.metadata(), &key, state.clone()));
        Outcome::Ok(Some(try_result!(M::from_state(key.identifier().clone(), state))))
    }

    /// Re-read a managed entity from the database, discarding unflushed
    /// changes to it.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = M::ENTITY_NAME))]
    pub async fn refresh<M: Model>(&mut self, cx: &Cx, entity: &mut M) -> Outcome<(), Error> {
        try_result!(self.check_open());
        let key = EntityKey::new(M::ENTITY_NAME, entity.identifier());
        if !self.context.entity(&key).is_some_and(|e| e.exists_in_database) {
            return Outcome::Err(not_managed(&key));
        }
        let persister = Arc::clone(try_result!(self.factory.entity_persister(M::ENTITY_NAME)));
        let Some(state) = try_outcome!(persister.load(cx, &*self.connection, key.identifier(), None).await) else {
            return Outcome::Err(Error::StaleState(StaleStateError {
                entity: M::ENTITY_NAME.to_string(),
                identifier: key.identifier().to_string(),
                message: "no row with the given identifier exists".into(),
            }));
        };
        if let Some(entry) = self.context.entity_mut(&key) {
            entry.state = state.clone();
            entry.mark_synchronized();
        }
        *entity = try_result!(M::from_state(key.identifier().clone(), state));
        Outcome::Ok(())
    }

    /// Hand the session the current state of a managed entity.
    ///
    /// The version property is owned by the session and keeps its managed
    /// value.
    #[allow(clippy::result_large_err)]
    pub fn update<M: Model>(&mut self, entity: &M) -> Result<()> {
        self.check_open()?;
        let key = EntityKey::new(M::ENTITY_NAME, entity.identifier());
        let Some(entry) = self.context.entity_mut(&key) else {
            return Err(not_managed(&key));
        };
        match entry.status {
            EntityStatus::Managed => {}
            EntityStatus::ReadOnly => {
                return Err(Error::unsupported(format!("entity is read-only: [{key}]")));
            }
            EntityStatus::Deleted | EntityStatus::Gone => {
                return Err(Error::Custom(format!("entity was removed: [{key}]")));
            }
        }
        let mut state = entity.state();
        if state.len() != entry.state.len() {
            return Err(Error::config(format!(
                "{} produced {} state values but maps {} properties",
                M::ENTITY_NAME,
                state.len(),
                entry.state.len()
            )));
        }
        if let Some(v) = entry.metadata.version_index() {
            state[v] = entry.state[v].clone();
        }
        entry.state = state;
        Ok(())
    }

    /// Schedule a managed entity for deletion at the next flush.
    ///
    /// An entity whose insert is still pending is simply forgotten.
    #[allow(clippy::result_large_err)]
    pub fn remove<M: Model>(&mut self, entity: &M) -> Result<()> {
        self.check_open()?;
        let key = EntityKey::new(M::ENTITY_NAME, entity.identifier());
        let Some(entry) = self.context.entity_mut(&key) else {
            return Err(not_managed(&key));
        };
        if entry.is_pending_insert() {
            tracing::debug!(entity = %key, "Removing an entity that was never inserted");
            self.actions.cancel_insertion(&key);
            self.context.remove_entity(&key);
            return Ok(());
        }
        match entry.status {
            EntityStatus::Managed | EntityStatus::ReadOnly => {
                entry.status = EntityStatus::Deleted;
                self.actions.add_deletion(key);
            }
            EntityStatus::Deleted | EntityStatus::Gone => {}
        }
        Ok(())
    }

    /// Stop managing an entity and its collections. Pending actions for it
    /// are dropped.
    pub fn evict<M: Model>(&mut self, entity: &M) {
        let key = EntityKey::new(M::ENTITY_NAME, entity.identifier());
        self.actions.cancel_insertion(&key);
        self.actions.cancel_deletion(&key);
        if self.context.remove_entity(&key).is_some() {
            tracing::debug!(entity = %key, "Evicted entity");
        }
    }

    /// Whether `entity` is managed and not scheduled for deletion.
    pub fn contains<M: Model>(&self, entity: &M) -> bool {
        let key = EntityKey::new(M::ENTITY_NAME, entity.identifier());
        self.context
            .entity(&key)
            .is_some_and(|e| matches!(e.status, EntityStatus::Managed | EntityStatus::ReadOnly))
    }

    /// Forget every managed entity and collection and drop pending actions.
    pub fn clear(&mut self) {
        tracing::debug!(entities = self.context.len(), "Clearing session");
        self.context.clear();
        self.actions.clear();
    }

    /// Whether a flush would write anything.
    pub fn is_dirty(&self) -> bool {
        if self.actions.has_pending() {
            return true;
        }
        if self.context.entries().any(|(_, entry)| !dirty_properties(entry).is_empty()) {
            return true;
        }
        self.context.collection_keys().iter().any(|key| {
            self.context.collection(key).is_some_and(|entry| {
                let c = &entry.collection;
                c.needs_recreate() || c.has_changes() || c.state().has_queued_operations()
            })
        })
    }

    /// The collection `role` of the managed owner `owner_id`.
    #[allow(clippy::result_large_err)]
    pub fn collection_mut(&mut self, role: &str, owner_id: Value) -> Result<&mut AnyCollection> {
        self.check_open()?;
        let key = CollectionKey::new(role, owner_id);
        self.context
            .collection_mut(&key)
            .map(|entry| &mut entry.collection)
            .ok_or_else(|| Error::Custom(format!("collection is not managed by this session: [{key}]")))
    }

    pub fn collection(&self, role: &str, owner_id: Value) -> Option<&AnyCollection> {
        self.context
            .collection(&CollectionKey::new(role, owner_id))
            .map(|entry| &entry.collection)
    }

    /// Load a lazy collection now.
    pub async fn initialize_collection(&mut self, cx: &Cx, role: &str, owner_id: Value) -> Outcome<(), Error> {
        let collection = try_result!(self.collection_mut(role, owner_id));
        collection.initialize(cx).await
    }

    /// Write all pending changes.
    ///
    /// A transaction is begun first when `auto_begin` is set and there is
    /// something to write. If the flush fails, the transaction is marked
    /// rollback-only.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<FlushSummary, Error> {
        try_result!(self.check_open());
        match self.flush_actions(cx).await {
            Outcome::Ok(summary) => Outcome::Ok(summary),
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "Flush failed; marking transaction rollback-only");
                self.transaction.mark_rollback_only();
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                self.transaction.mark_rollback_only();
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn flush_actions(&mut self, cx: &Cx) -> Outcome<FlushSummary, Error> {
        try_outcome!(flush::initialize_queued_collections(cx, &mut self.context).await);
        let plan = try_result!(FlushPlan::build(
            &self.context,
            &self.actions,
            self.factory.orderer(),
            self.factory.config().order_inserts,
        ));
        if !plan.is_empty() {
            try_outcome!(self.ensure_transaction(cx).await);
        }
        let summary = try_outcome!(flush::execute(cx, &self.factory, &*self.connection, &mut self.context, &plan).await);
        self.actions.clear();
        Outcome::Ok(summary)
    }

    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.check_open());
        self.transaction.begin(cx, &*self.connection).await
    }

    /// Flush (unless the flush mode is manual) and commit.
    ///
    /// With `auto_begin`, a commit after read-only work (no transaction was
    /// begun because nothing was written) succeeds without touching the
    /// connection. Without it, committing with no open transaction fails.
    ///
    /// A transaction already marked rollback-only is rolled back without
    /// flushing and the call fails. If the flush fails, the transaction is
    /// rolled back and the flush error is attached to the rollback error as
    /// suppressed.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.check_open());
        let doomed = self.transaction.status() == TransactionStatus::MarkedRollback;
        if !doomed && self.factory.config().flush_mode != FlushMode::Manual {
            match self.flush(cx).await {
                Outcome::Ok(_) => {}
                Outcome::Err(flush_error) => {
                    if !self.transaction.is_active() {
                        return Outcome::Err(flush_error);
                    }
                    return match self.transaction.commit(cx, &*self.connection).await {
                        Outcome::Ok(()) => Outcome::Err(flush_error),
                        Outcome::Err(e) => Outcome::Err(e.with_suppressed(flush_error)),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    };
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        if self.factory.config().auto_begin && !self.transaction.is_active() {
            tracing::debug!("Nothing was written; no transaction to commit");
            return Outcome::Ok(());
        }
        self.transaction.commit(cx, &*self.connection).await
    }

    /// Roll back the open transaction. Managed state is left as it is;
    /// call [`clear`](Self::clear) to discard it.
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.check_open());
        self.transaction.rollback(cx, &*self.connection).await
    }

    /// Close the session. Lazy collections can no longer load afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.transaction.is_active() {
            tracing::warn!("Closing session with an open transaction");
        }
        self.link.close();
        self.context.clear();
        self.actions.clear();
        self.closed = true;
        tracing::debug!("Closed session");
    }
}

impl<C: Connection + 'static> Drop for Session<C> {
    fn drop(&mut self) {
        self.link.close();
    }
}
