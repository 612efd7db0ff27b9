//! State shared by every persistent collection wrapper, and the lazy
//! initialization protocol.

use std::sync::Arc;

use dormant_core::{Cx, Error, Outcome, Result, Row, Value, try_outcome, try_result};

use crate::loader::SessionLink;
use crate::metadata::{CollectionKind, CollectionMetadata};
use crate::operation::DelayedOperation;
use crate::snapshot::Snapshot;

/// Bookkeeping of a persistent collection, independent of its shape.
#[derive(Debug)]
pub struct CollectionState {
    metadata: Arc<CollectionMetadata>,
    key: Option<Value>,
    session: Option<SessionLink>,
    initialized: bool,
    initializing: bool,
    directly_accessible: bool,
    dirty: bool,
    operation_queue: Vec<DelayedOperation>,
    cached_size: Option<usize>,
    stored_snapshot: Option<Snapshot>,
}

impl CollectionState {
    pub(crate) fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        Self {
            metadata,
            key: Some(key),
            session: Some(session),
            initialized: false,
            initializing: false,
            directly_accessible: false,
            dirty: false,
            operation_queue: Vec::new(),
            cached_size: None,
            stored_snapshot: None,
        }
    }

    /// A new collection created by the application: loaded, detached, never flushed.
    pub(crate) fn transient(metadata: Arc<CollectionMetadata>) -> Self {
        Self {
            metadata,
            key: None,
            session: None,
            initialized: true,
            initializing: false,
            directly_accessible: false,
            dirty: true,
            operation_queue: Vec::new(),
            cached_size: None,
            stored_snapshot: None,
        }
    }

    pub fn metadata(&self) -> &Arc<CollectionMetadata> {
        &self.metadata
    }

    pub fn role(&self) -> &str {
        &self.metadata.role
    }

    /// Identifier of the owning entity.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    pub fn was_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// The backing container was handed out for direct mutation.
    pub fn is_directly_accessible(&self) -> bool {
        self.directly_accessible
    }

    pub fn has_queued_operations(&self) -> bool {
        !self.operation_queue.is_empty()
    }

    pub fn queued_operations(&self) -> &[DelayedOperation] {
        &self.operation_queue
    }

    /// Elements removed by queued operations.
    pub fn queued_orphans(&self) -> Vec<Value> {
        self.operation_queue
            .iter()
            .filter_map(DelayedOperation::orphan)
            .cloned()
            .collect()
    }

    pub fn cached_size(&self) -> Option<usize> {
        self.cached_size
    }

    /// Snapshot taken at load time or at the last flush; `None` before the first flush of a new collection.
    pub fn stored_snapshot(&self) -> Option<&Snapshot> {
        self.stored_snapshot.as_ref()
    }

    pub fn session(&self) -> Option<&SessionLink> {
        self.session.as_ref()
    }

    pub fn is_connected_to_session(&self) -> bool {
        self.session.as_ref().is_some_and(SessionLink::is_open)
    }

    /// Mutations are recorded rather than applied: uninitialized, connected,
    /// queueing allowed by the session, and the role inverse or extra-lazy.
    pub fn is_operation_queue_enabled(&self) -> bool {
        !self.initialized
            && self.metadata.kind != CollectionKind::Array
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.is_open() && s.operation_queue())
            && (self.metadata.inverse || self.metadata.extra_lazy)
    }

    /// Attach to a session under the owner identifier `key`.
    ///
    /// Returns `false` when already attached to that session. Attaching to a
    /// second open session is an error.
    #[allow(clippy::result_large_err)]
    pub fn set_current_session(&mut self, session: SessionLink, key: Value) -> Result<bool> {
        if let Some(current) = &self.session {
            if current.same_session(&session) {
                return Ok(false);
            }
            if current.is_open() {
                return Err(Error::Custom(format!(
                    "illegal attempt to associate collection {} with two open sessions",
                    self.metadata.role
                )));
            }
        }
        self.session = Some(session);
        self.key = Some(key);
        Ok(true)
    }

    /// Detach from the session; returns whether a session was attached.
    pub fn unset_session(&mut self) -> bool {
        self.session.take().is_some()
    }

    pub(crate) fn mark_directly_accessible(&mut self) {
        self.directly_accessible = true;
    }

    pub(crate) fn queue_operation(&mut self, operation: DelayedOperation) {
        tracing::trace!(
            role = %self.metadata.role,
            operation = operation.name(),
            queued = self.operation_queue.len() + 1,
            "Queueing collection operation"
        );
        self.cached_size = None;
        self.dirty = true;
        self.operation_queue.push(operation);
    }

    pub(crate) fn after_flush(&mut self, snapshot: Option<Snapshot>) {
        if snapshot.is_some() {
            self.stored_snapshot = snapshot;
        }
        self.dirty = false;
    }

    pub(crate) fn lazy_error(&self, reason: &str) -> Error {
        Error::lazy_initialization(Some(&self.metadata.role), reason)
    }

    /// Fail with a lazy-initialization error unless the content is loaded.
    #[allow(clippy::result_large_err)]
    pub(crate) fn check_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(self.lazy_error("collection was not initialized"))
        }
    }

    #[allow(clippy::result_large_err)]
    fn connected_session(&self) -> Result<&SessionLink> {
        match &self.session {
            None => Err(self.lazy_error("could not initialize proxy - no Session")),
            Some(session) if !session.is_open() => {
                Err(self.lazy_error("could not initialize proxy - the owning Session was closed"))
            }
            Some(session) => Ok(session),
        }
    }

    /// Session, metadata and key for a database read that avoids loading,
    /// available when the role is extra-lazy and nothing is queued.
    fn extra_lazy_target(&self) -> Option<(SessionLink, Arc<CollectionMetadata>, Value)> {
        if self.initialized || !self.metadata.extra_lazy || self.has_queued_operations() {
            return None;
        }
        let session = self.connected_session().ok()?.clone();
        let key = self.key.clone()?;
        Some((session, Arc::clone(&self.metadata), key))
    }
}

/// Resets the initializing flag however the load ends, including cancellation.
struct Loading<'a>(&'a mut bool);

impl<'a> Loading<'a> {
    fn enter(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

/// The shape-specific container behind a wrapper.
pub(crate) trait Backing: Send {
    fn before_initialize(&mut self, expected: usize);

    #[allow(clippy::result_large_err)]
    fn read_row(&mut self, metadata: &CollectionMetadata, row: &Row) -> Result<()>;

    fn capture(&self, metadata: &CollectionMetadata) -> Snapshot;

    #[allow(clippy::result_large_err)]
    fn replay(&mut self, metadata: &CollectionMetadata, operation: DelayedOperation) -> Result<()>;
}

/// Load `backing` through the session link, store the load-time snapshot and
/// replay queued operations in FIFO order. A no-op once initialized.
///
/// The collection only counts as initialized once every queued operation has
/// replayed; on failure the backing is emptied and the queue kept.
pub(crate) async fn initialize<B: Backing>(
    cx: &Cx,
    state: &mut CollectionState,
    backing: &mut B,
) -> Outcome<(), Error> {
    if state.initialized {
        return Outcome::Ok(());
    }
    if state.initializing {
        return Outcome::Err(state.lazy_error("illegal access to loading collection"));
    }
    let session = try_result!(state.connected_session()).clone();
    let Some(key) = state.key.clone() else {
        return Outcome::Err(state.lazy_error("collection has no owner key"));
    };
    let metadata = Arc::clone(&state.metadata);

    tracing::debug!(role = %metadata.role, key = %key, "Initializing collection");
    let rows = {
        let _loading = Loading::enter(&mut state.initializing);
        try_outcome!(session.loader().load(cx, &metadata, &key).await)
    };

    backing.before_initialize(rows.len());
    for row in &rows {
        if let Err(e) = backing.read_row(&metadata, row) {
            backing.before_initialize(0);
            return Outcome::Err(e);
        }
    }
    let snapshot = backing.capture(&metadata);

    if !state.operation_queue.is_empty() {
        tracing::debug!(
            role = %metadata.role,
            operations = state.operation_queue.len(),
            "Replaying queued collection operations"
        );
    }
    for operation in &state.operation_queue {
        if let Err(e) = backing.replay(&metadata, operation.clone()) {
            tracing::warn!(
                role = %metadata.role,
                operation = operation.name(),
                error = %e,
                "Queued collection operation failed to replay"
            );
            backing.before_initialize(0);
            return Outcome::Err(e);
        }
    }
    state.operation_queue.clear();
    state.stored_snapshot = Some(snapshot);
    state.initialized = true;
    state.cached_size = None;
    tracing::trace!(role = %metadata.role, rows = rows.len(), "Collection initialized");
    Outcome::Ok(())
}

/// Row count from a count query, cached until the next queued mutation.
/// `None` when the collection has to be loaded instead.
pub(crate) async fn read_size(cx: &Cx, state: &mut CollectionState) -> Outcome<Option<usize>, Error> {
    let Some((session, metadata, key)) = state.extra_lazy_target() else {
        return Outcome::Ok(None);
    };
    if let Some(size) = state.cached_size {
        return Outcome::Ok(Some(size));
    }
    let size = try_outcome!(session.loader().size(cx, &metadata, &key).await);
    tracing::trace!(role = %metadata.role, size, "Read extra-lazy collection size");
    state.cached_size = Some(size);
    Outcome::Ok(Some(size))
}

/// Element existence from an existence query; `None` when the collection has to be loaded instead.
pub(crate) async fn read_element_existence(
    cx: &Cx,
    state: &CollectionState,
    element: &Value,
) -> Outcome<Option<bool>, Error> {
    let Some((session, metadata, key)) = state.extra_lazy_target() else {
        return Outcome::Ok(None);
    };
    let exists = try_outcome!(session.loader().element_exists(cx, &metadata, &key, element).await);
    Outcome::Ok(Some(exists))
}

/// Element at `index` from a positional query; `None` when the collection has to be loaded instead.
pub(crate) async fn read_element_by_index(
    cx: &Cx,
    state: &CollectionState,
    index: &Value,
) -> Outcome<Option<Option<Value>>, Error> {
    let Some((session, metadata, key)) = state.extra_lazy_target() else {
        return Outcome::Ok(None);
    };
    let element = try_outcome!(session.loader().element_by_index(cx, &metadata, &key, index).await);
    Outcome::Ok(Some(element))
}

pub(crate) fn index_out_of_bounds(index: usize, len: usize) -> Error {
    Error::Custom(format!("index {index} out of bounds for length {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticLoader, list_metadata, single_column_rows, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;

    /// Appends elements and refuses to replay a null one.
    #[derive(Debug, Default)]
    struct NonNullBag(Vec<Value>);

    impl Backing for NonNullBag {
        fn before_initialize(&mut self, _expected: usize) {
            self.0.clear();
        }

        fn read_row(&mut self, metadata: &CollectionMetadata, row: &Row) -> Result<()> {
            self.0.push(metadata.element.read(row)?);
            Ok(())
        }

        fn capture(&self, _metadata: &CollectionMetadata) -> Snapshot {
            Snapshot::Indexed(self.0.clone())
        }

        fn replay(&mut self, _metadata: &CollectionMetadata, operation: DelayedOperation) -> Result<()> {
            match operation {
                DelayedOperation::Add(Value::Null) => Err(Error::Custom("null element".into())),
                DelayedOperation::Add(element) => {
                    self.0.push(element);
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    #[test]
    fn failed_replay_keeps_the_queue_and_stays_uninitialized() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let loader = StaticLoader::new(single_column_rows(&["a", "b"]));
        let link = SessionLink::new(loader.clone());
        let mut state = CollectionState::uninitialized(list_metadata(true, false), Value::BigInt(7), link);
        state.queue_operation(DelayedOperation::Add(text("x")));
        state.queue_operation(DelayedOperation::Add(Value::Null));
        state.queue_operation(DelayedOperation::Add(text("y")));
        let mut bag = NonNullBag::default();

        rt.block_on(async {
            assert!(matches!(
                initialize(&cx, &mut state, &mut bag).await,
                Outcome::Err(Error::Custom(_))
            ));
            assert!(!state.was_initialized());
            assert_eq!(state.queued_operations().len(), 3);
            assert!(state.stored_snapshot().is_none());
            assert!(bag.0.is_empty());

            // A retry loads again and fails the same way instead of reporting success.
            assert!(matches!(
                initialize(&cx, &mut state, &mut bag).await,
                Outcome::Err(Error::Custom(_))
            ));
            assert_eq!(loader.loads(), 2);
        });
    }

    #[test]
    fn replay_completes_before_the_collection_counts_as_loaded() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let link = SessionLink::new(StaticLoader::new(single_column_rows(&["a"])));
        let mut state = CollectionState::uninitialized(list_metadata(true, false), Value::BigInt(7), link);
        state.queue_operation(DelayedOperation::Add(text("x")));
        let mut bag = NonNullBag::default();

        rt.block_on(async {
            unwrap_outcome(initialize(&cx, &mut state, &mut bag).await);
        });
        assert!(state.was_initialized());
        assert!(!state.has_queued_operations());
        assert_eq!(bag.0, vec![text("a"), text("x")]);
        assert_eq!(state.stored_snapshot(), Some(&Snapshot::Indexed(vec![text("a")])));
    }
}
