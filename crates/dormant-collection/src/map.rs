use std::collections::HashMap;
use std::sync::Arc;

use dormant_core::{Cx, Error, Outcome, Result, Row, Value, ValueKey, try_outcome};

use crate::loader::SessionLink;
use crate::metadata::CollectionMetadata;
use crate::operation::DelayedOperation;
use crate::persistent::PersistentCollection;
use crate::snapshot::Snapshot;
use crate::state::{self, Backing, CollectionState};

/// A keyed collection; the key is persisted in the index column and held in
/// the canonical form of the index type.
#[derive(Debug)]
pub struct PersistentMap {
    state: CollectionState,
    map: HashMap<ValueKey, Value>,
}

impl Backing for HashMap<ValueKey, Value> {
    fn before_initialize(&mut self, expected: usize) {
        self.clear();
        self.reserve(expected);
    }

    fn read_row(&mut self, metadata: &CollectionMetadata, row: &Row) -> Result<()> {
        let Some(index) = &metadata.index else {
            return Err(Error::config(format!("role {} has no index mapping", metadata.role)));
        };
        let key = index.read(row)?;
        let element = metadata.element.read(row)?;
        self.insert(metadata.index_key(&key), element);
        Ok(())
    }

    fn capture(&self, metadata: &CollectionMetadata) -> Snapshot {
        let element_type = metadata.element_type();
        let key_type = metadata.index_type();
        Snapshot::Map(
            self.iter()
                .map(|(k, v)| {
                    let key = key_type.map_or_else(|| k.value().clone(), |ty| ty.deep_copy(k.value()));
                    (ValueKey(key), element_type.deep_copy(v))
                })
                .collect(),
        )
    }

    fn replay(&mut self, metadata: &CollectionMetadata, operation: DelayedOperation) -> Result<()> {
        match operation {
            DelayedOperation::Put { key, value } => {
                self.insert(metadata.index_key(&key), value);
            }
            DelayedOperation::RemoveKey(key) => {
                self.remove(&metadata.index_key(&key));
            }
            DelayedOperation::Clear => self.clear(),
            other => {
                return Err(Error::unsupported(format!(
                    "{} is not a map operation",
                    other.name()
                )));
            }
        }
        Ok(())
    }
}

impl PersistentMap {
    pub fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        Self {
            state: CollectionState::uninitialized(metadata, key, session),
            map: HashMap::new(),
        }
    }

    pub fn new(metadata: Arc<CollectionMetadata>, entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let map = entries.into_iter().map(|(k, v)| (metadata.index_key(&k), v)).collect();
        Self {
            state: CollectionState::transient(metadata),
            map,
        }
    }

    pub async fn initialize(&mut self, cx: &Cx) -> Outcome<(), Error> {
        state::initialize(cx, &mut self.state, &mut self.map).await
    }

    pub async fn read(&mut self, cx: &Cx) -> Outcome<&HashMap<ValueKey, Value>, Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(&self.map)
    }

    #[allow(clippy::result_large_err)]
    pub fn entries_loaded(&self) -> Result<&HashMap<ValueKey, Value>> {
        self.state.check_initialized()?;
        Ok(&self.map)
    }

    pub async fn backing_mut(&mut self, cx: &Cx) -> Outcome<&mut HashMap<ValueKey, Value>, Error> {
        try_outcome!(self.initialize(cx).await);
        self.state.mark_directly_accessible();
        Outcome::Ok(&mut self.map)
    }

    pub async fn size(&mut self, cx: &Cx) -> Outcome<usize, Error> {
        if let Some(size) = try_outcome!(state::read_size(cx, &mut self.state).await) {
            return Outcome::Ok(size);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.map.len())
    }

    pub async fn is_empty(&mut self, cx: &Cx) -> Outcome<bool, Error> {
        let size = try_outcome!(self.size(cx).await);
        Outcome::Ok(size == 0)
    }

    /// Value stored under `key`; read with a keyed query when extra-lazy.
    pub async fn get(&mut self, cx: &Cx, key: &Value) -> Outcome<Option<Value>, Error> {
        if let Some(element) = try_outcome!(state::read_element_by_index(cx, &self.state, key).await) {
            return Outcome::Ok(element);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.map.get(&self.state.metadata().index_key(key)).cloned())
    }

    pub async fn contains_key(&mut self, cx: &Cx, key: &Value) -> Outcome<bool, Error> {
        let value = try_outcome!(self.get(cx, key).await);
        Outcome::Ok(value.is_some())
    }

    /// Returns the previous value; when queued, the previous value is only
    /// known for extra-lazy roles.
    pub async fn put(&mut self, cx: &Cx, key: Value, value: Value) -> Outcome<Option<Value>, Error> {
        if self.state.is_operation_queue_enabled() {
            let old = try_outcome!(state::read_element_by_index(cx, &self.state, &key).await).flatten();
            self.state.queue_operation(DelayedOperation::Put { key, value });
            return Outcome::Ok(old);
        }
        try_outcome!(self.initialize(cx).await);
        let old = self.map.insert(self.state.metadata().index_key(&key), value.clone());
        let changed = old
            .as_ref()
            .is_none_or(|o| self.state.metadata().element_type().is_dirty(o, &value));
        if changed {
            self.state.dirty();
        }
        Outcome::Ok(old)
    }

    pub async fn remove(&mut self, cx: &Cx, key: &Value) -> Outcome<Option<Value>, Error> {
        if self.state.is_operation_queue_enabled() {
            let old = try_outcome!(state::read_element_by_index(cx, &self.state, key).await).flatten();
            self.state.queue_operation(DelayedOperation::RemoveKey(key.clone()));
            return Outcome::Ok(old);
        }
        try_outcome!(self.initialize(cx).await);
        let old = self.map.remove(&self.state.metadata().index_key(key));
        if old.is_some() {
            self.state.dirty();
        }
        Outcome::Ok(old)
    }

    pub async fn clear(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.state.is_operation_queue_enabled() {
            self.state.queue_operation(DelayedOperation::Clear);
            return Outcome::Ok(());
        }
        try_outcome!(self.initialize(cx).await);
        if !self.map.is_empty() {
            self.map.clear();
            self.state.dirty();
        }
        Outcome::Ok(())
    }
}

impl PersistentCollection for PersistentMap {
    fn state(&self) -> &CollectionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CollectionState {
        &mut self.state
    }

    fn get_snapshot(&self) -> Snapshot {
        self.map.capture(self.state.metadata())
    }
}
