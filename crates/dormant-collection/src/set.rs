use std::collections::HashSet;
use std::sync::Arc;

use dormant_core::{Cx, Error, Outcome, Result, Row, Value, ValueKey, try_outcome};

use crate::loader::SessionLink;
use crate::metadata::CollectionMetadata;
use crate::operation::DelayedOperation;
use crate::persistent::PersistentCollection;
use crate::snapshot::Snapshot;
use crate::state::{self, Backing, CollectionState};

/// An unordered collection without duplicates.
///
/// Elements are held in the canonical form of the element type, so `Int(1)`
/// and `BigInt(1)` are one element of a `long` set.
#[derive(Debug)]
pub struct PersistentSet {
    state: CollectionState,
    set: HashSet<ValueKey>,
}

impl Backing for HashSet<ValueKey> {
    fn before_initialize(&mut self, expected: usize) {
        self.clear();
        self.reserve(expected);
    }

    fn read_row(&mut self, metadata: &CollectionMetadata, row: &Row) -> Result<()> {
        let element = metadata.element.read(row)?;
        if !element.is_null() {
            self.insert(metadata.element_key(&element));
        }
        Ok(())
    }

    fn capture(&self, metadata: &CollectionMetadata) -> Snapshot {
        let ty = metadata.element_type();
        Snapshot::Set(self.iter().map(|e| ty.deep_copy(e.value())).collect())
    }

    fn replay(&mut self, metadata: &CollectionMetadata, operation: DelayedOperation) -> Result<()> {
        match operation {
            DelayedOperation::Add(element) => {
                self.insert(metadata.element_key(&element));
            }
            DelayedOperation::Remove(element) => {
                self.remove(&metadata.element_key(&element));
            }
            DelayedOperation::Clear => self.clear(),
            other => {
                return Err(Error::unsupported(format!(
                    "{} is not a set operation",
                    other.name()
                )));
            }
        }
        Ok(())
    }
}

impl PersistentSet {
    /// A set owned by the entity identified by `key`, loaded on first access.
    pub fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        Self {
            state: CollectionState::uninitialized(metadata, key, session),
            set: HashSet::new(),
        }
    }

    /// A new set created by the application.
    pub fn new(metadata: Arc<CollectionMetadata>, elements: impl IntoIterator<Item = Value>) -> Self {
        let set = elements.into_iter().map(|e| metadata.element_key(&e)).collect();
        Self {
            state: CollectionState::transient(metadata),
            set,
        }
    }

    pub async fn initialize(&mut self, cx: &Cx) -> Outcome<(), Error> {
        state::initialize(cx, &mut self.state, &mut self.set).await
    }

    /// Load if needed and borrow the content.
    pub async fn read(&mut self, cx: &Cx) -> Outcome<&HashSet<ValueKey>, Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(&self.set)
    }

    /// The loaded content; a lazy-initialization error if not loaded yet.
    #[allow(clippy::result_large_err)]
    pub fn elements(&self) -> Result<impl Iterator<Item = &Value>> {
        self.state.check_initialized()?;
        Ok(self.set.iter().map(ValueKey::value))
    }

    /// Load if needed and hand out the content for direct mutation.
    pub async fn backing_mut(&mut self, cx: &Cx) -> Outcome<&mut HashSet<ValueKey>, Error> {
        try_outcome!(self.initialize(cx).await);
        self.state.mark_directly_accessible();
        Outcome::Ok(&mut self.set)
    }

    pub async fn size(&mut self, cx: &Cx) -> Outcome<usize, Error> {
        if let Some(size) = try_outcome!(state::read_size(cx, &mut self.state).await) {
            return Outcome::Ok(size);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.set.len())
    }

    pub async fn is_empty(&mut self, cx: &Cx) -> Outcome<bool, Error> {
        let size = try_outcome!(self.size(cx).await);
        Outcome::Ok(size == 0)
    }

    pub async fn contains(&mut self, cx: &Cx, element: &Value) -> Outcome<bool, Error> {
        if let Some(exists) = try_outcome!(state::read_element_existence(cx, &self.state, element).await) {
            return Outcome::Ok(exists);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.set.contains(&self.state.metadata().element_key(element)))
    }

    /// Returns whether the set changed; always `true` for a queued add of an element not known to exist.
    pub async fn add(&mut self, cx: &Cx, element: Value) -> Outcome<bool, Error> {
        if self.state.is_operation_queue_enabled() {
            let exists = try_outcome!(state::read_element_existence(cx, &self.state, &element).await);
            if exists == Some(true) {
                return Outcome::Ok(false);
            }
            self.state.queue_operation(DelayedOperation::Add(element));
            return Outcome::Ok(true);
        }
        try_outcome!(self.initialize(cx).await);
        let added = self.set.insert(self.state.metadata().element_key(&element));
        if added {
            self.state.dirty();
        }
        Outcome::Ok(added)
    }

    pub async fn add_all(&mut self, cx: &Cx, elements: Vec<Value>) -> Outcome<bool, Error> {
        let mut changed = false;
        for element in elements {
            changed |= try_outcome!(self.add(cx, element).await);
        }
        Outcome::Ok(changed)
    }

    pub async fn remove(&mut self, cx: &Cx, element: &Value) -> Outcome<bool, Error> {
        if self.state.is_operation_queue_enabled() {
            let exists = try_outcome!(state::read_element_existence(cx, &self.state, element).await);
            if exists == Some(false) {
                return Outcome::Ok(false);
            }
            self.state.queue_operation(DelayedOperation::Remove(element.clone()));
            return Outcome::Ok(true);
        }
        try_outcome!(self.initialize(cx).await);
        let removed = self.set.remove(&self.state.metadata().element_key(element));
        if removed {
            self.state.dirty();
        }
        Outcome::Ok(removed)
    }

    pub async fn clear(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.state.is_operation_queue_enabled() {
            self.state.queue_operation(DelayedOperation::Clear);
            return Outcome::Ok(());
        }
        try_outcome!(self.initialize(cx).await);
        if !self.set.is_empty() {
            self.set.clear();
            self.state.dirty();
        }
        Outcome::Ok(())
    }

    /// Sets have no positions.
    #[allow(clippy::result_large_err)]
    pub fn get_index(&self, index: usize) -> Result<Value> {
        Err(Error::unsupported(format!(
            "set {} has no element at position {index}: sets are not indexed",
            self.state.role()
        )))
    }
}

impl PersistentCollection for PersistentSet {
    fn state(&self) -> &CollectionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CollectionState {
        &mut self.state
    }

    fn get_snapshot(&self) -> Snapshot {
        self.set.capture(self.state.metadata())
    }
}
