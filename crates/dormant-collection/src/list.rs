use std::sync::Arc;

use dormant_core::error::TypeError;
use dormant_core::{Cx, Error, Outcome, Result, Row, Value, try_outcome, try_result};

use crate::loader::SessionLink;
use crate::metadata::CollectionMetadata;
use crate::operation::DelayedOperation;
use crate::persistent::PersistentCollection;
use crate::snapshot::Snapshot;
use crate::state::{self, Backing, CollectionState, index_out_of_bounds};

/// An ordered collection persisted with an index column.
#[derive(Debug)]
pub struct PersistentList {
    state: CollectionState,
    list: Vec<Value>,
}

#[allow(clippy::result_large_err)]
fn decode_position(metadata: &CollectionMetadata, row: &Row) -> Result<usize> {
    let Some(index) = &metadata.index else {
        return Err(Error::config(format!("role {} has no index mapping", metadata.role)));
    };
    let value = index.read(row)?;
    value
        .as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "non-negative list index",
                actual: value.to_string(),
                column: index.columns().first().cloned(),
            })
        })
}

/// Position of the first element equal to `element` under the element type.
fn position_of(metadata: &CollectionMetadata, list: &[Value], element: &Value) -> Option<usize> {
    let ty = metadata.element_type();
    list.iter().position(|candidate| ty.is_equal(candidate, element))
}

impl Backing for Vec<Value> {
    fn before_initialize(&mut self, expected: usize) {
        self.clear();
        self.reserve(expected);
    }

    fn read_row(&mut self, metadata: &CollectionMetadata, row: &Row) -> Result<()> {
        let position = decode_position(metadata, row)?;
        let element = metadata.element.read(row)?;
        if self.len() <= position {
            self.resize(position + 1, Value::Null);
        }
        self[position] = element;
        Ok(())
    }

    fn capture(&self, metadata: &CollectionMetadata) -> Snapshot {
        let ty = metadata.element_type();
        Snapshot::Indexed(self.iter().map(|e| ty.deep_copy(e)).collect())
    }

    fn replay(&mut self, metadata: &CollectionMetadata, operation: DelayedOperation) -> Result<()> {
        match operation {
            DelayedOperation::Add(element) => self.push(element),
            DelayedOperation::Remove(element) => {
                if let Some(position) = position_of(metadata, self, &element) {
                    self.remove(position);
                }
            }
            DelayedOperation::Clear => self.clear(),
            other => {
                return Err(Error::unsupported(format!(
                    "{} is not a list operation",
                    other.name()
                )));
            }
        }
        Ok(())
    }
}

impl PersistentList {
    /// A list owned by the entity identified by `key`, loaded on first access.
    pub fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        Self {
            state: CollectionState::uninitialized(metadata, key, session),
            list: Vec::new(),
        }
    }

    /// A new list created by the application.
    pub fn new(metadata: Arc<CollectionMetadata>, elements: Vec<Value>) -> Self {
        Self {
            state: CollectionState::transient(metadata),
            list: elements,
        }
    }

    pub async fn initialize(&mut self, cx: &Cx) -> Outcome<(), Error> {
        state::initialize(cx, &mut self.state, &mut self.list).await
    }

    pub async fn read(&mut self, cx: &Cx) -> Outcome<&[Value], Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(&self.list)
    }

    #[allow(clippy::result_large_err)]
    pub fn elements(&self) -> Result<&[Value]> {
        self.state.check_initialized()?;
        Ok(&self.list)
    }

    pub async fn backing_mut(&mut self, cx: &Cx) -> Outcome<&mut Vec<Value>, Error> {
        try_outcome!(self.initialize(cx).await);
        self.state.mark_directly_accessible();
        Outcome::Ok(&mut self.list)
    }

    pub async fn size(&mut self, cx: &Cx) -> Outcome<usize, Error> {
        if let Some(size) = try_outcome!(state::read_size(cx, &mut self.state).await) {
            return Outcome::Ok(size);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.list.len())
    }

    pub async fn is_empty(&mut self, cx: &Cx) -> Outcome<bool, Error> {
        let size = try_outcome!(self.size(cx).await);
        Outcome::Ok(size == 0)
    }

    /// Element at `index`; read with a positional query when extra-lazy.
    pub async fn get(&mut self, cx: &Cx, index: usize) -> Outcome<Option<Value>, Error> {
        let position = Value::BigInt(index as i64);
        if let Some(element) = try_outcome!(state::read_element_by_index(cx, &self.state, &position).await) {
            return Outcome::Ok(element);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.list.get(index).cloned())
    }

    pub async fn contains(&mut self, cx: &Cx, element: &Value) -> Outcome<bool, Error> {
        if let Some(exists) = try_outcome!(state::read_element_existence(cx, &self.state, element).await) {
            return Outcome::Ok(exists);
        }
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(position_of(self.state.metadata(), &self.list, element).is_some())
    }

    pub async fn index_of(&mut self, cx: &Cx, element: &Value) -> Outcome<Option<usize>, Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(position_of(self.state.metadata(), &self.list, element))
    }

    /// Append an element.
    pub async fn add(&mut self, cx: &Cx, element: Value) -> Outcome<(), Error> {
        self.apply(cx, DelayedOperation::Add(element)).await
    }

    pub async fn add_all(&mut self, cx: &Cx, elements: Vec<Value>) -> Outcome<(), Error> {
        for element in elements {
            try_outcome!(self.add(cx, element).await);
        }
        Outcome::Ok(())
    }

    /// Insert at `index`, shifting later elements. Always loads the list.
    pub async fn insert(&mut self, cx: &Cx, index: usize, element: Value) -> Outcome<(), Error> {
        try_outcome!(self.initialize(cx).await);
        if index > self.list.len() {
            return Outcome::Err(index_out_of_bounds(index, self.list.len()));
        }
        self.list.insert(index, element);
        self.state.dirty();
        Outcome::Ok(())
    }

    /// Replace the element at `index` and return the previous one. Always loads the list.
    pub async fn set(&mut self, cx: &Cx, index: usize, element: Value) -> Outcome<Value, Error> {
        try_outcome!(self.initialize(cx).await);
        let len = self.list.len();
        let Some(slot) = self.list.get_mut(index) else {
            return Outcome::Err(index_out_of_bounds(index, len));
        };
        let old = std::mem::replace(slot, element);
        if self.state.metadata().element_type().is_dirty(&old, &self.list[index]) {
            self.state.dirty();
        }
        Outcome::Ok(old)
    }

    /// Remove the first element equal to `element`.
    pub async fn remove(&mut self, cx: &Cx, element: &Value) -> Outcome<bool, Error> {
        if self.state.is_operation_queue_enabled() {
            self.state.queue_operation(DelayedOperation::Remove(element.clone()));
            return Outcome::Ok(true);
        }
        try_outcome!(self.initialize(cx).await);
        match position_of(self.state.metadata(), &self.list, element) {
            Some(position) => {
                self.list.remove(position);
                self.state.dirty();
                Outcome::Ok(true)
            }
            None => Outcome::Ok(false),
        }
    }

    /// Remove the element at `index` and return it. Always loads the list.
    pub async fn remove_at(&mut self, cx: &Cx, index: usize) -> Outcome<Value, Error> {
        try_outcome!(self.initialize(cx).await);
        if index >= self.list.len() {
            return Outcome::Err(index_out_of_bounds(index, self.list.len()));
        }
        let removed = self.list.remove(index);
        self.state.dirty();
        Outcome::Ok(removed)
    }

    pub async fn clear(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.state.is_operation_queue_enabled() {
            self.state.queue_operation(DelayedOperation::Clear);
            return Outcome::Ok(());
        }
        try_outcome!(self.initialize(cx).await);
        if !self.list.is_empty() {
            self.list.clear();
            self.state.dirty();
        }
        Outcome::Ok(())
    }

    /// Queue `operation` when allowed, otherwise load and apply it.
    async fn apply(&mut self, cx: &Cx, operation: DelayedOperation) -> Outcome<(), Error> {
        if self.state.is_operation_queue_enabled() {
            self.state.queue_operation(operation);
            return Outcome::Ok(());
        }
        try_outcome!(self.initialize(cx).await);
        let metadata = Arc::clone(self.state.metadata());
        try_result!(self.list.replay(&metadata, operation));
        self.state.dirty();
        Outcome::Ok(())
    }
}

impl PersistentCollection for PersistentList {
    fn state(&self) -> &CollectionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CollectionState {
        &mut self.state
    }

    fn get_snapshot(&self) -> Snapshot {
        self.list.capture(self.state.metadata())
    }
}
