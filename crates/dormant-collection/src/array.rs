use std::sync::Arc;

use dormant_core::{Cx, Error, Outcome, Result, Value, try_outcome};

use crate::loader::SessionLink;
use crate::metadata::CollectionMetadata;
use crate::persistent::PersistentCollection;
use crate::snapshot::Snapshot;
use crate::state::{self, Backing, CollectionState, index_out_of_bounds};

/// A fixed-length array. Elements can be replaced in place, but the length
/// only changes when the whole array is replaced.
#[derive(Debug)]
pub struct PersistentArrayHolder {
    state: CollectionState,
    array: Vec<Value>,
}

impl PersistentArrayHolder {
    pub fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        Self {
            state: CollectionState::uninitialized(metadata, key, session),
            array: Vec::new(),
        }
    }

    pub fn new(metadata: Arc<CollectionMetadata>, elements: Vec<Value>) -> Self {
        Self {
            state: CollectionState::transient(metadata),
            array: elements,
        }
    }

    pub async fn initialize(&mut self, cx: &Cx) -> Outcome<(), Error> {
        state::initialize(cx, &mut self.state, &mut self.array).await
    }

    pub async fn read(&mut self, cx: &Cx) -> Outcome<&[Value], Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(&self.array)
    }

    #[allow(clippy::result_large_err)]
    pub fn elements(&self) -> Result<&[Value]> {
        self.state.check_initialized()?;
        Ok(&self.array)
    }

    /// Slots can be overwritten but not added or removed.
    pub async fn backing_mut(&mut self, cx: &Cx) -> Outcome<&mut [Value], Error> {
        try_outcome!(self.initialize(cx).await);
        self.state.mark_directly_accessible();
        Outcome::Ok(&mut self.array)
    }

    pub async fn len(&mut self, cx: &Cx) -> Outcome<usize, Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.array.len())
    }

    pub async fn get(&mut self, cx: &Cx, index: usize) -> Outcome<Option<Value>, Error> {
        try_outcome!(self.initialize(cx).await);
        Outcome::Ok(self.array.get(index).cloned())
    }

    /// Overwrite slot `index`, returning the previous element.
    pub async fn set(&mut self, cx: &Cx, index: usize, element: Value) -> Outcome<Value, Error> {
        try_outcome!(self.initialize(cx).await);
        let len = self.array.len();
        let Some(slot) = self.array.get_mut(index) else {
            return Outcome::Err(index_out_of_bounds(index, len));
        };
        let old = std::mem::replace(slot, element);
        if self.state.metadata().element_type().is_dirty(&old, &self.array[index]) {
            self.state.dirty();
        }
        Outcome::Ok(old)
    }

    /// Replace the whole array, possibly changing its length.
    pub async fn replace(&mut self, cx: &Cx, elements: Vec<Value>) -> Outcome<Vec<Value>, Error> {
        try_outcome!(self.initialize(cx).await);
        let old = std::mem::replace(&mut self.array, elements);
        self.state.dirty();
        Outcome::Ok(old)
    }

    #[allow(clippy::result_large_err)]
    pub fn add(&mut self, _element: Value) -> Result<()> {
        Err(Error::unsupported(format!(
            "cannot add to fixed-size array {}",
            self.state.role()
        )))
    }

    #[allow(clippy::result_large_err)]
    pub fn remove_at(&mut self, index: usize) -> Result<Value> {
        Err(Error::unsupported(format!(
            "cannot remove position {index} from fixed-size array {}",
            self.state.role()
        )))
    }
}

impl PersistentCollection for PersistentArrayHolder {
    fn state(&self) -> &CollectionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CollectionState {
        &mut self.state
    }

    fn get_snapshot(&self) -> Snapshot {
        self.array.capture(self.state.metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RowKey;
    use crate::testing::{StaticLoader, array_metadata, indexed_rows, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    #[test]
    fn shrinking_deletes_trailing_slots() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let link = SessionLink::new(StaticLoader::new(indexed_rows(&[
            (0, "a"),
            (1, "b"),
            (2, "c"),
            (3, "d"),
            (4, "e"),
        ])));

        rt.block_on(async {
            let mut array = PersistentArrayHolder::uninitialized(array_metadata(), Value::BigInt(1), link);
            assert_eq!(unwrap_outcome(array.len(&cx).await), 5);
            unwrap_outcome(array.replace(&cx, vec![text("a"), text("b"), text("c")]).await);
            assert_eq!(array.get_deletes(), vec![RowKey::Index(3), RowKey::Index(4)]);
            assert!(array.diff().inserts.is_empty());
        });
    }

    #[test]
    fn fixed_size_operations_are_unsupported() {
        let mut array = PersistentArrayHolder::new(array_metadata(), vec![text("a")]);
        assert!(matches!(array.add(text("b")), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(array.remove_at(0), Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn overwriting_a_slot_is_an_update() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let link = SessionLink::new(StaticLoader::new(indexed_rows(&[(0, "a"), (1, "b")])));

        rt.block_on(async {
            let mut array = PersistentArrayHolder::uninitialized(array_metadata(), Value::BigInt(1), link);
            assert_eq!(unwrap_outcome(array.set(&cx, 0, text("z")).await), text("a"));
            assert!(array.is_dirty());
            let diff = array.diff();
            assert_eq!(diff.updates.len(), 1);
            assert_eq!(diff.updates[0].key, RowKey::Index(0));
            assert!(matches!(array.set(&cx, 9, text("x")).await, Outcome::Err(_)));
        });
    }
}
