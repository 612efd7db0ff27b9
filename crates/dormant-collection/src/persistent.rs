//! The dirty-checking contract every wrapper fulfils.

use std::sync::Arc;

use dormant_core::{PersistentType, Value};

use crate::snapshot::{CollectionDiff, CollectionRow, RowKey, Snapshot};
use crate::state::CollectionState;

/// Operations the flush needs from a persistent collection.
///
/// Implementors supply access to their [`CollectionState`] and a deep copy of
/// the current content; everything else is derived by comparing that copy with
/// the stored snapshot.
pub trait PersistentCollection {
    fn state(&self) -> &CollectionState;

    fn state_mut(&mut self) -> &mut CollectionState;

    /// Deep copy of the current content. Empty while uninitialized.
    fn get_snapshot(&self) -> Snapshot;

    fn role(&self) -> &str {
        self.state().role()
    }

    fn was_initialized(&self) -> bool {
        self.state().was_initialized()
    }

    fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    fn element_type(&self) -> &Arc<dyn PersistentType> {
        self.state().metadata().element_type()
    }

    /// Whether the current content matches the stored snapshot.
    fn equals_snapshot(&self) -> bool {
        let current = self.get_snapshot();
        match self.state().stored_snapshot() {
            Some(stored) => stored.equals(&**self.element_type(), &current),
            None => current.is_empty(),
        }
    }

    fn get_deletes(&self) -> Vec<RowKey> {
        match self.state().stored_snapshot() {
            Some(stored) => stored.deletes(&**self.element_type(), &self.get_snapshot()),
            None => Vec::new(),
        }
    }

    fn needs_inserting(&self, row: &CollectionRow) -> bool {
        match self.state().stored_snapshot() {
            Some(stored) => stored.needs_inserting(&**self.element_type(), row),
            None => !row.element.is_null(),
        }
    }

    fn needs_updating(&self, row: &CollectionRow) -> bool {
        self.state()
            .stored_snapshot()
            .is_some_and(|stored| stored.needs_updating(&**self.element_type(), row))
    }

    /// Rows to delete, insert and update at the next flush.
    fn diff(&self) -> CollectionDiff {
        let current = self.get_snapshot();
        match self.state().stored_snapshot() {
            Some(stored) => stored.diff(&**self.element_type(), &current),
            None => CollectionDiff {
                inserts: current.entries(),
                ..CollectionDiff::default()
            },
        }
    }

    /// Non-null rows of the current content.
    fn entries(&self) -> Vec<CollectionRow> {
        self.get_snapshot().entries()
    }

    /// Loaded but never written: every row has to be inserted.
    fn needs_recreate(&self) -> bool {
        self.was_initialized() && self.state().stored_snapshot().is_none()
    }

    /// Whether a flush has anything to write for this collection.
    fn has_changes(&self) -> bool {
        let state = self.state();
        state.is_dirty() || (state.is_directly_accessible() && state.was_initialized() && !self.equals_snapshot())
    }

    /// Elements detached since the snapshot, including queued removals.
    fn orphans(&self) -> Vec<Value> {
        let mut orphans = self.state().queued_orphans();
        if let (true, Some(stored)) = (self.was_initialized(), self.state().stored_snapshot()) {
            orphans.extend(stored.orphans(&**self.element_type(), &self.get_snapshot()));
        }
        orphans
    }

    /// Take a fresh snapshot and clear the dirty flag after a successful flush.
    fn post_flush(&mut self) {
        let snapshot = self.was_initialized().then(|| self.get_snapshot());
        self.state_mut().after_flush(snapshot);
    }
}
