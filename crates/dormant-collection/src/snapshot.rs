//! Collection snapshots and the dirty-check engine.
//!
//! A [`Snapshot`] is an immutable deep copy of a collection's content taken at
//! load time or at the last flush. Comparing it with the current content
//! yields the rows a flush must delete, insert and update. All comparisons go
//! through the element type's dirtiness predicate, never through identity.
//!
//! Ordered shapes are positional: a slot that became null, or a trailing slot
//! past the current length, is a delete; a slot that was null in the snapshot
//! is an insert; a slot whose element is dirty is an update. Sets are
//! unordered and have no updates: a changed element is a delete plus an
//! insert.

use std::collections::HashMap;

use dormant_core::{PersistentType, Value, ValueKey};

/// Deep copy of collection content.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Set(Vec<Value>),
    /// Lists and arrays, by position.
    Indexed(Vec<Value>),
    Map(HashMap<ValueKey, Value>),
}

/// Identifies one row of a collection table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowKey {
    Index(usize),
    Key(Value),
    Element(Value),
}

impl RowKey {
    /// Value bound to the index columns, if the shape has an index.
    pub fn index_value(&self) -> Option<Value> {
        match self {
            RowKey::Index(i) => Some(Value::BigInt(*i as i64)),
            RowKey::Key(key) => Some(key.clone()),
            RowKey::Element(_) => None,
        }
    }
}

/// One row of a collection table: where it sits and what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRow {
    pub key: RowKey,
    pub element: Value,
}

/// Rows a flush has to write to bring the table in line with the current content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionDiff {
    pub inserts: Vec<CollectionRow>,
    pub updates: Vec<CollectionRow>,
    pub deletes: Vec<RowKey>,
}

impl CollectionDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

fn contains_equal(ty: &dyn PersistentType, haystack: &[Value], needle: &Value) -> bool {
    haystack.iter().any(|candidate| ty.is_equal(candidate, needle))
}

fn is_null_or_absent(value: Option<&Value>) -> bool {
    value.is_none_or(Value::is_null)
}

impl Snapshot {
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Set(items) | Snapshot::Indexed(items) => items.len(),
            Snapshot::Map(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-null rows, in position order for ordered shapes.
    pub fn entries(&self) -> Vec<CollectionRow> {
        match self {
            Snapshot::Set(items) => items
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| CollectionRow {
                    key: RowKey::Element(v.clone()),
                    element: v.clone(),
                })
                .collect(),
            Snapshot::Indexed(items) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| CollectionRow {
                    key: RowKey::Index(i),
                    element: v.clone(),
                })
                .collect(),
            Snapshot::Map(entries) => entries
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| CollectionRow {
                    key: RowKey::Key(k.value().clone()),
                    element: v.clone(),
                })
                .collect(),
        }
    }

    /// Element values regardless of position.
    pub fn elements(&self) -> Vec<&Value> {
        match self {
            Snapshot::Set(items) | Snapshot::Indexed(items) => items.iter().collect(),
            Snapshot::Map(entries) => entries.values().collect(),
        }
    }

    /// Whether `current` holds the same content as this snapshot.
    pub fn equals(&self, ty: &dyn PersistentType, current: &Snapshot) -> bool {
        if self.len() != current.len() {
            return false;
        }
        match (self, current) {
            (Snapshot::Set(old), Snapshot::Set(new)) => {
                new.iter().all(|v| contains_equal(ty, old, v))
            }
            (Snapshot::Indexed(old), Snapshot::Indexed(new)) => {
                old.iter().zip(new).all(|(o, n)| !ty.is_dirty(o, n))
            }
            (Snapshot::Map(old), Snapshot::Map(new)) => new.iter().all(|(k, v)| {
                old.get(k).is_some_and(|o| !ty.is_dirty(o, v))
            }),
            _ => false,
        }
    }

    /// Rows present in the snapshot that must be deleted.
    pub fn deletes(&self, ty: &dyn PersistentType, current: &Snapshot) -> Vec<RowKey> {
        match (self, current) {
            (Snapshot::Set(old), Snapshot::Set(new)) => old
                .iter()
                .filter(|o| !o.is_null() && !contains_equal(ty, new, o))
                .map(|o| RowKey::Element(o.clone()))
                .collect(),
            (Snapshot::Indexed(old), Snapshot::Indexed(new)) => {
                let shared = old.len().min(new.len());
                let mut deletes: Vec<RowKey> = (0..shared)
                    .filter(|&i| new[i].is_null() && !old[i].is_null())
                    .map(RowKey::Index)
                    .collect();
                deletes.extend(
                    (shared..old.len())
                        .filter(|&i| !old[i].is_null())
                        .map(RowKey::Index),
                );
                deletes
            }
            (Snapshot::Map(old), Snapshot::Map(new)) => old
                .iter()
                .filter(|(k, o)| !o.is_null() && is_null_or_absent(new.get(*k)))
                .map(|(k, _)| RowKey::Key(k.value().clone()))
                .collect(),
            _ => self.entries().into_iter().map(|row| row.key).collect(),
        }
    }

    /// Whether `row` of the current content has no counterpart in the snapshot.
    pub fn needs_inserting(&self, ty: &dyn PersistentType, row: &CollectionRow) -> bool {
        if row.element.is_null() {
            return false;
        }
        match (self, &row.key) {
            (Snapshot::Set(old), _) => !contains_equal(ty, old, &row.element),
            (Snapshot::Indexed(old), RowKey::Index(i)) => is_null_or_absent(old.get(*i)),
            (Snapshot::Map(old), RowKey::Key(key)) => {
                is_null_or_absent(old.get(&ValueKey(key.clone())))
            }
            _ => true,
        }
    }

    /// Whether `row` of the current content replaces a dirty element at the same position.
    pub fn needs_updating(&self, ty: &dyn PersistentType, row: &CollectionRow) -> bool {
        if row.element.is_null() {
            return false;
        }
        let old = match (self, &row.key) {
            (Snapshot::Indexed(old), RowKey::Index(i)) => old.get(*i),
            (Snapshot::Map(old), RowKey::Key(key)) => old.get(&ValueKey(key.clone())),
            _ => None,
        };
        old.is_some_and(|o| !o.is_null() && ty.is_dirty(o, &row.element))
    }

    /// Deletes, inserts and updates that turn this snapshot into `current`.
    pub fn diff(&self, ty: &dyn PersistentType, current: &Snapshot) -> CollectionDiff {
        let mut diff = CollectionDiff {
            deletes: self.deletes(ty, current),
            ..CollectionDiff::default()
        };
        for row in current.entries() {
            if self.needs_inserting(ty, &row) {
                diff.inserts.push(row);
            } else if self.needs_updating(ty, &row) {
                diff.updates.push(row);
            }
        }
        diff
    }

    /// Snapshot elements no longer present anywhere in `current`.
    pub fn orphans(&self, ty: &dyn PersistentType, current: &Snapshot) -> Vec<Value> {
        let remaining: Vec<Value> = current.elements().into_iter().cloned().collect();
        self.elements()
            .into_iter()
            .filter(|o| !o.is_null() && !contains_equal(ty, &remaining, o))
            .cloned()
            .collect()
    }
}
