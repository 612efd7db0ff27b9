//! Mutations recorded against a collection that is not loaded yet.

use dormant_core::Value;

/// A queued mutation, replayed in FIFO order once the collection is loaded.
///
/// Positional list operations are never queued: their index is checked
/// against the loaded content.
#[derive(Debug, Clone, PartialEq)]
pub enum DelayedOperation {
    Add(Value),
    Remove(Value),
    Clear,
    Put { key: Value, value: Value },
    RemoveKey(Value),
}

impl DelayedOperation {
    pub const fn name(&self) -> &'static str {
        match self {
            DelayedOperation::Add(_) => "add",
            DelayedOperation::Remove(_) => "remove",
            DelayedOperation::Clear => "clear",
            DelayedOperation::Put { .. } => "put",
            DelayedOperation::RemoveKey(_) => "remove-key",
        }
    }

    /// The element this operation detaches from the collection, if known.
    pub fn orphan(&self) -> Option<&Value> {
        match self {
            DelayedOperation::Remove(value) => Some(value),
            _ => None,
        }
    }
}
