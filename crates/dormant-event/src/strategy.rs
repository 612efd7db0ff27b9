//! Duplicate-listener detection.

use std::any::TypeId;
use std::fmt;

/// What to do when a newly registered listener matches an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicationAction {
    /// Reject the registration with an error.
    Error,
    /// Keep the already registered listener and drop the new one.
    KeepOriginal,
    /// Put the new listener at the position of the old one.
    ReplaceOriginal,
}

/// Type-erased facts about a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerInfo {
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Address of the listener instance, for identity comparison.
    pub address: usize,
}

/// Implemented for every `'static` type; lets a `dyn` listener report its concrete type.
///
/// Call it as `<L as ListenerIdentity>::listener_type(listener)` on a `&L` so the
/// call is dispatched through the listener's vtable rather than resolved for a
/// smart pointer around it.
pub trait ListenerIdentity {
    fn listener_type(&self) -> TypeId;
    fn listener_type_name(&self) -> &'static str;
}

impl<T: 'static> ListenerIdentity for T {
    fn listener_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn listener_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Decides whether two listeners are duplicates and what to do about it.
pub trait DuplicationStrategy: fmt::Debug + Send + Sync {
    fn are_match(&self, listener: &ListenerInfo, original: &ListenerInfo) -> bool;

    fn action(&self) -> DuplicationAction;
}

/// Listeners of the same concrete type are duplicates.
#[derive(Debug, Clone, Copy)]
pub struct SameTypeStrategy {
    pub action: DuplicationAction,
}

impl DuplicationStrategy for SameTypeStrategy {
    fn are_match(&self, listener: &ListenerInfo, original: &ListenerInfo) -> bool {
        listener.type_id == original.type_id
    }

    fn action(&self) -> DuplicationAction {
        self.action
    }
}

/// Only the very same listener instance is a duplicate.
#[derive(Debug, Clone, Copy)]
pub struct SameInstanceStrategy {
    pub action: DuplicationAction,
}

impl DuplicationStrategy for SameInstanceStrategy {
    fn are_match(&self, listener: &ListenerInfo, original: &ListenerInfo) -> bool {
        listener.address == original.address
    }

    fn action(&self) -> DuplicationAction {
        self.action
    }
}

/// Strategy applied after all registered ones: same type is an error.
pub const DEFAULT_DUPLICATION_STRATEGY: SameTypeStrategy = SameTypeStrategy {
    action: DuplicationAction::Error,
};
