//! Ordered, duplicate-checked listener groups.

use std::sync::Arc;

use dormant_core::error::EventListenerRegistrationError;
use dormant_core::{Error, Result};

use crate::strategy::{
    DEFAULT_DUPLICATION_STRATEGY, DuplicationAction, DuplicationStrategy, ListenerIdentity,
    ListenerInfo,
};

/// The listeners registered for one event type, in firing order.
pub struct EventListenerGroup<L: ?Sized> {
    event_type: &'static str,
    listeners: Vec<Arc<L>>,
    strategies: Vec<Arc<dyn DuplicationStrategy>>,
}

enum Position {
    Front,
    Back,
}

impl<L: ?Sized> std::fmt::Debug for EventListenerGroup<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListenerGroup")
            .field("event_type", &self.event_type)
            .field("listeners", &self.listeners.len())
            .field("strategies", &self.strategies)
            .finish()
    }
}

impl<L: ?Sized + ListenerIdentity + Send + Sync> EventListenerGroup<L> {
    #[must_use]
    pub fn new(event_type: &'static str) -> Self {
        Self {
            event_type,
            listeners: Vec::new(),
            strategies: Vec::new(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn listeners(&self) -> impl Iterator<Item = &Arc<L>> {
        self.listeners.iter()
    }

    /// Register a strategy consulted, in registration order, before the default
    /// same-type-is-an-error rule.
    pub fn add_duplication_strategy(&mut self, strategy: Arc<dyn DuplicationStrategy>) {
        self.strategies.push(strategy);
    }

    /// Remove all listeners and custom strategies.
    pub fn clear(&mut self) {
        self.listeners.clear();
        self.strategies.clear();
    }

    pub fn append_listener(&mut self, listener: Arc<L>) -> Result<()> {
        self.add(listener, None, Position::Back)
    }

    pub fn prepend_listener(&mut self, listener: Arc<L>) -> Result<()> {
        self.add(listener, None, Position::Front)
    }

    pub fn append_listeners(&mut self, listeners: impl IntoIterator<Item = Arc<L>>) -> Result<()> {
        for listener in listeners {
            self.append_listener(listener)?;
        }
        Ok(())
    }

    /// Append using `strategy` ahead of the group's own strategies.
    pub fn append_listener_with(
        &mut self,
        listener: Arc<L>,
        strategy: &dyn DuplicationStrategy,
    ) -> Result<()> {
        self.add(listener, Some(strategy), Position::Back)
    }

    /// Prepend using `strategy` ahead of the group's own strategies.
    pub fn prepend_listener_with(
        &mut self,
        listener: Arc<L>,
        strategy: &dyn DuplicationStrategy,
    ) -> Result<()> {
        self.add(listener, Some(strategy), Position::Front)
    }

    fn info(listener: &Arc<L>) -> ListenerInfo {
        let target: &L = listener;
        ListenerInfo {
            type_id: <L as ListenerIdentity>::listener_type(target),
            type_name: <L as ListenerIdentity>::listener_type_name(target),
            address: Arc::as_ptr(listener).cast::<()>() as usize,
        }
    }

    fn add(
        &mut self,
        listener: Arc<L>,
        per_call: Option<&dyn DuplicationStrategy>,
        position: Position,
    ) -> Result<()> {
        let incoming = Self::info(&listener);
        let strategies = per_call
            .into_iter()
            .chain(self.strategies.iter().map(|s| s.as_ref()))
            .chain(std::iter::once(&DEFAULT_DUPLICATION_STRATEGY as &dyn DuplicationStrategy));

        let mut decision = None;
        'strategies: for strategy in strategies {
            for (index, existing) in self.listeners.iter().enumerate() {
                if strategy.are_match(&incoming, &Self::info(existing)) {
                    decision = Some((index, strategy.action()));
                    break 'strategies;
                }
            }
        }

        match decision {
            Some((_, DuplicationAction::Error)) => {
                Err(Error::EventListenerRegistration(EventListenerRegistrationError {
                    event_type: self.event_type.to_string(),
                    message: format!(
                        "duplicate listener of type {} is not allowed",
                        incoming.type_name
                    ),
                }))
            }
            Some((_, DuplicationAction::KeepOriginal)) => {
                tracing::trace!(
                    event_type = self.event_type,
                    listener = incoming.type_name,
                    "Keeping original listener"
                );
                Ok(())
            }
            Some((index, DuplicationAction::ReplaceOriginal)) => {
                tracing::trace!(
                    event_type = self.event_type,
                    listener = incoming.type_name,
                    position = index,
                    "Replacing listener"
                );
                self.listeners[index] = listener;
                Ok(())
            }
            None => {
                match position {
                    Position::Front => self.listeners.insert(0, listener),
                    Position::Back => self.listeners.push(listener),
                }
                Ok(())
            }
        }
    }

    /// Invoke `action` on every listener in order; the first failure aborts.
    pub fn fire_event_on_each_listener<E: ?Sized>(
        &self,
        event: &E,
        action: impl Fn(&L, &E) -> Result<()>,
    ) -> Result<()> {
        for listener in &self.listeners {
            action(&**listener, event)?;
        }
        Ok(())
    }

    /// Like [`fire_event_on_each_listener`](Self::fire_event_on_each_listener),
    /// but the event is only constructed when there is at least one listener.
    pub fn fire_lazy_event_on_each_listener<E>(
        &self,
        supplier: impl FnOnce() -> E,
        action: impl Fn(&L, &E) -> Result<()>,
    ) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let event = supplier();
        self.fire_event_on_each_listener(&event, action)
    }

    /// Ask every listener whether to veto; all listeners are consulted unless one fails.
    pub fn fire_veto_event_on_each_listener<E>(
        &self,
        supplier: impl FnOnce() -> E,
        action: impl Fn(&L, &E) -> Result<bool>,
    ) -> Result<bool> {
        if self.listeners.is_empty() {
            return Ok(false);
        }
        let event = supplier();
        let mut veto = false;
        for listener in &self.listeners {
            veto |= action(&**listener, &event)?;
        }
        Ok(veto)
    }
}
