//! Event types and the registry holding one listener group per type.

use std::fmt;
use std::sync::Arc;

use dormant_core::Result;

use crate::events::{
    CollectionEventListener, FlushEventListener, InitializeCollectionEventListener,
    PostDeleteEventListener, PostInsertEventListener, PostUpdateEventListener,
    PreDeleteEventListener, PreInsertEventListener, PreUpdateEventListener,
};
use crate::group::EventListenerGroup;
use crate::strategy::ListenerIdentity;

/// A typed key selecting one listener group of an [`EventListenerRegistry`].
pub struct EventType<L: ?Sized> {
    name: &'static str,
    ordinal: usize,
    group: fn(&EventListenerRegistry) -> &EventListenerGroup<L>,
    group_mut: fn(&mut EventListenerRegistry) -> &mut EventListenerGroup<L>,
}

impl<L: ?Sized> Clone for EventType<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: ?Sized> Copy for EventType<L> {}

impl<L: ?Sized> fmt::Debug for EventType<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self.name)
    }
}

impl<L: ?Sized> EventType<L> {
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }
}

macro_rules! event_types {
    ($( $konst:ident, $field:ident, $name:literal, $ordinal:literal, $listener:ty; )*) => {
        $(
            pub const $konst: EventType<$listener> = EventType {
                name: $name,
                ordinal: $ordinal,
                group: |r| &r.$field,
                group_mut: |r| &mut r.$field,
            };
        )*

        /// Names of all event types, by ordinal.
        pub const EVENT_TYPE_NAMES: &[&str] = &[$($name),*];

        /// One listener group per event type.
        pub struct EventListenerRegistry {
            $( $field: EventListenerGroup<$listener>, )*
        }

        impl EventListenerRegistry {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    $( $field: EventListenerGroup::new($name), )*
                }
            }

            /// Total number of registered listeners across all groups.
            pub fn listener_count(&self) -> usize {
                0 $( + self.$field.count() )*
            }
        }

        impl fmt::Debug for EventListenerRegistry {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct("EventListenerRegistry")
                    $( .field(stringify!($field), &self.$field.count()) )*
                    .finish()
            }
        }
    };
}

event_types! {
    PRE_INSERT, pre_insert, "pre-insert", 0, dyn PreInsertEventListener;
    POST_INSERT, post_insert, "post-insert", 1, dyn PostInsertEventListener;
    PRE_UPDATE, pre_update, "pre-update", 2, dyn PreUpdateEventListener;
    POST_UPDATE, post_update, "post-update", 3, dyn PostUpdateEventListener;
    PRE_DELETE, pre_delete, "pre-delete", 4, dyn PreDeleteEventListener;
    POST_DELETE, post_delete, "post-delete", 5, dyn PostDeleteEventListener;
    PRE_COLLECTION_RECREATE, pre_collection_recreate, "pre-collection-recreate", 6, dyn CollectionEventListener;
    POST_COLLECTION_RECREATE, post_collection_recreate, "post-collection-recreate", 7, dyn CollectionEventListener;
    PRE_COLLECTION_UPDATE, pre_collection_update, "pre-collection-update", 8, dyn CollectionEventListener;
    POST_COLLECTION_UPDATE, post_collection_update, "post-collection-update", 9, dyn CollectionEventListener;
    PRE_COLLECTION_REMOVE, pre_collection_remove, "pre-collection-remove", 10, dyn CollectionEventListener;
    POST_COLLECTION_REMOVE, post_collection_remove, "post-collection-remove", 11, dyn CollectionEventListener;
    INIT_COLLECTION, init_collection, "init-collection", 12, dyn InitializeCollectionEventListener;
    FLUSH, flush, "flush", 13, dyn FlushEventListener;
}

impl Default for EventListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListenerRegistry {
    pub fn event_listener_group<L>(&self, event_type: EventType<L>) -> &EventListenerGroup<L>
    where
        L: ?Sized + ListenerIdentity + Send + Sync,
    {
        (event_type.group)(self)
    }

    pub fn event_listener_group_mut<L>(
        &mut self,
        event_type: EventType<L>,
    ) -> &mut EventListenerGroup<L>
    where
        L: ?Sized + ListenerIdentity + Send + Sync,
    {
        (event_type.group_mut)(self)
    }

    pub fn append_listener<L>(&mut self, event_type: EventType<L>, listener: Arc<L>) -> Result<()>
    where
        L: ?Sized + ListenerIdentity + Send + Sync,
    {
        self.event_listener_group_mut(event_type)
            .append_listener(listener)
    }

    pub fn prepend_listener<L>(&mut self, event_type: EventType<L>, listener: Arc<L>) -> Result<()>
    where
        L: ?Sized + ListenerIdentity + Send + Sync,
    {
        self.event_listener_group_mut(event_type)
            .prepend_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectionAction, CollectionEvent, PreInsertEvent};
    use dormant_core::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl CollectionEventListener for Counting {
        fn on_collection_event(&self, _event: &CollectionEvent<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct VetoAll;

    impl PreInsertEventListener for VetoAll {
        fn on_pre_insert(&self, _event: &PreInsertEvent<'_>) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn ordinals_match_names() {
        assert_eq!(EVENT_TYPE_NAMES.len(), 14);
        assert_eq!(EVENT_TYPE_NAMES[PRE_COLLECTION_UPDATE.ordinal()], "pre-collection-update");
        assert_eq!(FLUSH.name(), "flush");
    }

    #[test]
    fn groups_sharing_a_listener_trait_are_separate() {
        let mut registry = EventListenerRegistry::new();
        let counter = Arc::new(Counting::default());
        registry
            .append_listener(PRE_COLLECTION_UPDATE, counter.clone() as Arc<dyn CollectionEventListener>)
            .unwrap();
        assert_eq!(registry.event_listener_group(PRE_COLLECTION_UPDATE).count(), 1);
        assert!(registry.event_listener_group(POST_COLLECTION_UPDATE).is_empty());

        let owner = Value::BigInt(1);
        registry
            .event_listener_group(PRE_COLLECTION_UPDATE)
            .fire_lazy_event_on_each_listener(
                || CollectionEvent {
                    action: CollectionAction::Update,
                    role: "Order.lines",
                    owner_entity: "Order",
                    owner_id: &owner,
                },
                |l, e| l.on_collection_event(e),
            )
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(), 1);
    }

    #[test]
    fn veto_through_registry() {
        let mut registry = EventListenerRegistry::new();
        registry
            .append_listener(PRE_INSERT, Arc::new(VetoAll) as Arc<dyn PreInsertEventListener>)
            .unwrap();
        let id = Value::Null;
        let vetoed = registry
            .event_listener_group(PRE_INSERT)
            .fire_veto_event_on_each_listener(
                || PreInsertEvent {
                    entity_name: "Order",
                    id: &id,
                    state: &[],
                },
                |l, e| l.on_pre_insert(e),
            )
            .unwrap();
        assert!(vetoed);
    }
}
