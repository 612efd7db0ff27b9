//! Collection loading on behalf of a session.

use std::sync::Arc;

use dormant_collection::{BoxFuture, CollectionLoader, CollectionMetadata};
use dormant_core::{Connection, Cx, Error, Outcome, Row, Value, try_outcome, try_result};
use dormant_event::{INIT_COLLECTION, InitializeCollectionEvent};

use crate::factory::SessionFactory;

/// Reads collection rows through the session's connection and the factory's
/// collection persisters.
pub(crate) struct SessionCollectionLoader<C> {
    connection: Arc<C>,
    factory: SessionFactory,
}

impl<C> SessionCollectionLoader<C> {
    pub(crate) fn new(connection: Arc<C>, factory: SessionFactory) -> Self {
        Self { connection, factory }
    }
}

impl<C: Connection + 'static> CollectionLoader for SessionCollectionLoader<C> {
    fn load<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>> {
        Box::pin(async move {
            let persister = try_result!(self.factory.collection_persister(&metadata.role));
            let rows = try_outcome!(persister.load(cx, &*self.connection, key).await);
            self.factory.statistics().collection_loaded();
            try_result!(self
                .factory
                .listeners()
                .event_listener_group(INIT_COLLECTION)
                .fire_lazy_event_on_each_listener(
                    || InitializeCollectionEvent {
                        role: &metadata.role,
                        owner_id: key,
                        element_count: rows.len(),
                    },
                    |l, e| l.on_initialize_collection(e),
                ));
            Outcome::Ok(rows)
        })
    }

    fn size<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
    ) -> BoxFuture<'a, Outcome<usize, Error>> {
        Box::pin(async move {
            let persister = try_result!(self.factory.collection_persister(&metadata.role));
            persister.count(cx, &*self.connection, key).await
        })
    }

    fn element_exists<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
        element: &'a Value,
    ) -> BoxFuture<'a, Outcome<bool, Error>> {
        Box::pin(async move {
            let persister = try_result!(self.factory.collection_persister(&metadata.role));
            persister.element_exists(cx, &*self.connection, key, element).await
        })
    }

    fn element_by_index<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
        index: &'a Value,
    ) -> BoxFuture<'a, Outcome<Option<Value>, Error>> {
        Box::pin(async move {
            let persister = try_result!(self.factory.collection_persister(&metadata.role));
            persister.element_by_index(cx, &*self.connection, key, index).await
        })
    }
}
