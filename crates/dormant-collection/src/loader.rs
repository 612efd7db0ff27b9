//! The link from a collection back to the session that loads it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dormant_core::{Cx, Error, Outcome, Row, Value};

use crate::metadata::CollectionMetadata;

/// Boxed future returned by [`CollectionLoader`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Database reads on behalf of lazy collections.
///
/// Implemented by the session; collections hold it behind a [`SessionLink`]
/// so they can load themselves without borrowing the session.
pub trait CollectionLoader: Send + Sync {
    /// All rows of the collection owned by `key`, columns laid out as
    /// [`CollectionMetadata::selected_columns`].
    fn load<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>>;

    fn size<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
    ) -> BoxFuture<'a, Outcome<usize, Error>>;

    fn element_exists<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
        element: &'a Value,
    ) -> BoxFuture<'a, Outcome<bool, Error>>;

    /// The element stored at `index` (a list position or map key).
    fn element_by_index<'a>(
        &'a self,
        cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        key: &'a Value,
        index: &'a Value,
    ) -> BoxFuture<'a, Outcome<Option<Value>, Error>>;
}

struct LinkInner {
    open: AtomicBool,
    operation_queue: bool,
    loader: Arc<dyn CollectionLoader>,
}

/// Shared handle to an owning session. Closing the session closes every link.
#[derive(Clone)]
pub struct SessionLink {
    inner: Arc<LinkInner>,
}

impl SessionLink {
    pub fn new(loader: Arc<dyn CollectionLoader>) -> Self {
        Self::with_operation_queue(loader, true)
    }

    /// `operation_queue` allows inverse and extra-lazy collections to record
    /// mutations instead of loading.
    pub fn with_operation_queue(loader: Arc<dyn CollectionLoader>, operation_queue: bool) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                open: AtomicBool::new(true),
                operation_queue,
                loader,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    pub fn operation_queue(&self) -> bool {
        self.inner.operation_queue
    }

    pub fn loader(&self) -> &Arc<dyn CollectionLoader> {
        &self.inner.loader
    }

    pub fn same_session(&self, other: &SessionLink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLink")
            .field("open", &self.is_open())
            .field("operation_queue", &self.inner.operation_queue)
            .finish_non_exhaustive()
    }
}
