//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dormant_core::{Cx, Error, Outcome, Row, Value, types};

use crate::loader::{BoxFuture, CollectionLoader};
use crate::metadata::{CollectionKind, CollectionMetadata};
use crate::middle::SimpleValueMapper;

pub(crate) fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

/// Serves a fixed set of collection rows and counts the calls it receives.
#[derive(Debug, Default)]
pub(crate) struct StaticLoader {
    rows: Vec<Row>,
    loads: AtomicUsize,
    sizes: AtomicUsize,
    index_reads: AtomicUsize,
}

impl StaticLoader {
    pub(crate) fn new(rows: Vec<Row>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            ..Self::default()
        })
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn size_queries(&self) -> usize {
        self.sizes.load(Ordering::SeqCst)
    }

    pub(crate) fn index_reads(&self) -> usize {
        self.index_reads.load(Ordering::SeqCst)
    }
}

impl CollectionLoader for StaticLoader {
    fn load<'a>(
        &'a self,
        _cx: &'a Cx,
        _metadata: &'a CollectionMetadata,
        _key: &'a Value,
    ) -> BoxFuture<'a, Outcome<Vec<Row>, Error>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Outcome::Ok(self.rows.clone())
        })
    }

    fn size<'a>(
        &'a self,
        _cx: &'a Cx,
        _metadata: &'a CollectionMetadata,
        _key: &'a Value,
    ) -> BoxFuture<'a, Outcome<usize, Error>> {
        Box::pin(async move {
            self.sizes.fetch_add(1, Ordering::SeqCst);
            Outcome::Ok(self.rows.len())
        })
    }

    fn element_exists<'a>(
        &'a self,
        _cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        _key: &'a Value,
        element: &'a Value,
    ) -> BoxFuture<'a, Outcome<bool, Error>> {
        Box::pin(async move {
            let exists = self
                .rows
                .iter()
                .any(|row| metadata.element.read(row).is_ok_and(|e| e == *element));
            Outcome::Ok(exists)
        })
    }

    fn element_by_index<'a>(
        &'a self,
        _cx: &'a Cx,
        metadata: &'a CollectionMetadata,
        _key: &'a Value,
        index: &'a Value,
    ) -> BoxFuture<'a, Outcome<Option<Value>, Error>> {
        Box::pin(async move {
            self.index_reads.fetch_add(1, Ordering::SeqCst);
            let Some(index_data) = &metadata.index else {
                return Outcome::Ok(None);
            };
            let ty = index_data.persistent_type();
            let found = self.rows.iter().find_map(|row| {
                let candidate = index_data.read(row).ok()?;
                if ty.is_equal(&candidate, index) {
                    metadata.element.read(row).ok()
                } else {
                    None
                }
            });
            Outcome::Ok(found)
        })
    }
}

fn metadata(
    role: &str,
    table: &str,
    kind: CollectionKind,
    inverse: bool,
    extra_lazy: bool,
) -> Arc<CollectionMetadata> {
    let mut builder = CollectionMetadata::builder(role, "Order", table, "order_id", kind)
        .element(SimpleValueMapper::new("element", types::text()));
    builder = match kind {
        CollectionKind::Set => builder,
        CollectionKind::Map => builder.index(SimpleValueMapper::new("idx", types::text())),
        CollectionKind::List | CollectionKind::Array => {
            builder.index(SimpleValueMapper::new("idx", types::long()))
        }
    };
    if inverse {
        builder = builder.inverse();
    }
    if extra_lazy {
        builder = builder.extra_lazy();
    }
    Arc::new(builder.build().expect("valid collection metadata"))
}

pub(crate) fn set_metadata(inverse: bool, extra_lazy: bool) -> Arc<CollectionMetadata> {
    metadata("Order.tags", "order_tags", CollectionKind::Set, inverse, extra_lazy)
}

pub(crate) fn list_metadata(inverse: bool, extra_lazy: bool) -> Arc<CollectionMetadata> {
    metadata("Order.lines", "order_lines", CollectionKind::List, inverse, extra_lazy)
}

pub(crate) fn array_metadata() -> Arc<CollectionMetadata> {
    metadata("Order.slots", "order_slots", CollectionKind::Array, false, false)
}

pub(crate) fn map_metadata(inverse: bool, extra_lazy: bool) -> Arc<CollectionMetadata> {
    metadata("Order.attributes", "order_attributes", CollectionKind::Map, inverse, extra_lazy)
}

/// `Order.quantities`: a set of `long` elements.
pub(crate) fn long_set_metadata() -> Arc<CollectionMetadata> {
    let builder = CollectionMetadata::builder("Order.quantities", "Order", "order_quantities", "order_id", CollectionKind::Set)
        .element(SimpleValueMapper::new("element", types::long()));
    Arc::new(builder.build().expect("valid collection metadata"))
}

/// `Order.notes`: text elements keyed by a `long` line number.
pub(crate) fn long_keyed_map_metadata() -> Arc<CollectionMetadata> {
    let builder = CollectionMetadata::builder("Order.notes", "Order", "order_notes", "order_id", CollectionKind::Map)
        .element(SimpleValueMapper::new("element", types::text()))
        .index(SimpleValueMapper::new("idx", types::long()));
    Arc::new(builder.build().expect("valid collection metadata"))
}

/// Rows of a set: one `element` column.
pub(crate) fn single_column_rows(elements: &[&str]) -> Vec<Row> {
    elements
        .iter()
        .map(|e| Row::new(vec!["element".into()], vec![Value::Text((*e).to_string())]))
        .collect()
}

/// Rows of a list or array: `idx`, `element`.
pub(crate) fn indexed_rows(entries: &[(i64, &str)]) -> Vec<Row> {
    entries
        .iter()
        .map(|(i, e)| {
            Row::new(
                vec!["idx".into(), "element".into()],
                vec![Value::BigInt(*i), Value::Text((*e).to_string())],
            )
        })
        .collect()
}

/// Rows of a map: `idx` (the key), `element`.
pub(crate) fn keyed_rows(entries: &[(&str, &str)]) -> Vec<Row> {
    entries
        .iter()
        .map(|(k, e)| {
            Row::new(
                vec!["idx".into(), "element".into()],
                vec![Value::Text((*k).to_string()), Value::Text((*e).to_string())],
            )
        })
        .collect()
}
