//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use dormant_collection::{CollectionKind, CollectionMetadata, SimpleValueMapper};
use dormant_core::error::{QueryError, QueryErrorKind};
use dormant_core::{
    Connection, Cx, Dialect, EntityMetadata, Error, IdentifierPart, Model, ModelPart, Outcome, Result, Row,
    Value, types,
};

pub(crate) fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

pub(crate) fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => std::panic::panic_any(format!("expected an error, got {other:?}")),
    }
}

#[derive(Debug)]
pub(crate) struct MockState {
    /// Every statement sent, in order.
    pub(crate) statements: Vec<(String, Vec<Value>)>,
    /// Rows returned by the first pattern contained in a query's SQL.
    pub(crate) rows: Vec<(String, Vec<Row>)>,
    /// Affected-row counts handed out to `execute`, then 1.
    pub(crate) affected: VecDeque<u64>,
    /// Statements containing this text fail with a constraint violation.
    pub(crate) fail_matching: Option<String>,
    pub(crate) auto_commit: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
            rows: Vec::new(),
            affected: VecDeque::new(),
            fail_matching: None,
            auto_commit: true,
        }
    }
}

impl MockState {
    fn record(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match &self.fail_matching {
            Some(pattern) if sql.contains(pattern.as_str()) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                sqlstate: Some("23505".into()),
                message: "duplicate key value violates unique constraint \"orders_number_key\"".into(),
                constraint: None,
                source: None,
            })),
            _ => Ok(()),
        }
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        self.rows
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

/// Records statements and answers queries from canned rows.
#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    pub(crate) state: Arc<Mutex<MockState>>,
    dialect: Dialect,
}

impl MockConnection {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            dialect,
        }
    }

    pub(crate) fn respond(&self, pattern: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .rows
            .push((pattern.to_string(), rows));
    }

    pub(crate) fn affect(&self, count: u64) {
        self.state.lock().expect("lock poisoned").affected.push_back(count);
    }

    pub(crate) fn fail_matching(&self, pattern: &str) {
        self.state.lock().expect("lock poisoned").fail_matching = Some(pattern.to_string());
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("lock poisoned")
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub(crate) fn params(&self, index: usize) -> Vec<Value> {
        self.state.lock().expect("lock poisoned").statements[index].1.clone()
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, _cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if let Err(e) = guard.record(&sql, &params) {
                return Outcome::Err(e);
            }
            Outcome::Ok(guard.rows_for(&sql))
        }
    }

    fn execute(&self, _cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if let Err(e) = guard.record(&sql, &params) {
                return Outcome::Err(e);
            }
            Outcome::Ok(guard.affected.pop_front().unwrap_or(1))
        }
    }

    fn execute_returning_keys(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
        _key_columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            if let Err(e) = guard.record(&sql, &params) {
                return Outcome::Err(e);
            }
            Outcome::Ok(guard.rows_for(&sql))
        }
    }

    fn auto_commit(&self) -> bool {
        self.state.lock().expect("lock poisoned").auto_commit
    }

    fn set_auto_commit(&self, _cx: &Cx, enabled: bool) -> impl Future<Output = Outcome<(), Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.lock().expect("lock poisoned").auto_commit = enabled;
            Outcome::Ok(())
        }
    }
}

/// `Order { id, number, total, version }` with an assigned identifier.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Order {
    pub(crate) id: i64,
    pub(crate) number: String,
    pub(crate) total: String,
    pub(crate) version: i64,
}

impl Model for Order {
    const ENTITY_NAME: &'static str = "Order";

    fn metadata() -> Result<EntityMetadata> {
        EntityMetadata::builder("Order", "orders", IdentifierPart::assigned("id", "id", types::long()))
            .property(ModelPart::new("number", "number", types::text()).natural_id())
            .property(ModelPart::new("total", "total", types::decimal()))
            .property(ModelPart::new("version", "version", types::long()).version())
            .collection("Order.tags")
            .build()
    }

    fn identifier(&self) -> Value {
        Value::BigInt(self.id)
    }

    fn state(&self) -> Vec<Value> {
        vec![
            Value::Text(self.number.clone()),
            Value::Decimal(self.total.clone()),
            Value::BigInt(self.version),
        ]
    }

    fn from_state(identifier: Value, state: Vec<Value>) -> Result<Self> {
        let mut values = state.into_iter();
        Ok(Self {
            id: i64::try_from(identifier)?,
            number: values.next().map(String::try_from).transpose()?.unwrap_or_default(),
            total: match values.next() {
                Some(Value::Decimal(d)) | Some(Value::Text(d)) => d,
                _ => String::new(),
            },
            version: values.next().map(i64::try_from).transpose()?.unwrap_or_default(),
        })
    }
}

/// `Line { id, order_id, sku }` with an identity identifier, referencing `Order`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub(crate) id: Option<i64>,
    pub(crate) order_id: i64,
    pub(crate) sku: String,
}

impl Model for Line {
    const ENTITY_NAME: &'static str = "Line";

    fn metadata() -> Result<EntityMetadata> {
        EntityMetadata::builder("Line", "lines", IdentifierPart::identity("id", "id", types::long()))
            .property(ModelPart::new("order", "order_id", types::long()).references("Order"))
            .property(ModelPart::new("sku", "sku", types::text()))
            .build()
    }

    fn identifier(&self) -> Value {
        self.id.map_or(Value::Null, Value::BigInt)
    }

    fn state(&self) -> Vec<Value> {
        vec![Value::BigInt(self.order_id), Value::Text(self.sku.clone())]
    }

    fn from_state(identifier: Value, state: Vec<Value>) -> Result<Self> {
        let mut values = state.into_iter();
        Ok(Self {
            id: Option::<i64>::try_from(identifier)?,
            order_id: values.next().map(i64::try_from).transpose()?.unwrap_or_default(),
            sku: values.next().map(String::try_from).transpose()?.unwrap_or_default(),
        })
    }
}

pub(crate) fn order_row(id: i64, number: &str, total: &str, version: i64) -> Row {
    Row::new(
        vec!["id".into(), "number".into(), "total".into(), "version".into()],
        vec![
            Value::BigInt(id),
            Value::Text(number.into()),
            Value::Decimal(total.into()),
            Value::BigInt(version),
        ],
    )
}

/// `Order.tags`: a set of text tags in `order_tags`.
pub(crate) fn tags_metadata() -> CollectionMetadata {
    CollectionMetadata::builder("Order.tags", "Order", "order_tags", "order_id", CollectionKind::Set)
        .element(SimpleValueMapper::new("tag", types::text()))
        .build()
        .expect("tags metadata")
}

/// `Order.items`: a list of SKUs in `order_items`, indexed by `position`.
pub(crate) fn items_metadata() -> CollectionMetadata {
    CollectionMetadata::builder("Order.items", "Order", "order_items", "order_id", CollectionKind::List)
        .element(SimpleValueMapper::new("sku", types::text()))
        .index(SimpleValueMapper::new("position", types::long()))
        .build()
        .expect("items metadata")
}

/// Hands out clones of one mock connection and counts releases.
#[derive(Debug)]
pub(crate) struct MockProvider {
    pub(crate) connection: MockConnection,
    pub(crate) acquired: std::sync::atomic::AtomicUsize,
    pub(crate) released: std::sync::atomic::AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new(connection: MockConnection) -> Self {
        Self {
            connection,
            acquired: std::sync::atomic::AtomicUsize::new(0),
            released: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl dormant_core::ConnectionProvider for MockProvider {
    type Connection = MockConnection;

    fn acquire(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, Error>> + Send {
        self.acquired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let connection = self.connection.clone();
        async move { Outcome::Ok(connection) }
    }

    fn release(&self, _connection: MockConnection) {
        self.released.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
