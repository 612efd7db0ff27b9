//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dormant::error::{QueryError, QueryErrorKind};
use dormant::prelude::*;

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[derive(Debug)]
struct Recorded {
    statements: Vec<(String, Vec<Value>)>,
    rows: Vec<(String, Vec<Row>)>,
    affected: VecDeque<u64>,
    fail_matching: Option<String>,
    auto_commit: bool,
}

/// Records every statement; clones share one log.
#[derive(Debug, Clone)]
pub struct RecordingConnection {
    state: Arc<Mutex<Recorded>>,
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(Recorded {
                statements: Vec::new(),
                rows: Vec::new(),
                affected: VecDeque::new(),
                fail_matching: None,
                auto_commit: true,
            })),
        }
    }
}

impl RecordingConnection {
    /// Queries whose SQL contains `pattern` return `rows`.
    pub fn respond(&self, pattern: &str, rows: Vec<Row>) {
        self.state.lock().unwrap().rows.push((pattern.to_string(), rows));
    }

    /// The next `execute` reports `count` affected rows; later ones report 1.
    pub fn affect(&self, count: u64) {
        self.state.lock().unwrap().affected.push_back(count);
    }

    pub fn fail_matching(&self, pattern: &str) {
        self.state.lock().unwrap().fail_matching = Some(pattern.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Statements containing `pattern`, rendered with their parameters.
    pub fn rendered(&self, pattern: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .map(|(sql, params)| format!("{sql} {params:?}"))
            .collect()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push((sql.to_string(), params.to_vec()));
        match &state.fail_matching {
            Some(pattern) if sql.contains(pattern.as_str()) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                sqlstate: Some("40001".into()),
                message: "could not serialize access".into(),
                constraint: None,
                source: None,
            })),
            _ => Ok(()),
        }
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(&self, _cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let outcome = match self.record(sql, params) {
            Ok(()) => Outcome::Ok(self.rows_for(sql)),
            Err(e) => Outcome::Err(e),
        };
        async move { outcome }
    }

    fn execute(&self, _cx: &Cx, sql: &str, params: &[Value]) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let outcome = match self.record(sql, params) {
            Ok(()) => Outcome::Ok(self.state.lock().unwrap().affected.pop_front().unwrap_or(1)),
            Err(e) => Outcome::Err(e),
        };
        async move { outcome }
    }

    fn execute_returning_keys(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        _key_columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.query(cx, sql, params)
    }

    fn auto_commit(&self) -> bool {
        self.state.lock().unwrap().auto_commit
    }

    fn set_auto_commit(&self, _cx: &Cx, enabled: bool) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.state.lock().unwrap().auto_commit = enabled;
        async { Outcome::Ok(()) }
    }
}

/// Opens clones of one recording connection.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    pub connection: RecordingConnection,
    pub opened: AtomicUsize,
}

impl RecordingFactory {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for RecordingFactory {
    type Connection = RecordingConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<RecordingConnection, Error>> + Send {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let connection = self.connection.clone();
        async move { Outcome::Ok(connection) }
    }
}

/// `Order { id, number, version }`, versioned, owning `Order.tags`.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub number: String,
    pub version: i64,
}

impl Order {
    pub fn new(id: i64, number: &str) -> Self {
        Self {
            id,
            number: number.to_string(),
            version: 0,
        }
    }
}

impl Model for Order {
    const ENTITY_NAME: &'static str = "Order";

    fn metadata() -> Result<EntityMetadata> {
        EntityMetadata::builder("Order", "orders", IdentifierPart::assigned("id", "id", types::long()))
            .property(ModelPart::new("number", "number", types::text()))
            .property(ModelPart::new("version", "version", types::long()).version())
            .collection("Order.tags")
            .build()
    }

    fn identifier(&self) -> Value {
        Value::BigInt(self.id)
    }

    fn state(&self) -> Vec<Value> {
        vec![Value::Text(self.number.clone()), Value::BigInt(self.version)]
    }

    fn from_state(identifier: Value, state: Vec<Value>) -> Result<Self> {
        let mut values = state.into_iter();
        Ok(Self {
            id: i64::try_from(identifier)?,
            number: values.next().map(String::try_from).transpose()?.unwrap_or_default(),
            version: values.next().map(i64::try_from).transpose()?.unwrap_or_default(),
        })
    }
}

pub fn order_row(id: i64, number: &str, version: i64) -> Row {
    Row::new(
        vec!["id".into(), "number".into(), "version".into()],
        vec![Value::BigInt(id), Value::Text(number.into()), Value::BigInt(version)],
    )
}

pub fn tag_rows(tags: &[&str]) -> Vec<Row> {
    tags.iter()
        .map(|tag| Row::new(vec!["tag".into()], vec![Value::Text((*tag).into())]))
        .collect()
}

/// `Order.tags`, optionally mapped as the inverse side.
pub fn tags_metadata(inverse: bool) -> CollectionMetadata {
    let builder = CollectionMetadata::builder("Order.tags", "Order", "order_tags", "order_id", CollectionKind::Set)
        .element(SimpleValueMapper::new("tag", types::text()));
    let builder = if inverse { builder.inverse() } else { builder };
    builder.build().unwrap()
}

pub fn session_factory(config: SessionConfig, inverse_tags: bool) -> SessionFactory {
    SessionFactory::builder()
        .dialect(Dialect::Postgres)
        .config(config)
        .entity::<Order>()
        .collection(tags_metadata(inverse_tags))
        .build()
        .unwrap()
}
