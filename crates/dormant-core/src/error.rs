//! Error types for dormant operations.

use std::fmt;

/// The primary error type for all dormant operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction state machine errors
    Transaction(TransactionError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration and mapping errors, raised while building a session factory
    Config(ConfigError),
    /// Optimistic lock failure: a versioned row was changed or deleted concurrently
    StaleState(StaleStateError),
    /// A lazy collection could not be initialized (no session, session closed, re-entry)
    LazyInitialization(LazyInitializationError),
    /// The operation is not supported for this collection shape
    UnsupportedOperation(String),
    /// A listener could not be registered on an event listener group
    EventListenerRegistration(EventListenerRegistrationError),
    /// The database did not return the generated values a mutation promised
    GeneratedValues(GeneratedValuesError),
    /// A primary error with secondary failures that were raised while handling it
    Suppressed(SuppressedError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection could not be acquired from a provider
    Acquire,
    /// Connection could not be released back to its provider
    Release,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub constraint: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null, check)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// A pessimistic lock could not be acquired in time
    LockTimeout,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// No transaction is active
    NotActive,
    /// A transaction is already active on this coordinator
    AlreadyActive,
    /// The transaction was rolled back instead of committed
    RolledBack,
    /// The commit statement itself failed
    FailedCommit,
    /// A before-completion observer failed
    BeforeCompletion,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool exhausted (no available connections)
    Exhausted,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct StaleStateError {
    pub entity: String,
    pub identifier: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LazyInitializationError {
    pub role: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EventListenerRegistrationError {
    pub event_type: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedValuesError {
    pub entity: String,
    pub message: String,
}

#[derive(Debug)]
pub struct SuppressedError {
    pub primary: Box<Error>,
    pub suppressed: Vec<Error>,
}

impl Error {
    /// Is this a retryable error (deadlock, serialization, lock timeout, optimistic failure)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock
                    | QueryErrorKind::Serialization
                    | QueryErrorKind::LockTimeout
                    | QueryErrorKind::Timeout
            ),
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            Error::StaleState(_) | Error::Timeout => true,
            Error::Suppressed(s) => s.primary.is_retryable(),
            _ => false,
        }
    }

    /// Is this an optimistic lock conflict?
    pub fn is_stale_state(&self) -> bool {
        match self {
            Error::StaleState(_) => true,
            Error::Suppressed(s) => s.primary.is_stale_state(),
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::Suppressed(s) => s.primary.sqlstate(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Suppressed(s) => s.primary.sql(),
            _ => None,
        }
    }

    /// Errors raised while handling this one (e.g. a failed rollback after failed work).
    pub fn suppressed(&self) -> &[Error] {
        match self {
            Error::Suppressed(s) => &s.suppressed,
            _ => &[],
        }
    }

    /// Attach a secondary failure to this error, keeping `self` as the primary cause.
    #[must_use]
    pub fn with_suppressed(self, other: Error) -> Error {
        match self {
            Error::Suppressed(mut s) => {
                s.suppressed.push(other);
                Error::Suppressed(s)
            }
            primary => Error::Suppressed(SuppressedError {
                primary: Box::new(primary),
                suppressed: vec![other],
            }),
        }
    }

    /// The primary error, unwrapping any suppressed-error chain.
    pub fn primary(&self) -> &Error {
        match self {
            Error::Suppressed(s) => s.primary.primary(),
            other => other,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    pub fn lazy_initialization(role: Option<&str>, message: impl Into<String>) -> Self {
        Error::LazyInitialization(LazyInitializationError {
            role: role.map(str::to_string),
            message: message.into(),
        })
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedOperation(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: None,
            sqlstate: None,
            message: message.into(),
            constraint: None,
            source: None,
        })
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::StaleState(e) => write!(f, "{e}"),
            Error::LazyInitialization(e) => write!(f, "{e}"),
            Error::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {msg}"),
            Error::EventListenerRegistration(e) => write!(f, "{e}"),
            Error::GeneratedValues(e) => write!(f, "{e}"),
            Error::Suppressed(e) => write!(
                f,
                "{} ({} suppressed)",
                e.primary,
                e.suppressed.len()
            ),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Suppressed(e) => Some(e.primary.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StaleStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Row was updated or deleted by another transaction [{}#{}]: {}",
            self.entity, self.identifier, self.message
        )
    }
}

impl fmt::Display for LazyInitializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            Some(role) => write!(
                f,
                "failed to lazily initialize a collection of role: {role}: {}",
                self.message
            ),
            None => write!(f, "failed to lazily initialize a collection: {}", self.message),
        }
    }
}

impl fmt::Display for EventListenerRegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event listener registration failed for {}: {}",
            self.event_type, self.message
        )
    }
}

impl fmt::Display for GeneratedValuesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.message, self.entity)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<StaleStateError> for Error {
    fn from(err: StaleStateError) -> Self {
        Error::StaleState(err)
    }
}

impl From<EventListenerRegistrationError> for Error {
    fn from(err: EventListenerRegistrationError) -> Self {
        Error::EventListenerRegistration(err)
    }
}

impl From<GeneratedValuesError> for Error {
    fn from(err: GeneratedValuesError) -> Self {
        Error::GeneratedValues(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for dormant operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            sqlstate: Some("23505".to_string()),
            message: "unique violation".to_string(),
            constraint: None,
            source: None,
        };

        assert!(query.is_unique_violation());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn stale_state_is_retryable() {
        let err = Error::StaleState(StaleStateError {
            entity: "Order".to_string(),
            identifier: "7".to_string(),
            message: "version 3 no longer current".to_string(),
        });
        assert!(err.is_retryable());
        assert!(err.is_stale_state());
        assert!(err.to_string().contains("Order#7"));
    }

    #[test]
    fn suppressed_chain_keeps_primary() {
        let primary = Error::Custom("work failed".to_string());
        let err = primary
            .with_suppressed(Error::Custom("rollback failed".to_string()))
            .with_suppressed(Error::Custom("reset failed".to_string()));

        assert_eq!(err.suppressed().len(), 2);
        assert!(matches!(err.primary(), Error::Custom(msg) if msg == "work failed"));
        assert_eq!(err.to_string(), "work failed (2 suppressed)");

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("work failed"));
    }

    #[test]
    fn lazy_initialization_message_names_role() {
        let err = Error::lazy_initialization(Some("Order.lines"), "no session");
        assert_eq!(
            err.to_string(),
            "failed to lazily initialize a collection of role: Order.lines: no session"
        );
    }
}
