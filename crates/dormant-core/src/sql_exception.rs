//! Translation of driver errors into the normalized error family.
//!
//! Drivers report failures with a SQLSTATE and a vendor message. Before such
//! an error reaches application code it passes through [`SqlExceptionHelper`],
//! which classifies it by SQLSTATE class (with per-dialect overrides), records
//! the statement text and extracts the violated constraint name when the
//! message carries one.

use std::sync::OnceLock;

use regex::Regex;

use crate::dialect::Dialect;
use crate::error::{Error, QueryError, QueryErrorKind};

fn constraint_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // postgres: violates unique constraint "orders_number_key"
            r#"constraint\s+"([^"]+)""#,
            // mysql: Duplicate entry 'x' for key 'orders.number_uk'
            r"for key '([^']+)'",
            // mysql foreign keys: CONSTRAINT `fk_x` FOREIGN KEY
            r"CONSTRAINT `([^`]+)`",
            // sqlite: UNIQUE constraint failed: orders.number
            r"constraint failed: ([\w.]+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Dialect-aware converter from raw driver errors to [`Error`].
#[derive(Debug, Clone, Copy)]
pub struct SqlExceptionHelper {
    dialect: Dialect,
}

impl SqlExceptionHelper {
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Classify a SQLSTATE into a query error kind.
    pub fn classify(&self, sqlstate: &str) -> QueryErrorKind {
        match (self.dialect, sqlstate) {
            (Dialect::Postgres, "40P01") => return QueryErrorKind::Deadlock,
            (Dialect::Postgres, "55P03") => return QueryErrorKind::LockTimeout,
            (Dialect::Postgres, "57014") => return QueryErrorKind::Timeout,
            (Dialect::Mysql, "40001") => return QueryErrorKind::Deadlock,
            (Dialect::Mysql, "HY000") => return QueryErrorKind::LockTimeout,
            (Dialect::Sqlite, "SQLITE_BUSY") => return QueryErrorKind::LockTimeout,
            _ => {}
        }
        match sqlstate.get(..2) {
            Some("23") => QueryErrorKind::Constraint,
            Some("40") => QueryErrorKind::Serialization,
            Some("42") => QueryErrorKind::Syntax,
            Some("22") => QueryErrorKind::DataTruncation,
            Some("28") => QueryErrorKind::Permission,
            _ => QueryErrorKind::Database,
        }
    }

    /// Extract a constraint name from a vendor message.
    pub fn constraint_name(&self, message: &str) -> Option<String> {
        constraint_patterns()
            .iter()
            .find_map(|re| re.captures(message))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Normalize an error raised while executing `sql`.
    ///
    /// Query errors are reclassified and annotated; every other error passes
    /// through unchanged.
    pub fn convert(&self, err: Error, context: &str, sql: &str) -> Error {
        match err {
            Error::Query(q) => {
                let kind = q
                    .sqlstate
                    .as_deref()
                    .map_or(q.kind, |state| self.classify(state));
                let constraint = q.constraint.or_else(|| {
                    if kind == QueryErrorKind::Constraint {
                        self.constraint_name(&q.message)
                    } else {
                        None
                    }
                });
                tracing::debug!(
                    dialect = self.dialect.name(),
                    sqlstate = q.sqlstate.as_deref().unwrap_or(""),
                    kind = ?kind,
                    context = context,
                    "Converted SQL error"
                );
                Error::Query(QueryError {
                    kind,
                    sql: q.sql.or_else(|| Some(sql.to_string())),
                    sqlstate: q.sqlstate,
                    message: format!("{context}: {}", q.message),
                    constraint,
                    source: q.source,
                })
            }
            other => other,
        }
    }
}
