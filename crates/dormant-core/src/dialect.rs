//! SQL dialect capabilities.
//!
//! A [`Dialect`] answers the questions the persisters and the generated-values
//! machinery ask while rendering statements: placeholder syntax, identifier
//! quoting, whether `RETURNING` is available for a mutation kind, and how
//! pessimistic lock clauses are spelled.

use serde::{Deserialize, Serialize};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

/// The kind of mutation a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// Pessimistic lock strength requested for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Plain read, no row lock.
    #[default]
    None,
    /// Shared row lock (`FOR SHARE`).
    PessimisticRead,
    /// Exclusive row lock (`FOR UPDATE`).
    PessimisticWrite,
}

/// What to do when a requested row lock is held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    #[default]
    Wait,
    NoWait,
    SkipLocked,
}

/// Lock options for a pessimistic read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockOptions {
    pub mode: LockMode,
    pub wait: LockWait,
}

impl LockOptions {
    #[must_use]
    pub const fn new(mode: LockMode) -> Self {
        Self {
            mode,
            wait: LockWait::Wait,
        }
    }

    #[must_use]
    pub const fn nowait(mut self) -> Self {
        self.wait = LockWait::NoWait;
        self
    }

    #[must_use]
    pub const fn skip_locked(mut self) -> Self {
        self.wait = LockWait::SkipLocked;
        self
    }
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are escaped by doubling them.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }

    /// Whether `INSERT ... RETURNING` / `UPDATE ... RETURNING` can read back columns.
    pub const fn supports_returning(self, kind: MutationKind) -> bool {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                matches!(kind, MutationKind::Insert | MutationKind::Update)
            }
            Dialect::Mysql => false,
        }
    }

    /// Whether the driver can hand back generated keys after a plain insert.
    pub const fn supports_get_generated_keys(self) -> bool {
        true
    }

    /// Whether `WITH name AS (...)` common table expressions are available.
    pub const fn supports_cte(self) -> bool {
        true
    }

    /// The clause appended to a select to take a row lock, if the dialect has one.
    pub fn lock_clause(self, options: LockOptions) -> Option<String> {
        let base = match (self, options.mode) {
            (_, LockMode::None) | (Dialect::Sqlite, _) => return None,
            (_, LockMode::PessimisticWrite) => "FOR UPDATE",
            (_, LockMode::PessimisticRead) => "FOR SHARE",
        };
        let wait = match options.wait {
            LockWait::Wait => "",
            LockWait::NoWait => " NOWAIT",
            LockWait::SkipLocked => " SKIP LOCKED",
        };
        Some(format!("{base}{wait}"))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(Dialect::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn returning_support() {
        assert!(Dialect::Postgres.supports_returning(MutationKind::Insert));
        assert!(Dialect::Sqlite.supports_returning(MutationKind::Update));
        assert!(!Dialect::Mysql.supports_returning(MutationKind::Insert));
        assert!(!Dialect::Postgres.supports_returning(MutationKind::Delete));
    }

    #[test]
    fn lock_clauses() {
        let write = LockOptions::new(LockMode::PessimisticWrite);
        assert_eq!(
            Dialect::Postgres.lock_clause(write).as_deref(),
            Some("FOR UPDATE")
        );
        assert_eq!(
            Dialect::Mysql.lock_clause(write.skip_locked()).as_deref(),
            Some("FOR UPDATE SKIP LOCKED")
        );
        assert_eq!(
            Dialect::Postgres
                .lock_clause(LockOptions::new(LockMode::PessimisticRead).nowait())
                .as_deref(),
            Some("FOR SHARE NOWAIT")
        );
        assert_eq!(Dialect::Sqlite.lock_clause(write), None);
        assert_eq!(Dialect::Postgres.lock_clause(LockOptions::default()), None);
    }
}
