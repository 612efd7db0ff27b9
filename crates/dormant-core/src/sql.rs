//! A small, dialect-aware SQL statement tree.
//!
//! Persisters describe the statements they need as values ([`InsertStatement`],
//! [`UpdateStatement`], [`DeleteStatement`], [`SelectStatement`]) and render them
//! for a [`Dialect`] into SQL text plus positional parameters. Rendering owns
//! placeholder numbering, identifier quoting, `RETURNING` clauses, `WITH`
//! common table expressions and pessimistic lock clauses.

use crate::dialect::{Dialect, LockOptions};
use crate::value::Value;

/// SQL text with its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
    }

    fn idents(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
    }

    fn param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn restrictions(&mut self, restrictions: &[Restriction]) {
        for (i, r) in restrictions.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            self.ident(&r.column);
            if r.value.is_null() {
                self.push(" IS NULL");
            } else {
                self.push(" = ");
                self.param(r.value.clone());
            }
        }
    }

    fn returning(&mut self, columns: &[String]) {
        if !columns.is_empty() {
            self.push(" RETURNING ");
            self.idents(columns);
        }
    }

    fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// An equality restriction; a null value renders as `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Restriction {
    pub column: String,
    pub value: Value,
}

impl Restriction {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub returning: Vec<String>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: Value) -> Self {
        self.columns.push(column.into());
        self.values.push(value);
        self
    }

    #[must_use]
    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns;
        self
    }

    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        let mut w = SqlWriter::new(dialect);
        w.push("INSERT INTO ");
        w.ident(&self.table);
        if self.columns.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            w.idents(&self.columns);
            w.push(") VALUES (");
            for (i, value) in self.values.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.param(value.clone());
            }
            w.push(")");
        }
        w.returning(&self.returning);
        w.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub restrictions: Vec<Restriction>,
    pub returning: Vec<String>,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.assignments.push((column.into(), value));
        self
    }

    #[must_use]
    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    #[must_use]
    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns;
        self
    }

    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ");
        w.ident(&self.table);
        w.push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(column);
            w.push(" = ");
            w.param(value.clone());
        }
        w.restrictions(&self.restrictions);
        w.returning(&self.returning);
        w.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteStatement {
    pub table: String,
    pub restrictions: Vec<Restriction>,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        let mut w = SqlWriter::new(dialect);
        w.push("DELETE FROM ");
        w.ident(&self.table);
        w.restrictions(&self.restrictions);
        w.finish()
    }
}

/// An item in a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column(String),
    CountAll,
    /// `1`, for existence checks.
    One,
}

/// A named subquery in a `WITH` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonTableExpression {
    pub name: String,
    pub query: SelectStatement,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub with: Vec<CommonTableExpression>,
    pub items: Vec<SelectItem>,
    pub from: String,
    pub restrictions: Vec<Restriction>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: Option<LockOptions>,
}

impl SelectStatement {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            from: table.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.items.push(SelectItem::Column(column.into()));
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items
            .extend(columns.into_iter().map(|c| SelectItem::Column(c.into())));
        self
    }

    #[must_use]
    pub fn item(mut self, item: SelectItem) -> Self {
        self.items.push(item);
        self
    }

    #[must_use]
    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn lock(mut self, options: LockOptions) -> Self {
        self.lock = Some(options);
        self
    }

    #[must_use]
    pub fn with_cte(mut self, name: impl Into<String>, query: SelectStatement) -> Self {
        self.with.push(CommonTableExpression {
            name: name.into(),
            query,
        });
        self
    }

    pub fn render(&self, dialect: Dialect) -> RenderedSql {
        let mut w = SqlWriter::new(dialect);
        self.write(&mut w);
        w.finish()
    }

    fn write(&self, w: &mut SqlWriter) {
        if !self.with.is_empty() {
            w.push("WITH ");
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.ident(&cte.name);
                w.push(" AS (");
                cte.query.write(w);
                w.push(")");
            }
            w.push(" ");
        }
        w.push("SELECT ");
        if self.items.is_empty() {
            w.push("*");
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            match item {
                SelectItem::Column(c) => w.ident(c),
                SelectItem::CountAll => w.push("COUNT(*)"),
                SelectItem::One => w.push("1"),
            }
        }
        w.push(" FROM ");
        w.ident(&self.from);
        w.restrictions(&self.restrictions);
        if !self.order_by.is_empty() {
            w.push(" ORDER BY ");
            w.idents(&self.order_by);
        }
        if let Some(limit) = self.limit {
            w.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            w.push(&format!(" OFFSET {offset}"));
        }
        let dialect = w.dialect;
        if let Some(clause) = self.lock.and_then(|l| dialect.lock_clause(l)) {
            w.push(" ");
            w.push(&clause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::LockMode;

    #[test]
    fn insert_with_returning() {
        let sql = InsertStatement::new("orders")
            .value("number", Value::Text("A-1".into()))
            .value("total", Value::Decimal("9.50".into()))
            .returning(vec!["id".into(), "created_at".into()])
            .render(Dialect::Postgres);
        assert_eq!(
            sql.sql,
            "INSERT INTO \"orders\" (\"number\", \"total\") VALUES ($1, $2) RETURNING \"id\", \"created_at\""
        );
        assert_eq!(sql.params.len(), 2);
    }

    #[test]
    fn insert_without_columns_uses_defaults() {
        let sql = InsertStatement::new("t").render(Dialect::Sqlite);
        assert_eq!(sql.sql, "INSERT INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn update_numbers_placeholders_across_clauses() {
        let sql = UpdateStatement::new("orders")
            .set("total", Value::Int(3))
            .set("version", Value::Int(2))
            .restrict(Restriction::eq("id", Value::BigInt(7)))
            .restrict(Restriction::eq("version", Value::Int(1)))
            .render(Dialect::Sqlite);
        assert_eq!(
            sql.sql,
            "UPDATE \"orders\" SET \"total\" = ?1, \"version\" = ?2 WHERE \"id\" = ?3 AND \"version\" = ?4"
        );
        assert_eq!(
            sql.params,
            vec![Value::Int(3), Value::Int(2), Value::BigInt(7), Value::Int(1)]
        );
    }

    #[test]
    fn null_restriction_renders_is_null() {
        let sql = DeleteStatement::new("order_tags")
            .restrict(Restriction::eq("order_id", Value::BigInt(1)))
            .restrict(Restriction::eq("tag", Value::Null))
            .render(Dialect::Mysql);
        assert_eq!(
            sql.sql,
            "DELETE FROM `order_tags` WHERE `order_id` = ? AND `tag` IS NULL"
        );
        assert_eq!(sql.params, vec![Value::BigInt(1)]);
    }

    #[test]
    fn select_with_cte_and_lock() {
        let inner = SelectStatement::from("orders")
            .column("id")
            .restrict(Restriction::eq("customer_id", Value::BigInt(4)));
        let sql = SelectStatement::from("recent")
            .with_cte("recent", inner)
            .item(SelectItem::CountAll)
            .render(Dialect::Postgres);
        assert_eq!(
            sql.sql,
            "WITH \"recent\" AS (SELECT \"id\" FROM \"orders\" WHERE \"customer_id\" = $1) SELECT COUNT(*) FROM \"recent\""
        );

        let locked = SelectStatement::from("orders")
            .column("id")
            .restrict(Restriction::eq("id", Value::BigInt(1)))
            .lock(LockOptions::new(LockMode::PessimisticWrite).nowait())
            .render(Dialect::Postgres);
        assert!(locked.sql.ends_with("WHERE \"id\" = $1 FOR UPDATE NOWAIT"));
    }

    #[test]
    fn select_order_limit_offset() {
        let sql = SelectStatement::from("lines")
            .columns(["idx", "sku"])
            .order_by("idx")
            .limit(1)
            .offset(3)
            .render(Dialect::Sqlite);
        assert_eq!(
            sql.sql,
            "SELECT \"idx\", \"sku\" FROM \"lines\" ORDER BY \"idx\" LIMIT 1 OFFSET 3"
        );
    }
}
