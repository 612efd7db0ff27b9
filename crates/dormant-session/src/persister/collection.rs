//! Row-level SQL for one collection role.
//!
//! Rows carry the owner key, then the index columns, then the element
//! columns. Inverse roles are written by the other side of the association,
//! so every write here is a no-op for them.

use std::sync::Arc;

use dormant_collection::{CollectionKind, CollectionMetadata, CollectionRow, RowKey};
use dormant_core::sql::{DeleteStatement, InsertStatement, RenderedSql, Restriction, SelectItem, SelectStatement, UpdateStatement};
use dormant_core::{Connection, Cx, Dialect, Error, Outcome, Row, SqlExceptionHelper, Value, try_outcome, try_result};

use super::convert;

#[derive(Debug)]
pub struct CollectionPersister {
    metadata: Arc<CollectionMetadata>,
    dialect: Dialect,
}

impl CollectionPersister {
    pub fn new(metadata: Arc<CollectionMetadata>, dialect: Dialect) -> Self {
        Self { metadata, dialect }
    }

    pub fn metadata(&self) -> &Arc<CollectionMetadata> {
        &self.metadata
    }

    pub fn role(&self) -> &str {
        &self.metadata.role
    }

    pub fn is_inverse(&self) -> bool {
        self.metadata.inverse
    }

    fn helper(&self) -> SqlExceptionHelper {
        SqlExceptionHelper::new(self.dialect)
    }

    fn key_restriction(&self, key: &Value) -> Restriction {
        Restriction::eq(self.metadata.key_column.clone(), key.clone())
    }

    fn index_restrictions(&self, index: &Value) -> Vec<Restriction> {
        match &self.metadata.index {
            Some(data) => data
                .columns()
                .iter()
                .zip(data.mapper.write(index))
                .map(|(column, value)| Restriction::eq(column.clone(), value))
                .collect(),
            None => Vec::new(),
        }
    }

    fn element_restrictions(&self, element: &Value) -> Vec<Restriction> {
        let data = &self.metadata.element;
        data.columns()
            .iter()
            .zip(data.mapper.write(element))
            .map(|(column, value)| Restriction::eq(column.clone(), value))
            .collect()
    }

    fn row_restrictions(&self, key: &Value, row: &RowKey) -> Vec<Restriction> {
        let mut restrictions = vec![self.key_restriction(key)];
        match row {
            RowKey::Element(element) => restrictions.extend(self.element_restrictions(element)),
            other => {
                if let Some(index) = other.index_value() {
                    restrictions.extend(self.index_restrictions(&index));
                }
            }
        }
        restrictions
    }

    async fn execute_all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        statements: Vec<RenderedSql>,
        context: &str,
    ) -> Outcome<u64, Error> {
        let mut total = 0;
        for rendered in statements {
            tracing::trace!(role = %self.metadata.role, sql = %rendered.sql, "Writing collection row");
            total += try_outcome!(convert(
                self.helper(),
                conn.execute(cx, &rendered.sql, &rendered.params).await,
                context,
                &rendered.sql
            ));
        }
        Outcome::Ok(total)
    }

    /// Rows of the collection owned by `key`; lists and arrays in index order.
    pub fn load_statement(&self, key: &Value) -> RenderedSql {
        let mut select = SelectStatement::from(self.metadata.table.clone())
            .columns(self.metadata.selected_columns())
            .restrict(self.key_restriction(key));
        if matches!(self.metadata.kind, CollectionKind::List | CollectionKind::Array) {
            for column in self.metadata.index_columns() {
                select = select.order_by(column.clone());
            }
        }
        select.render(self.dialect)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(role = %self.metadata.role, key = %key))]
    pub async fn load<C: Connection>(&self, cx: &Cx, conn: &C, key: &Value) -> Outcome<Vec<Row>, Error> {
        let rendered = self.load_statement(key);
        let context = format!("could not initialize a collection: [{}#{}]", self.metadata.role, key);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        tracing::trace!(rows = rows.len(), "Loaded collection rows");
        Outcome::Ok(rows)
    }

    pub fn count_statement(&self, key: &Value) -> RenderedSql {
        SelectStatement::from(self.metadata.table.clone())
            .item(SelectItem::CountAll)
            .restrict(self.key_restriction(key))
            .render(self.dialect)
    }

    pub async fn count<C: Connection>(&self, cx: &Cx, conn: &C, key: &Value) -> Outcome<usize, Error> {
        let rendered = self.count_statement(key);
        let context = format!("could not retrieve collection size: [{}#{}]", self.metadata.role, key);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Outcome::Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn exists_statement(&self, key: &Value, element: &Value) -> RenderedSql {
        let mut select = SelectStatement::from(self.metadata.table.clone())
            .item(SelectItem::One)
            .restrict(self.key_restriction(key));
        for restriction in self.element_restrictions(element) {
            select = select.restrict(restriction);
        }
        select.limit(1).render(self.dialect)
    }

    pub async fn element_exists<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        element: &Value,
    ) -> Outcome<bool, Error> {
        let rendered = self.exists_statement(key, element);
        let context = format!("could not check row existence: [{}#{}]", self.metadata.role, key);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        Outcome::Ok(!rows.is_empty())
    }

    /// The element at a list position or map key. Sets have no index.
    pub fn element_by_index_statement(&self, key: &Value, index: &Value) -> Option<RenderedSql> {
        self.metadata.index.as_ref()?;
        let mut select = SelectStatement::from(self.metadata.table.clone())
            .columns(self.metadata.element_columns().iter().cloned())
            .restrict(self.key_restriction(key));
        for restriction in self.index_restrictions(index) {
            select = select.restrict(restriction);
        }
        Some(select.render(self.dialect))
    }

    pub async fn element_by_index<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        index: &Value,
    ) -> Outcome<Option<Value>, Error> {
        let Some(rendered) = self.element_by_index_statement(key, index) else {
            return Outcome::Err(Error::unsupported(format!(
                "collection {} has no index",
                self.metadata.role
            )));
        };
        let context = format!("could not read row: [{}#{}]", self.metadata.role, key);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        match rows.first() {
            Some(row) => Outcome::Ok(Some(try_result!(self.metadata.element.mapper.read(row, 0)))),
            None => Outcome::Ok(None),
        }
    }

    pub fn remove_statement(&self, key: &Value) -> RenderedSql {
        DeleteStatement::new(self.metadata.table.clone())
            .restrict(self.key_restriction(key))
            .render(self.dialect)
    }

    /// Delete every row owned by `key`.
    #[tracing::instrument(level = "debug", skip_all, fields(role = %self.metadata.role, key = %key))]
    pub async fn remove<C: Connection>(&self, cx: &Cx, conn: &C, key: &Value) -> Outcome<u64, Error> {
        if self.is_inverse() {
            return Outcome::Ok(0);
        }
        let context = format!("could not delete collection: [{}#{}]", self.metadata.role, key);
        self.execute_all(cx, conn, vec![self.remove_statement(key)], &context).await
    }

    pub fn insert_row_statement(&self, key: &Value, row: &CollectionRow) -> RenderedSql {
        let mut insert = InsertStatement::new(self.metadata.table.clone())
            .value(self.metadata.key_column.clone(), key.clone());
        if let (Some(data), Some(index)) = (&self.metadata.index, row.key.index_value()) {
            for (column, value) in data.columns().iter().zip(data.mapper.write(&index)) {
                insert = insert.value(column.clone(), value);
            }
        }
        let element = &self.metadata.element;
        for (column, value) in element.columns().iter().zip(element.mapper.write(&row.element)) {
            insert = insert.value(column.clone(), value);
        }
        insert.render(self.dialect)
    }

    /// Insert `rows` as new collection rows.
    pub async fn insert_rows<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        rows: &[CollectionRow],
    ) -> Outcome<u64, Error> {
        if self.is_inverse() || rows.is_empty() {
            return Outcome::Ok(0);
        }
        let context = format!("could not insert collection rows: [{}#{}]", self.metadata.role, key);
        let statements = rows.iter().map(|row| self.insert_row_statement(key, row)).collect();
        self.execute_all(cx, conn, statements, &context).await
    }

    /// Write every row of a collection that has never been written.
    #[tracing::instrument(level = "debug", skip_all, fields(role = %self.metadata.role, key = %key))]
    pub async fn recreate<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        rows: &[CollectionRow],
    ) -> Outcome<u64, Error> {
        self.insert_rows(cx, conn, key, rows).await
    }

    pub fn delete_row_statement(&self, key: &Value, row: &RowKey) -> RenderedSql {
        let mut delete = DeleteStatement::new(self.metadata.table.clone());
        for restriction in self.row_restrictions(key, row) {
            delete = delete.restrict(restriction);
        }
        delete.render(self.dialect)
    }

    pub async fn delete_rows<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        rows: &[RowKey],
    ) -> Outcome<u64, Error> {
        if self.is_inverse() || rows.is_empty() {
            return Outcome::Ok(0);
        }
        let context = format!("could not delete collection rows: [{}#{}]", self.metadata.role, key);
        let statements = rows.iter().map(|row| self.delete_row_statement(key, row)).collect();
        self.execute_all(cx, conn, statements, &context).await
    }

    pub fn update_row_statement(&self, key: &Value, row: &CollectionRow) -> RenderedSql {
        let element = &self.metadata.element;
        let mut update = UpdateStatement::new(self.metadata.table.clone());
        for (column, value) in element.columns().iter().zip(element.mapper.write(&row.element)) {
            update = update.set(column.clone(), value);
        }
        for restriction in self.row_restrictions(key, &row.key) {
            update = update.restrict(restriction);
        }
        update.render(self.dialect)
    }

    pub async fn update_rows<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        key: &Value,
        rows: &[CollectionRow],
    ) -> Outcome<u64, Error> {
        if self.is_inverse() || rows.is_empty() {
            return Outcome::Ok(0);
        }
        let context = format!("could not update collection rows: [{}#{}]", self.metadata.role, key);
        let statements = rows.iter().map(|row| self.update_row_statement(key, row)).collect();
        self.execute_all(cx, conn, statements, &context).await
    }
}
