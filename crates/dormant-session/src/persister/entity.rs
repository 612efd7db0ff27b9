//! Insert, update, delete, load and lock statements for one entity.

use std::sync::Arc;

use dormant_core::error::StaleStateError;
use dormant_core::sql::{DeleteStatement, InsertStatement, RenderedSql, Restriction, SelectStatement, UpdateStatement};
use dormant_core::{
    Connection, Cx, Dialect, EntityMetadata, Error, IdGenerator, LockOptions, MutationKind, Outcome, Result,
    SqlExceptionHelper, Value, try_outcome, try_result,
};

use super::convert;
use crate::config::SessionConfig;
use crate::generated::{GeneratedValues, GeneratedValuesDelegate, GeneratedValuesMappingProducer};

/// Statements for one entity mapping, rendered for the factory's dialect.
#[derive(Debug)]
pub struct EntityPersister {
    metadata: Arc<EntityMetadata>,
    dialect: Dialect,
    dynamic_update: bool,
    insert_delegate: Option<GeneratedValuesDelegate>,
    update_delegate: Option<GeneratedValuesDelegate>,
    insert_values: GeneratedValuesMappingProducer,
    update_values: GeneratedValuesMappingProducer,
}

impl EntityPersister {
    #[allow(clippy::result_large_err)]
    pub fn new(metadata: Arc<EntityMetadata>, dialect: Dialect, config: &SessionConfig) -> Result<Self> {
        let insert_delegate = GeneratedValuesDelegate::select(&metadata, MutationKind::Insert, dialect, config);
        let update_delegate = GeneratedValuesDelegate::select(&metadata, MutationKind::Update, dialect, config);
        if metadata.identifier.generator == IdGenerator::Identity && insert_delegate.is_none() {
            return Err(Error::config(format!(
                "entity {} uses an identity identifier but generated keys cannot be read with dialect {}",
                metadata.name,
                dialect.name()
            )));
        }
        let insert_values = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert)?;
        let update_values = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Update)?;
        tracing::debug!(
            entity = %metadata.name,
            insert_delegate = insert_delegate.as_ref().map_or("none", GeneratedValuesDelegate::name),
            update_delegate = update_delegate.as_ref().map_or("none", GeneratedValuesDelegate::name),
            "Built entity persister"
        );
        Ok(Self {
            metadata,
            dialect,
            dynamic_update: config.dynamic_update,
            insert_delegate,
            update_delegate,
            insert_values,
            update_values,
        })
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub fn entity_name(&self) -> &str {
        &self.metadata.name
    }

    pub fn insert_delegate(&self) -> Option<&GeneratedValuesDelegate> {
        self.insert_delegate.as_ref()
    }

    pub fn update_delegate(&self) -> Option<&GeneratedValuesDelegate> {
        self.update_delegate.as_ref()
    }

    fn helper(&self) -> SqlExceptionHelper {
        SqlExceptionHelper::new(self.dialect)
    }

    fn assigned_identifier(&self) -> bool {
        self.metadata.identifier.generator == IdGenerator::Assigned
    }

    fn stale(&self, id: &Value, message: impl Into<String>) -> Error {
        Error::StaleState(StaleStateError {
            entity: self.metadata.name.clone(),
            identifier: id.to_string(),
            message: message.into(),
        })
    }

    /// The insert for `state`.
    ///
    /// Custom SQL is bound with the insertable properties in declaration
    /// order, followed by an assigned identifier.
    pub fn insert_statement(&self, id: &Value, state: &[Value]) -> RenderedSql {
        let insertable = self
            .metadata
            .properties
            .iter()
            .zip(state)
            .filter(|(part, _)| part.insertable);
        if let Some(sql) = &self.metadata.custom_insert_sql {
            let mut params: Vec<Value> = insertable.map(|(_, v)| v.clone()).collect();
            if self.assigned_identifier() {
                params.push(id.clone());
            }
            return RenderedSql {
                sql: sql.clone(),
                params,
            };
        }
        let mut insert = InsertStatement::new(self.metadata.table.clone());
        if self.assigned_identifier() {
            insert = insert.value(self.metadata.identifier.column.clone(), id.clone());
        }
        for (part, value) in insertable {
            insert = insert.value(part.column.clone(), value.clone());
        }
        if self.insert_delegate == Some(GeneratedValuesDelegate::Returning) {
            insert = insert.returning(self.insert_values.columns());
        }
        insert.render(self.dialect)
    }

    /// Insert a row, reading back generated values when the mapping has any.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.metadata.name))]
    pub async fn insert<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        id: &Value,
        state: &[Value],
    ) -> Outcome<Option<GeneratedValues>, Error> {
        let rendered = self.insert_statement(id, state);
        let context = format!("could not insert: [{}]", self.metadata.name);
        tracing::debug!(sql = %rendered.sql, "Inserting entity");

        let rows = match &self.insert_delegate {
            None => {
                try_outcome!(convert(
                    self.helper(),
                    conn.execute(cx, &rendered.sql, &rendered.params).await,
                    &context,
                    &rendered.sql
                ));
                return Outcome::Ok(None);
            }
            Some(GeneratedValuesDelegate::Returning) => try_outcome!(convert(
                self.helper(),
                conn.query(cx, &rendered.sql, &rendered.params).await,
                &context,
                &rendered.sql
            )),
            Some(GeneratedValuesDelegate::GetGeneratedKeys) => {
                let columns = self.insert_values.columns();
                try_outcome!(convert(
                    self.helper(),
                    conn.execute_returning_keys(cx, &rendered.sql, &rendered.params, &columns)
                        .await,
                    &context,
                    &rendered.sql
                ))
            }
            Some(GeneratedValuesDelegate::UniqueKeySelect { natural_id }) => {
                try_outcome!(convert(
                    self.helper(),
                    conn.execute(cx, &rendered.sql, &rendered.params).await,
                    &context,
                    &rendered.sql
                ));
                let select = try_result!(
                    self.insert_values
                        .unique_key_select(&self.metadata, natural_id, state)
                )
                .render(self.dialect);
                try_outcome!(convert(
                    self.helper(),
                    conn.query(cx, &select.sql, &select.params).await,
                    &context,
                    &select.sql
                ))
            }
        };
        let values = try_result!(self.insert_values.read(&rows));
        Outcome::Ok(Some(values))
    }

    /// The update for `state`, or `None` when there is nothing to write.
    ///
    /// With dynamic updates only `dirty` properties are written; otherwise all
    /// updatable properties are. The version property is always written, and
    /// `previous_version` restricts the row when the entity is versioned.
    /// Custom SQL is bound with all updatable properties, then the
    /// identifier, then the previous version.
    pub fn update_statement(
        &self,
        id: &Value,
        state: &[Value],
        dirty: &[usize],
        previous_version: Option<&Value>,
    ) -> Option<RenderedSql> {
        let version = self.metadata.version_index();
        let mut columns: Vec<usize> = if self.dynamic_update && self.metadata.custom_update_sql.is_none() {
            dirty
                .iter()
                .copied()
                .filter(|&i| self.metadata.property(i).is_some_and(|p| p.updatable))
                .collect()
        } else {
            (0..self.metadata.properties.len())
                .filter(|&i| self.metadata.properties[i].updatable)
                .collect()
        };
        if let Some(v) = version {
            if !columns.contains(&v) {
                columns.push(v);
                columns.sort_unstable();
            }
        }
        if columns.is_empty() {
            return None;
        }

        if let Some(sql) = &self.metadata.custom_update_sql {
            let mut params: Vec<Value> = columns
                .iter()
                .map(|&i| state.get(i).cloned().unwrap_or(Value::Null))
                .collect();
            params.push(id.clone());
            if let Some(previous) = previous_version {
                params.push(previous.clone());
            }
            return Some(RenderedSql {
                sql: sql.clone(),
                params,
            });
        }

        let mut update = UpdateStatement::new(self.metadata.table.clone());
        for &i in &columns {
            let part = &self.metadata.properties[i];
            update = update.set(part.column.clone(), state.get(i).cloned().unwrap_or(Value::Null));
        }
        update = update.restrict(Restriction::eq(self.metadata.identifier.column.clone(), id.clone()));
        if let (Some(v), Some(previous)) = (version, previous_version) {
            update = update.restrict(Restriction::eq(
                self.metadata.properties[v].column.clone(),
                previous.clone(),
            ));
        }
        if self.update_delegate == Some(GeneratedValuesDelegate::Returning) {
            update = update.returning(self.update_values.columns());
        }
        Some(update.render(self.dialect))
    }

    /// Update a row. A row count of zero means another transaction changed or
    /// removed it, which raises a stale-state error.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.metadata.name, id = %id))]
    pub async fn update<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        id: &Value,
        state: &[Value],
        dirty: &[usize],
        previous_version: Option<&Value>,
    ) -> Outcome<Option<GeneratedValues>, Error> {
        let Some(rendered) = self.update_statement(id, state, dirty, previous_version) else {
            tracing::trace!("No updatable columns");
            return Outcome::Ok(None);
        };
        let context = format!("could not update: [{}#{}]", self.metadata.name, id);
        tracing::debug!(sql = %rendered.sql, "Updating entity");

        if self.update_delegate == Some(GeneratedValuesDelegate::Returning) {
            let rows = try_outcome!(convert(
                self.helper(),
                conn.query(cx, &rendered.sql, &rendered.params).await,
                &context,
                &rendered.sql
            ));
            if rows.is_empty() {
                return Outcome::Err(self.stale(id, "update matched no rows"));
            }
            let values = try_result!(self.update_values.read(&rows));
            return Outcome::Ok(Some(values));
        }

        let count = try_outcome!(convert(
            self.helper(),
            conn.execute(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        if count == 0 {
            let message = match previous_version {
                Some(v) => format!("version {v} is no longer current"),
                None => "update matched no rows".to_string(),
            };
            return Outcome::Err(self.stale(id, message));
        }
        Outcome::Ok(None)
    }

    pub fn delete_statement(&self, id: &Value, version: Option<&Value>) -> RenderedSql {
        let mut delete = DeleteStatement::new(self.metadata.table.clone())
            .restrict(Restriction::eq(self.metadata.identifier.column.clone(), id.clone()));
        if let (Some(v), Some(version)) = (self.metadata.version_index(), version) {
            delete = delete.restrict(Restriction::eq(
                self.metadata.properties[v].column.clone(),
                version.clone(),
            ));
        }
        delete.render(self.dialect)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.metadata.name, id = %id))]
    pub async fn delete<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        id: &Value,
        version: Option<&Value>,
    ) -> Outcome<(), Error> {
        let rendered = self.delete_statement(id, version);
        let context = format!("could not delete: [{}#{}]", self.metadata.name, id);
        tracing::debug!(sql = %rendered.sql, "Deleting entity");
        let count = try_outcome!(convert(
            self.helper(),
            conn.execute(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        if count == 0 {
            return Outcome::Err(self.stale(id, "delete matched no rows"));
        }
        Outcome::Ok(())
    }

    /// Select the identifier and every property, optionally taking a row lock.
    pub fn load_statement(&self, id: &Value, lock: Option<LockOptions>) -> RenderedSql {
        let mut select = SelectStatement::from(self.metadata.table.clone())
            .column(self.metadata.identifier.column.clone())
            .columns(self.metadata.properties.iter().map(|p| p.column.clone()))
            .restrict(Restriction::eq(self.metadata.identifier.column.clone(), id.clone()));
        if let Some(options) = lock {
            select = select.lock(options);
        }
        select.render(self.dialect)
    }

    /// Read the state of one row, or `None` when it does not exist.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.metadata.name, id = %id))]
    pub async fn load<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        id: &Value,
        lock: Option<LockOptions>,
    ) -> Outcome<Option<Vec<Value>>, Error> {
        let rendered = self.load_statement(id, lock);
        let context = format!("could not load an entity: [{}#{}]", self.metadata.name, id);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        let row = match rows.as_slice() {
            [] => return Outcome::Ok(None),
            [row] => row,
            _ => {
                return Outcome::Err(Error::Custom(format!(
                    "more than one row with the given identifier was found: {}, for class: {}",
                    id, self.metadata.name
                )));
            }
        };
        let mut state = Vec::with_capacity(self.metadata.properties.len());
        for (i, part) in self.metadata.properties.iter().enumerate() {
            let column = try_result!(row.require(i + 1)).clone();
            state.push(try_result!(part.ty.assemble(&[column])));
        }
        Outcome::Ok(Some(state))
    }

    /// Take a pessimistic lock on the row, checking the version if one is known.
    pub fn lock_statement(&self, id: &Value, version: Option<&Value>, options: LockOptions) -> RenderedSql {
        let mut select = SelectStatement::from(self.metadata.table.clone())
            .column(self.metadata.identifier.column.clone())
            .restrict(Restriction::eq(self.metadata.identifier.column.clone(), id.clone()));
        if let (Some(v), Some(version)) = (self.metadata.version_index(), version) {
            select = select.restrict(Restriction::eq(
                self.metadata.properties[v].column.clone(),
                version.clone(),
            ));
        }
        select.lock(options).render(self.dialect)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.metadata.name, id = %id))]
    pub async fn lock<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        id: &Value,
        version: Option<&Value>,
        options: LockOptions,
    ) -> Outcome<(), Error> {
        let rendered = self.lock_statement(id, version, options);
        let context = format!("could not lock: [{}#{}]", self.metadata.name, id);
        let rows = try_outcome!(convert(
            self.helper(),
            conn.query(cx, &rendered.sql, &rendered.params).await,
            &context,
            &rendered.sql
        ));
        if rows.is_empty() {
            return Outcome::Err(self.stale(id, "row to lock was not found"));
        }
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Line, MockConnection, Order, expect_err, order_row, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use dormant_core::error::QueryErrorKind;
    use dormant_core::{GenerationTiming, IdentifierPart, LockMode, Model, ModelPart, Row, types};

    fn persister<M: Model>(dialect: Dialect, config: &SessionConfig) -> EntityPersister {
        EntityPersister::new(Arc::new(M::metadata().unwrap()), dialect, config).unwrap()
    }

    fn order_state() -> Vec<Value> {
        vec![Value::Text("A-1".into()), Value::Decimal("9.50".into()), Value::BigInt(0)]
    }

    #[test]
    fn insert_binds_assigned_identifier_first() {
        let p = persister::<Order>(Dialect::Postgres, &SessionConfig::default());
        let sql = p.insert_statement(&Value::BigInt(1), &order_state());
        assert_eq!(
            sql.sql,
            "INSERT INTO \"orders\" (\"id\", \"number\", \"total\", \"version\") VALUES ($1, $2, $3, $4)"
        );
        assert_eq!(sql.params[0], Value::BigInt(1));
        assert!(p.insert_delegate().is_none());
    }

    #[test]
    fn identity_insert_returns_generated_identifier() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        conn.respond("RETURNING", vec![Row::new(vec!["id".into()], vec![Value::BigInt(77)])]);
        let p = persister::<Line>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let state = vec![Value::BigInt(1), Value::Text("SKU".into())];
            let values = unwrap_outcome(p.insert(&cx, &conn, &Value::Null, &state).await).unwrap();
            assert_eq!(values.identifier(), Some(&Value::BigInt(77)));
        });
        assert_eq!(
            conn.statements(),
            vec!["INSERT INTO \"lines\" (\"order_id\", \"sku\") VALUES ($1, $2) RETURNING \"id\""]
        );
    }

    #[test]
    fn identity_insert_without_rows_fails() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        let p = persister::<Line>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let state = vec![Value::BigInt(1), Value::Text("SKU".into())];
            let err = expect_err(p.insert(&cx, &conn, &Value::Null, &state).await);
            assert!(err.to_string().contains("The database returned no natively generated values"));
        });
    }

    #[test]
    fn mysql_identity_uses_generated_keys() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Mysql);
        conn.respond("INSERT", vec![Row::new(vec!["GENERATED_KEY".into()], vec![Value::BigInt(5)])]);
        let p = persister::<Line>(Dialect::Mysql, &SessionConfig::default());
        assert_eq!(p.insert_delegate(), Some(&GeneratedValuesDelegate::GetGeneratedKeys));

        rt.block_on(async {
            let state = vec![Value::BigInt(1), Value::Text("SKU".into())];
            let values = unwrap_outcome(p.insert(&cx, &conn, &Value::Null, &state).await).unwrap();
            assert_eq!(values.identifier(), Some(&Value::BigInt(5)));
        });
    }

    #[test]
    fn identity_without_any_delegate_is_a_config_error() {
        let config = SessionConfig::default().use_get_generated_keys(false);
        let err = EntityPersister::new(Arc::new(Line::metadata().unwrap()), Dialect::Mysql, &config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn natural_id_select_reads_generated_columns() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Mysql);
        conn.respond("SELECT", vec![Row::new(vec!["created_at".into()], vec![Value::Text("now".into())])]);
        let metadata = EntityMetadata::builder("Invoice", "invoices", IdentifierPart::assigned("id", "id", types::long()))
            .property(ModelPart::new("number", "number", types::text()).natural_id())
            .property(ModelPart::new("created", "created_at", types::text()).generated(GenerationTiming::Insert))
            .build()
            .unwrap();
        let config = SessionConfig::default().use_get_generated_keys(false);
        let p = EntityPersister::new(Arc::new(metadata), Dialect::Mysql, &config).unwrap();

        rt.block_on(async {
            let state = vec![Value::Text("INV-1".into()), Value::Null];
            let values = unwrap_outcome(p.insert(&cx, &conn, &Value::BigInt(3), &state).await).unwrap();
            let mut applied = state.clone();
            values.apply(&mut applied);
            assert_eq!(applied[1], Value::Text("now".into()));
        });
        let statements = conn.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "SELECT `created_at` FROM `invoices` WHERE `number` = ?");
    }

    #[test]
    fn dynamic_update_writes_dirty_columns_and_version() {
        let config = SessionConfig::default().dynamic_update(true);
        let p = persister::<Order>(Dialect::Postgres, &config);
        let state = vec![Value::Text("A-1".into()), Value::Decimal("12".into()), Value::BigInt(4)];
        let sql = p
            .update_statement(&Value::BigInt(1), &state, &[1], Some(&Value::BigInt(3)))
            .unwrap();
        assert_eq!(
            sql.sql,
            "UPDATE \"orders\" SET \"total\" = $1, \"version\" = $2 WHERE \"id\" = $3 AND \"version\" = $4"
        );
        assert_eq!(sql.params[3], Value::BigInt(3));
    }

    #[test]
    fn static_update_writes_all_updatable_columns() {
        let p = persister::<Order>(Dialect::Sqlite, &SessionConfig::default());
        let state = vec![Value::Text("A-1".into()), Value::Decimal("12".into()), Value::BigInt(4)];
        let sql = p
            .update_statement(&Value::BigInt(1), &state, &[1], Some(&Value::BigInt(3)))
            .unwrap();
        // The natural id is not updatable.
        assert_eq!(
            sql.sql,
            "UPDATE \"orders\" SET \"total\" = ?1, \"version\" = ?2 WHERE \"id\" = ?3 AND \"version\" = ?4"
        );
    }

    #[test]
    fn versioned_update_of_zero_rows_is_stale() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        conn.affect(0);
        let p = persister::<Order>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let err = expect_err(
                p.update(&cx, &conn, &Value::BigInt(1), &order_state(), &[1], Some(&Value::BigInt(0)))
                    .await,
            );
            assert!(err.is_stale_state());
            assert!(err.to_string().contains("Order#1"));
        });
    }

    #[test]
    fn delete_checks_version() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        conn.affect(0);
        let p = persister::<Order>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let err = expect_err(p.delete(&cx, &conn, &Value::BigInt(1), Some(&Value::BigInt(2))).await);
            assert!(err.is_stale_state());
        });
        assert_eq!(
            conn.statements(),
            vec!["DELETE FROM \"orders\" WHERE \"id\" = $1 AND \"version\" = $2"]
        );
    }

    #[test]
    fn load_reads_state_and_locks() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        conn.respond("FROM \"orders\"", vec![order_row(1, "A-1", "9.50", 2)]);
        let p = persister::<Order>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let lock = LockOptions::new(LockMode::PessimisticWrite).skip_locked();
            let state = unwrap_outcome(p.load(&cx, &conn, &Value::BigInt(1), Some(lock)).await).unwrap();
            assert_eq!(state[0], Value::Text("A-1".into()));
            assert_eq!(state[2], Value::BigInt(2));
            assert!(unwrap_outcome(p.load(&cx, &MockConnection::new(Dialect::Postgres), &Value::BigInt(9), None).await).is_none());
        });
        assert!(conn.statements()[0].ends_with("FOR UPDATE SKIP LOCKED"));
    }

    #[test]
    fn driver_errors_are_normalized() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new(Dialect::Postgres);
        conn.fail_matching("INSERT");
        let p = persister::<Order>(Dialect::Postgres, &SessionConfig::default());

        rt.block_on(async {
            let err = expect_err(p.insert(&cx, &conn, &Value::BigInt(1), &order_state()).await);
            match err {
                Error::Query(q) => {
                    assert_eq!(q.kind, QueryErrorKind::Constraint);
                    assert_eq!(q.constraint.as_deref(), Some("orders_number_key"));
                    assert!(q.message.starts_with("could not insert: [Order]"));
                    assert!(q.sql.is_some());
                }
                other => std::panic::panic_any(format!("unexpected error: {other:?}")),
            }
        });
    }
}
