//! Reading back values the database generated during an insert or update.
//!
//! Which mechanism is used depends on the dialect and the mapping:
//!
//! 1. `RETURNING` on the mutation itself, when the dialect supports it for
//!    the mutation kind and no custom SQL replaces the statement;
//! 2. the driver's generated-keys facility, for inserts when enabled;
//! 3. a follow-up select by natural id, for inserts of entities that have one;
//! 4. otherwise nothing is read.
//!
//! Rows are decoded by a [`GeneratedValuesMappingProducer`], which holds one
//! [`ResultBuilder`] per generated model part in declaration order. Exactly
//! one row is expected.

use dormant_core::error::GeneratedValuesError;
use dormant_core::sql::{Restriction, SelectStatement};
use dormant_core::{Dialect, EntityMetadata, Error, MutationKind, PartRef, Result, Row, Value};

use crate::config::SessionConfig;

/// How generated values are obtained for one entity and mutation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedValuesDelegate {
    Returning,
    GetGeneratedKeys,
    /// Select the generated columns by the given natural-id property indexes.
    UniqueKeySelect { natural_id: Vec<usize> },
}

impl GeneratedValuesDelegate {
    /// Choose a delegate, or `None` when nothing is generated or nothing can
    /// read it.
    pub fn select(
        metadata: &EntityMetadata,
        kind: MutationKind,
        dialect: Dialect,
        config: &SessionConfig,
    ) -> Option<Self> {
        if metadata.generated_parts(kind).is_empty() {
            return None;
        }
        let custom_sql = match kind {
            MutationKind::Insert => metadata.custom_insert_sql.is_some(),
            MutationKind::Update => metadata.custom_update_sql.is_some(),
            MutationKind::Delete => return None,
        };
        if !custom_sql && dialect.supports_returning(kind) {
            return Some(Self::Returning);
        }
        if kind != MutationKind::Insert {
            return None;
        }
        if config.use_get_generated_keys && dialect.supports_get_generated_keys() {
            return Some(Self::GetGeneratedKeys);
        }
        if metadata.has_natural_id() {
            return Some(Self::UniqueKeySelect {
                natural_id: metadata.natural_id_indexes(),
            });
        }
        None
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Returning => "returning",
            Self::GetGeneratedKeys => "get-generated-keys",
            Self::UniqueKeySelect { .. } => "unique-key-select",
        }
    }
}

/// Values read back for one mutation, keyed by model part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedValues {
    values: Vec<(PartRef, Value)>,
}

impl GeneratedValues {
    pub fn get(&self, part: PartRef) -> Option<&Value> {
        self.values.iter().find(|(p, _)| *p == part).map(|(_, v)| v)
    }

    pub fn identifier(&self) -> Option<&Value> {
        self.get(PartRef::Identifier)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartRef, &Value)> {
        self.values.iter().map(|(p, v)| (*p, v))
    }

    /// Write property values into `state`, returning the generated identifier.
    pub fn apply(&self, state: &mut [Value]) -> Option<Value> {
        let mut id = None;
        for (part, value) in &self.values {
            match part {
                PartRef::Identifier => id = Some(value.clone()),
                PartRef::Property(i) => {
                    if let Some(slot) = state.get_mut(*i) {
                        *slot = value.clone();
                    }
                }
            }
        }
        id
    }
}

/// Reads the value of one generated part from a result row.
#[derive(Debug, Clone)]
pub struct ResultBuilder {
    part: PartRef,
    column: String,
    position: usize,
}

impl ResultBuilder {
    pub fn part(&self) -> PartRef {
        self.part
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Look the column up by name, falling back to its position for drivers
    /// that report generated keys without names.
    fn build(&self, row: &Row) -> Option<Value> {
        row.get_by_name(&self.column)
            .or_else(|| row.get(self.position))
            .cloned()
    }
}

/// Decodes generated-values rows for one entity and mutation kind.
#[derive(Debug, Clone)]
pub struct GeneratedValuesMappingProducer {
    entity: String,
    builders: Vec<ResultBuilder>,
}

impl GeneratedValuesMappingProducer {
    #[allow(clippy::result_large_err)]
    pub fn new(metadata: &EntityMetadata, kind: MutationKind) -> Result<Self> {
        let builders = metadata
            .generated_parts(kind)
            .into_iter()
            .enumerate()
            .map(|(position, part)| {
                let column = metadata.part_column(part).ok_or_else(|| {
                    Error::config(format!("entity {} has no part {part:?}", metadata.name))
                })?;
                Ok(ResultBuilder {
                    part,
                    column: column.to_string(),
                    position,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            entity: metadata.name.clone(),
            builders,
        })
    }

    pub fn builders(&self) -> &[ResultBuilder] {
        &self.builders
    }

    /// Columns to ask for, in builder order.
    pub fn columns(&self) -> Vec<String> {
        self.builders.iter().map(|b| b.column.clone()).collect()
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::GeneratedValues(GeneratedValuesError {
            entity: self.entity.clone(),
            message: message.into(),
        })
    }

    /// Read the single generated-values row.
    #[allow(clippy::result_large_err)]
    pub fn read(&self, rows: &[Row]) -> Result<GeneratedValues> {
        let row = match rows {
            [] => return Err(self.error("The database returned no natively generated values")),
            [row] => row,
            _ => {
                return Err(self.error(format!(
                    "The database returned {} rows of generated values; expected one",
                    rows.len()
                )));
            }
        };
        let mut values = Vec::with_capacity(self.builders.len());
        for builder in &self.builders {
            let value = builder.build(row).ok_or_else(|| {
                self.error(format!("generated column '{}' missing from result", builder.column))
            })?;
            values.push((builder.part, value));
        }
        tracing::trace!(entity = %self.entity, count = values.len(), "Read generated values");
        Ok(GeneratedValues { values })
    }

    /// Follow-up select reading the generated columns by natural id.
    #[allow(clippy::result_large_err)]
    pub fn unique_key_select(
        &self,
        metadata: &EntityMetadata,
        natural_id: &[usize],
        state: &[Value],
    ) -> Result<SelectStatement> {
        let mut select = SelectStatement::from(metadata.table.clone()).columns(self.columns());
        for &index in natural_id {
            let part = metadata
                .property(index)
                .ok_or_else(|| self.error(format!("natural id property {index} is not mapped")))?;
            let value = state.get(index).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Err(self.error(format!(
                    "natural id property {} is null; cannot locate the inserted row",
                    part.name
                )));
            }
            select = select.restrict(Restriction::eq(part.column.clone(), value));
        }
        Ok(select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_core::{GenerationTiming, IdentifierPart, ModelPart, types};

    fn order(identity: bool) -> dormant_core::metadata::EntityMetadataBuilder {
        let id = if identity {
            IdentifierPart::identity("id", "id", types::long())
        } else {
            IdentifierPart::assigned("id", "id", types::long())
        };
        EntityMetadata::builder("Order", "orders", id)
            .property(ModelPart::new("number", "number", types::text()).natural_id())
            .property(ModelPart::new("created", "created_at", types::text()).generated(GenerationTiming::Insert))
            .property(ModelPart::new("touched", "touched_at", types::text()).generated(GenerationTiming::Always))
    }

    #[test]
    fn returning_preferred_when_supported() {
        let metadata = order(true).build().unwrap();
        let config = SessionConfig::default();
        assert_eq!(
            GeneratedValuesDelegate::select(&metadata, MutationKind::Insert, Dialect::Postgres, &config),
            Some(GeneratedValuesDelegate::Returning)
        );
        assert_eq!(
            GeneratedValuesDelegate::select(&metadata, MutationKind::Update, Dialect::Postgres, &config),
            Some(GeneratedValuesDelegate::Returning)
        );
    }

    #[test]
    fn custom_sql_disables_returning() {
        let metadata = order(true)
            .custom_insert_sql("INSERT INTO orders (number) VALUES ($1)")
            .build()
            .unwrap();
        let config = SessionConfig::default();
        assert_eq!(
            GeneratedValuesDelegate::select(&metadata, MutationKind::Insert, Dialect::Postgres, &config),
            Some(GeneratedValuesDelegate::GetGeneratedKeys)
        );
    }

    #[test]
    fn falls_back_to_natural_id_select_then_nothing() {
        let metadata = order(false).build().unwrap();
        let config = SessionConfig::default().use_get_generated_keys(false);
        assert_eq!(
            GeneratedValuesDelegate::select(&metadata, MutationKind::Insert, Dialect::Mysql, &config),
            Some(GeneratedValuesDelegate::UniqueKeySelect { natural_id: vec![0] })
        );
        assert_eq!(
            GeneratedValuesDelegate::select(&metadata, MutationKind::Update, Dialect::Mysql, &config),
            None
        );

        let plain = EntityMetadata::builder("Tag", "tags", IdentifierPart::assigned("id", "id", types::long()))
            .property(ModelPart::new("name", "name", types::text()))
            .build()
            .unwrap();
        assert_eq!(
            GeneratedValuesDelegate::select(&plain, MutationKind::Insert, Dialect::Postgres, &config),
            None
        );
    }

    #[test]
    fn one_builder_per_generated_part_in_declaration_order() {
        let metadata = order(true).build().unwrap();
        let insert = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert).unwrap();
        assert_eq!(insert.columns(), vec!["id", "created_at", "touched_at"]);
        let update = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Update).unwrap();
        assert_eq!(update.columns(), vec!["touched_at"]);
        assert_eq!(update.builders()[0].part(), PartRef::Property(2));
    }

    #[test]
    fn empty_result_is_an_integrity_error() {
        let metadata = order(true).build().unwrap();
        let producer = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert).unwrap();
        let err = producer.read(&[]).unwrap_err();
        assert!(matches!(err, Error::GeneratedValues(_)));
        assert!(err.to_string().contains("The database returned no natively generated values"));
    }

    #[test]
    fn more_than_one_row_is_an_error() {
        let metadata = order(true).build().unwrap();
        let producer = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert).unwrap();
        let row = Row::new(
            vec!["id".into(), "created_at".into(), "touched_at".into()],
            vec![Value::BigInt(1), Value::Text("a".into()), Value::Text("b".into())],
        );
        assert!(producer.read(&[row.clone(), row]).is_err());
    }

    #[test]
    fn values_apply_to_state() {
        let metadata = order(true).build().unwrap();
        let producer = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert).unwrap();
        // Unnamed columns are read by position.
        let row = Row::new(
            vec!["1".into(), "2".into(), "3".into()],
            vec![Value::BigInt(41), Value::Text("mon".into()), Value::Text("tue".into())],
        );
        let values = producer.read(&[row]).unwrap();
        assert_eq!(values.identifier(), Some(&Value::BigInt(41)));

        let mut state = vec![Value::Text("A-1".into()), Value::Null, Value::Null];
        let id = values.apply(&mut state);
        assert_eq!(id, Some(Value::BigInt(41)));
        assert_eq!(state[1], Value::Text("mon".into()));
        assert_eq!(state[2], Value::Text("tue".into()));
    }

    #[test]
    fn unique_key_select_restricts_by_natural_id() {
        let metadata = order(false).build().unwrap();
        let producer = GeneratedValuesMappingProducer::new(&metadata, MutationKind::Insert).unwrap();
        let state = vec![Value::Text("A-1".into()), Value::Null, Value::Null];
        let sql = producer
            .unique_key_select(&metadata, &[0], &state)
            .unwrap()
            .render(Dialect::Postgres);
        assert_eq!(
            sql.sql,
            "SELECT \"created_at\", \"touched_at\" FROM \"orders\" WHERE \"number\" = $1"
        );
        assert_eq!(sql.params, vec![Value::Text("A-1".into())]);

        let missing = vec![Value::Null, Value::Null, Value::Null];
        assert!(producer.unique_key_select(&metadata, &[0], &missing).is_err());
    }
}
