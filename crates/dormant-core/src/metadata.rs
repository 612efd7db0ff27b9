//! Entity mapping metadata.
//!
//! [`EntityMetadata`] is the pre-resolved description of how one entity maps
//! onto a table: identifier, ordered properties with their persistent types,
//! which columns the database generates, the version column used for
//! optimistic locking, and the collection roles the entity owns. Metadata is
//! validated once when a session factory is built and is read-only afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use crate::Result;
use crate::dialect::MutationKind;
use crate::error::Error;
use crate::types::PersistentType;

/// When the database generates a column's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationTiming {
    /// Application-assigned.
    #[default]
    Never,
    /// Generated on insert only (identity keys, column defaults).
    Insert,
    /// Generated on insert and on every update (triggers, `ON UPDATE` timestamps).
    Always,
}

impl GenerationTiming {
    pub const fn includes(self, kind: MutationKind) -> bool {
        match self {
            GenerationTiming::Never => false,
            GenerationTiming::Insert => matches!(kind, MutationKind::Insert),
            GenerationTiming::Always => matches!(kind, MutationKind::Insert | MutationKind::Update),
        }
    }
}

/// How identifiers are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdGenerator {
    /// The application sets the identifier before persisting.
    #[default]
    Assigned,
    /// The database assigns the identifier on insert.
    Identity,
}

/// Reference to a model part of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartRef {
    Identifier,
    Property(usize),
}

/// The identifier of an entity.
#[derive(Debug, Clone)]
pub struct IdentifierPart {
    pub name: String,
    pub column: String,
    pub ty: Arc<dyn PersistentType>,
    pub generator: IdGenerator,
}

impl IdentifierPart {
    pub fn assigned(name: impl Into<String>, column: impl Into<String>, ty: Arc<dyn PersistentType>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty,
            generator: IdGenerator::Assigned,
        }
    }

    pub fn identity(name: impl Into<String>, column: impl Into<String>, ty: Arc<dyn PersistentType>) -> Self {
        Self {
            generator: IdGenerator::Identity,
            ..Self::assigned(name, column, ty)
        }
    }
}

/// A mapped, single-column property of an entity.
#[derive(Debug, Clone)]
pub struct ModelPart {
    pub name: String,
    pub column: String,
    pub ty: Arc<dyn PersistentType>,
    pub nullable: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub generation: GenerationTiming,
    pub natural_id: bool,
    pub version: bool,
    /// Entity this column is a foreign key to, used for insert/delete ordering.
    pub references: Option<String>,
}

impl ModelPart {
    pub fn new(name: impl Into<String>, column: impl Into<String>, ty: Arc<dyn PersistentType>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty,
            nullable: true,
            insertable: true,
            updatable: true,
            generation: GenerationTiming::Never,
            natural_id: false,
            version: false,
            references: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// The database produces this column's value.
    #[must_use]
    pub fn generated(mut self, timing: GenerationTiming) -> Self {
        self.generation = timing;
        if timing != GenerationTiming::Never {
            self.insertable = false;
            if timing == GenerationTiming::Always {
                self.updatable = false;
            }
        }
        self
    }

    #[must_use]
    pub fn natural_id(mut self) -> Self {
        self.natural_id = true;
        self.updatable = false;
        self
    }

    #[must_use]
    pub fn version(mut self) -> Self {
        self.version = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn references(mut self, entity: impl Into<String>) -> Self {
        self.references = Some(entity.into());
        self
    }
}

/// Mapping metadata for one entity.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub identifier: IdentifierPart,
    pub properties: Vec<ModelPart>,
    /// Roles of the collections this entity owns.
    pub collections: Vec<String>,
    pub custom_insert_sql: Option<String>,
    pub custom_update_sql: Option<String>,
    pub mutable: bool,
}

impl EntityMetadata {
    pub fn builder(name: impl Into<String>, table: impl Into<String>, identifier: IdentifierPart) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            metadata: EntityMetadata {
                name: name.into(),
                table: table.into(),
                identifier,
                properties: Vec::new(),
                collections: Vec::new(),
                custom_insert_sql: None,
                custom_update_sql: None,
                mutable: true,
            },
        }
    }

    pub fn property(&self, index: usize) -> Option<&ModelPart> {
        self.properties.get(index)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn version_index(&self) -> Option<usize> {
        self.properties.iter().position(|p| p.version)
    }

    pub fn natural_id_indexes(&self) -> Vec<usize> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.natural_id)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_natural_id(&self) -> bool {
        self.properties.iter().any(|p| p.natural_id)
    }

    /// Parts the database generates for a mutation kind, identifier first, then
    /// properties in declaration order.
    pub fn generated_parts(&self, kind: MutationKind) -> Vec<PartRef> {
        let mut parts = Vec::new();
        if kind == MutationKind::Insert && self.identifier.generator == IdGenerator::Identity {
            parts.push(PartRef::Identifier);
        }
        parts.extend(
            self.properties
                .iter()
                .enumerate()
                .filter(|(_, p)| p.generation.includes(kind))
                .map(|(i, _)| PartRef::Property(i)),
        );
        parts
    }

    pub fn part_column(&self, part: PartRef) -> Option<&str> {
        match part {
            PartRef::Identifier => Some(&self.identifier.column),
            PartRef::Property(i) => self.properties.get(i).map(|p| p.column.as_str()),
        }
    }

    pub fn part_type(&self, part: PartRef) -> Option<&Arc<dyn PersistentType>> {
        match part {
            PartRef::Identifier => Some(&self.identifier.ty),
            PartRef::Property(i) => self.properties.get(i).map(|p| &p.ty),
        }
    }

    pub fn part_name(&self, part: PartRef) -> Option<&str> {
        match part {
            PartRef::Identifier => Some(&self.identifier.name),
            PartRef::Property(i) => self.properties.get(i).map(|p| p.name.as_str()),
        }
    }

    /// Entities this entity holds foreign keys to (excluding itself).
    pub fn dependencies(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.properties
            .iter()
            .filter_map(|p| p.references.as_deref())
            .filter(|target| *target != self.name && seen.insert(*target))
            .collect()
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(Error::config("entity name and table must not be empty"));
        }
        let mut columns = HashSet::new();
        columns.insert(self.identifier.column.as_str());
        for prop in &self.properties {
            if !columns.insert(prop.column.as_str()) {
                return Err(Error::config(format!(
                    "column '{}' is mapped more than once in entity {}",
                    prop.column, self.name
                )));
            }
            if prop.ty.column_span() != 1 {
                return Err(Error::config(format!(
                    "property {}.{} must map to exactly one column",
                    self.name, prop.name
                )));
            }
        }
        let versions = self.properties.iter().filter(|p| p.version).count();
        if versions > 1 {
            return Err(Error::config(format!(
                "entity {} declares {versions} version properties",
                self.name
            )));
        }
        if self.properties.iter().any(|p| p.version && p.generation != GenerationTiming::Never) {
            return Err(Error::config(format!(
                "version property of {} cannot be database-generated",
                self.name
            )));
        }
        Ok(())
    }
}

/// Builder for [`EntityMetadata`].
#[derive(Debug)]
pub struct EntityMetadataBuilder {
    metadata: EntityMetadata,
}

impl EntityMetadataBuilder {
    #[must_use]
    pub fn property(mut self, part: ModelPart) -> Self {
        self.metadata.properties.push(part);
        self
    }

    #[must_use]
    pub fn collection(mut self, role: impl Into<String>) -> Self {
        self.metadata.collections.push(role.into());
        self
    }

    #[must_use]
    pub fn custom_insert_sql(mut self, sql: impl Into<String>) -> Self {
        self.metadata.custom_insert_sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn custom_update_sql(mut self, sql: impl Into<String>) -> Self {
        self.metadata.custom_update_sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.metadata.mutable = false;
        self
    }

    /// Validate and produce the metadata.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<EntityMetadata> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}
