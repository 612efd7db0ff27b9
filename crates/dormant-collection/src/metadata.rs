//! Collection role mapping.

use std::sync::Arc;

use dormant_core::{Error, PersistentType, Result, Value, ValueKey};

use crate::middle::{MiddleComponentData, MiddleComponentMapper};

/// Shape of a persistent collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Unordered, no duplicates.
    Set,
    /// Ordered by an integer index column.
    List,
    /// Fixed length, ordered by an integer index column.
    Array,
    /// Keyed by an index column.
    Map,
}

impl CollectionKind {
    pub const fn is_indexed(self) -> bool {
        !matches!(self, CollectionKind::Set)
    }

    pub const fn name(self) -> &'static str {
        match self {
            CollectionKind::Set => "set",
            CollectionKind::List => "list",
            CollectionKind::Array => "array",
            CollectionKind::Map => "map",
        }
    }
}

/// How one collection role maps onto its collection table.
///
/// Rows of the table carry the owner's identifier in `key_column`, then the
/// index columns (indexed kinds only), then the element columns.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    /// `Entity.property`, unique within a session factory.
    pub role: String,
    pub owner_entity: String,
    pub table: String,
    pub key_column: String,
    pub kind: CollectionKind,
    pub element: MiddleComponentData,
    pub index: Option<MiddleComponentData>,
    /// The other side of the association owns the rows; this role issues no SQL.
    pub inverse: bool,
    /// Size, containment and positional reads query the database instead of loading.
    pub extra_lazy: bool,
    pub mutable: bool,
    pub orphan_removal: bool,
}

impl CollectionMetadata {
    pub fn builder(
        role: impl Into<String>,
        owner_entity: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        kind: CollectionKind,
    ) -> CollectionMetadataBuilder {
        CollectionMetadataBuilder {
            role: role.into(),
            owner_entity: owner_entity.into(),
            table: table.into(),
            key_column: key_column.into(),
            kind,
            element: None,
            index: None,
            inverse: false,
            extra_lazy: false,
            mutable: true,
            orphan_removal: false,
        }
    }

    pub fn element_type(&self) -> &Arc<dyn PersistentType> {
        self.element.persistent_type()
    }

    pub fn index_type(&self) -> Option<&Arc<dyn PersistentType>> {
        self.index.as_ref().map(MiddleComponentData::persistent_type)
    }

    /// Hash key of an element; elements equal under the element type share a key.
    pub fn element_key(&self, element: &Value) -> ValueKey {
        ValueKey(self.element_type().normalize(element))
    }

    /// Hash key of a map key under the index type.
    pub fn index_key(&self, key: &Value) -> ValueKey {
        ValueKey(self.index_type().map_or_else(|| key.clone(), |ty| ty.normalize(key)))
    }

    pub fn index_columns(&self) -> &[String] {
        self.index.as_ref().map_or(&[][..], |index| index.columns())
    }

    pub fn element_columns(&self) -> &[String] {
        self.element.columns()
    }

    /// Columns a load query selects, in row order.
    pub fn selected_columns(&self) -> Vec<String> {
        self.index_columns()
            .iter()
            .chain(self.element_columns())
            .cloned()
            .collect()
    }
}

/// Builder for [`CollectionMetadata`].
#[derive(Debug)]
pub struct CollectionMetadataBuilder {
    role: String,
    owner_entity: String,
    table: String,
    key_column: String,
    kind: CollectionKind,
    element: Option<Arc<dyn MiddleComponentMapper>>,
    index: Option<Arc<dyn MiddleComponentMapper>>,
    inverse: bool,
    extra_lazy: bool,
    mutable: bool,
    orphan_removal: bool,
}

impl CollectionMetadataBuilder {
    #[must_use]
    pub fn element(mut self, mapper: impl MiddleComponentMapper + 'static) -> Self {
        self.element = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub fn index(mut self, mapper: impl MiddleComponentMapper + 'static) -> Self {
        self.index = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    #[must_use]
    pub fn extra_lazy(mut self) -> Self {
        self.extra_lazy = true;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    #[must_use]
    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Validate the mapping and lay out the row positions of index and element.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<CollectionMetadata> {
        let role = self.role;
        if role.is_empty() || self.table.is_empty() || self.key_column.is_empty() {
            return Err(Error::config("collection role, table and key column must not be empty"));
        }
        let element = self
            .element
            .ok_or_else(|| Error::config(format!("collection {role} has no element mapping")))?;
        let index = match (self.kind.is_indexed(), self.index) {
            (true, Some(index)) => Some(MiddleComponentData::new(index, 0)),
            (true, None) => {
                return Err(Error::config(format!(
                    "{} role {role} requires an index mapping",
                    self.kind.name()
                )));
            }
            (false, Some(_)) => {
                return Err(Error::config(format!("set role {role} cannot have an index mapping")));
            }
            (false, None) => None,
        };
        let element = MiddleComponentData::new(element, index.as_ref().map_or(0, MiddleComponentData::end));
        Ok(CollectionMetadata {
            role,
            owner_entity: self.owner_entity,
            table: self.table,
            key_column: self.key_column,
            kind: self.kind,
            element,
            index,
            inverse: self.inverse,
            extra_lazy: self.extra_lazy,
            mutable: self.mutable,
            orphan_removal: self.orphan_removal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::SimpleValueMapper;
    use dormant_core::types;

    #[test]
    fn element_follows_index_columns() {
        let meta = CollectionMetadata::builder("Order.lines", "Order", "order_lines", "order_id", CollectionKind::List)
            .index(SimpleValueMapper::new("position", types::integer()))
            .element(SimpleValueMapper::new("sku", types::text()))
            .build()
            .unwrap();
        assert_eq!(meta.index.as_ref().unwrap().column_index, 0);
        assert_eq!(meta.element.column_index, 1);
        assert_eq!(meta.selected_columns(), vec!["position", "sku"]);
    }

    #[test]
    fn list_without_index_is_rejected() {
        let err = CollectionMetadata::builder("Order.lines", "Order", "order_lines", "order_id", CollectionKind::List)
            .element(SimpleValueMapper::new("sku", types::text()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requires an index"));
    }

    #[test]
    fn set_with_index_is_rejected() {
        let result = CollectionMetadata::builder("Order.tags", "Order", "order_tags", "order_id", CollectionKind::Set)
            .index(SimpleValueMapper::new("position", types::integer()))
            .element(SimpleValueMapper::new("tag", types::text()))
            .build();
        assert!(result.is_err());
    }
}
