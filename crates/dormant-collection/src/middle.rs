//! Decoding of collection-table rows.
//!
//! A collection query selects the index columns (lists, arrays, maps) followed
//! by the element columns. Each of the two is described by a
//! [`MiddleComponentData`]: a value mapper plus the position of its first
//! column in the result row.

use std::fmt;
use std::sync::Arc;

use dormant_core::error::TypeError;
use dormant_core::{Error, PersistentType, Result, Row, Value};

/// Maps a collection index or element onto one or more columns of the collection table.
pub trait MiddleComponentMapper: fmt::Debug + Send + Sync {
    /// Column names, in row order.
    fn columns(&self) -> &[String];

    /// The persistent type of the mapped value.
    fn persistent_type(&self) -> &Arc<dyn PersistentType>;

    /// Read the mapped value from `row`, starting at column `start`.
    #[allow(clippy::result_large_err)]
    fn read(&self, row: &Row, start: usize) -> Result<Value> {
        let span = self.columns().len();
        let mut columns = Vec::with_capacity(span);
        for offset in 0..span {
            columns.push(row.require(start + offset)?.clone());
        }
        self.persistent_type().assemble(&columns)
    }

    /// Column values to bind when writing `value`.
    fn write(&self, value: &Value) -> Vec<Value> {
        self.persistent_type().disassemble(value)
    }
}

/// A single-column value.
#[derive(Debug, Clone)]
pub struct SimpleValueMapper {
    columns: Vec<String>,
    ty: Arc<dyn PersistentType>,
}

impl SimpleValueMapper {
    pub fn new(column: impl Into<String>, ty: Arc<dyn PersistentType>) -> Self {
        Self {
            columns: vec![column.into()],
            ty,
        }
    }
}

impl MiddleComponentMapper for SimpleValueMapper {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn persistent_type(&self) -> &Arc<dyn PersistentType> {
        &self.ty
    }

    fn read(&self, row: &Row, start: usize) -> Result<Value> {
        row.require(start).cloned()
    }
}

/// A composite value spread over several columns (an embeddable element or map key).
#[derive(Debug, Clone)]
pub struct ComponentMapper {
    columns: Vec<String>,
    ty: Arc<dyn PersistentType>,
}

impl ComponentMapper {
    /// `ty` must span exactly `columns.len()` columns.
    #[allow(clippy::result_large_err)]
    pub fn new<I, S>(columns: I, ty: Arc<dyn PersistentType>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.len() != ty.column_span() {
            return Err(Error::Type(TypeError {
                expected: "one column per component part",
                actual: format!(
                    "{} columns for {} spanning {}",
                    columns.len(),
                    ty.name(),
                    ty.column_span()
                ),
                column: columns.first().cloned(),
            }));
        }
        Ok(Self { columns, ty })
    }
}

impl MiddleComponentMapper for ComponentMapper {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn persistent_type(&self) -> &Arc<dyn PersistentType> {
        &self.ty
    }
}

/// A mapper paired with the position of its first column in a collection row.
#[derive(Debug, Clone)]
pub struct MiddleComponentData {
    pub mapper: Arc<dyn MiddleComponentMapper>,
    pub column_index: usize,
}

impl MiddleComponentData {
    pub fn new(mapper: Arc<dyn MiddleComponentMapper>, column_index: usize) -> Self {
        Self {
            mapper,
            column_index,
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn read(&self, row: &Row) -> Result<Value> {
        self.mapper.read(row, self.column_index)
    }

    pub fn columns(&self) -> &[String] {
        self.mapper.columns()
    }

    pub fn persistent_type(&self) -> &Arc<dyn PersistentType> {
        self.mapper.persistent_type()
    }

    /// Index one past the last column of this component.
    pub fn end(&self) -> usize {
        self.column_index + self.mapper.columns().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_core::types;

    fn row() -> Row {
        Row::new(
            vec!["idx".into(), "street".into(), "number".into()],
            vec![
                Value::BigInt(2),
                Value::Text("Main".into()),
                Value::Int(12),
            ],
        )
    }

    #[test]
    fn simple_value_reads_its_column() {
        let data = MiddleComponentData::new(Arc::new(SimpleValueMapper::new("idx", types::long())), 0);
        assert_eq!(data.read(&row()).unwrap(), Value::BigInt(2));
        assert_eq!(data.end(), 1);
    }

    #[test]
    fn component_reads_consecutive_columns() {
        let ty = types::component("Address", vec![types::text(), types::integer()]);
        let mapper = ComponentMapper::new(["street", "number"], ty).unwrap();
        let data = MiddleComponentData::new(Arc::new(mapper), 1);
        assert_eq!(
            data.read(&row()).unwrap(),
            Value::Array(vec![Value::Text("Main".into()), Value::Int(12)])
        );
        assert_eq!(data.end(), 3);
    }

    #[test]
    fn component_column_count_must_match_span() {
        let ty = types::component("Address", vec![types::text(), types::integer()]);
        assert!(ComponentMapper::new(["street"], ty).is_err());
    }

    #[test]
    fn reading_past_the_row_fails() {
        let data = MiddleComponentData::new(Arc::new(SimpleValueMapper::new("x", types::long())), 5);
        assert!(data.read(&row()).is_err());
    }
}
