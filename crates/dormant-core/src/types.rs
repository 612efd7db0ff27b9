//! Persistent types and their dirtiness predicates.
//!
//! Every mapped property and collection element has a [`PersistentType`]. The
//! type decides when two values are "the same" for dirty-checking purposes,
//! which is not always `Value` equality: integers compare across widths,
//! decimals compare numerically, entity references compare by identifier and
//! components compare part by part.
//!
//! Null handling is fixed and not overridable: a null/non-null transition is
//! always dirty and two nulls are never dirty.

use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;

/// SQL data types understood by [`BasicType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl SqlType {
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Text => "TEXT",
            SqlType::Bytes => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    /// Values of this type can be changed in place, so snapshots need a deep copy
    /// and an unchanged dirty flag does not prove the value is clean.
    pub const fn is_mutable(self) -> bool {
        matches!(self, SqlType::Bytes | SqlType::Json)
    }
}

/// The persistent type of a property, identifier, collection element or index.
pub trait PersistentType: fmt::Debug + Send + Sync {
    /// Human-readable type name, used in logs and errors.
    fn name(&self) -> String;

    /// Type-specific sameness of two non-null values.
    fn is_same(&self, x: &Value, y: &Value) -> bool;

    /// Number of columns a value of this type occupies.
    fn column_span(&self) -> usize {
        1
    }

    /// Whether values may be mutated in place.
    fn is_mutable(&self) -> bool {
        false
    }

    /// Copy used when capturing a snapshot.
    fn deep_copy(&self, value: &Value) -> Value {
        value.clone()
    }

    /// Split a value into its column values.
    fn disassemble(&self, value: &Value) -> Vec<Value> {
        vec![value.clone()]
    }

    /// Rebuild a value from its column values.
    #[allow(clippy::result_large_err)]
    fn assemble(&self, columns: &[Value]) -> Result<Value> {
        columns.first().cloned().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "one column",
                actual: "no columns".to_string(),
                column: None,
            })
        })
    }

    /// Dirtiness predicate: null/non-null transitions are always dirty.
    fn is_dirty(&self, old: &Value, current: &Value) -> bool {
        match (old.is_null(), current.is_null()) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => !self.is_same(old, current),
        }
    }

    /// Equality under the same rules as [`is_dirty`](Self::is_dirty).
    fn is_equal(&self, x: &Value, y: &Value) -> bool {
        !self.is_dirty(x, y)
    }

    /// Canonical form for hashing: two values are equal under this type
    /// exactly when their canonical forms are identical.
    fn normalize(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// A single-column scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicType {
    pub sql_type: SqlType,
}

impl PersistentType for BasicType {
    fn name(&self) -> String {
        self.sql_type.sql_name().to_string()
    }

    fn is_same(&self, x: &Value, y: &Value) -> bool {
        match self.sql_type {
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                match (x.as_i64(), y.as_i64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => x == y,
                }
            }
            SqlType::Decimal => match (x.as_str(), y.as_str()) {
                (Some(a), Some(b)) => normalize_decimal(a) == normalize_decimal(b),
                _ => x == y,
            },
            SqlType::Double => match (x, y) {
                (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits() || a == b,
                _ => x == y,
            },
            _ => x == y,
        }
    }

    fn is_mutable(&self) -> bool {
        self.sql_type.is_mutable()
    }

    fn normalize(&self, value: &Value) -> Value {
        match self.sql_type {
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                value.as_i64().map_or_else(|| value.clone(), Value::BigInt)
            }
            SqlType::Decimal => value
                .as_str()
                .map_or_else(|| value.clone(), |s| Value::Decimal(normalize_decimal(s))),
            SqlType::Double => match value {
                Value::Double(v) if *v == 0.0 => Value::Double(0.0),
                other => other.clone(),
            },
            _ => value.clone(),
        }
    }
}

/// Strip insignificant zeros so `"1.50"` and `"01.5"` compare equal.
fn normalize_decimal(s: &str) -> String {
    let s = s.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    if int_part == "0" && frac_part.is_empty() {
        return "0".to_string();
    }
    if frac_part.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac_part}")
    }
}

/// A reference to another entity, carried as its identifier value.
///
/// Two references are the same when they point at the same identifier, even
/// if the referenced entity was reconstructed in another session.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub entity_name: String,
    pub identifier_type: Arc<dyn PersistentType>,
}

impl PersistentType for EntityType {
    fn name(&self) -> String {
        format!("entity({})", self.entity_name)
    }

    fn is_same(&self, x: &Value, y: &Value) -> bool {
        !self.identifier_type.is_dirty(x, y)
    }

    fn normalize(&self, value: &Value) -> Value {
        self.identifier_type.normalize(value)
    }
}

/// A composite value made of several parts, stored as `Value::Array`.
#[derive(Debug, Clone)]
pub struct ComponentType {
    pub name: String,
    pub parts: Vec<Arc<dyn PersistentType>>,
}

impl ComponentType {
    fn parts_of<'v>(&self, value: &'v Value) -> Option<&'v [Value]> {
        value
            .as_array()
            .filter(|items| items.len() == self.parts.len())
    }
}

impl PersistentType for ComponentType {
    fn name(&self) -> String {
        format!("component({})", self.name)
    }

    fn is_same(&self, x: &Value, y: &Value) -> bool {
        match (self.parts_of(x), self.parts_of(y)) {
            (Some(xs), Some(ys)) => self
                .parts
                .iter()
                .zip(xs.iter().zip(ys))
                .all(|(ty, (a, b))| !ty.is_dirty(a, b)),
            _ => x == y,
        }
    }

    fn column_span(&self) -> usize {
        self.parts.iter().map(|p| p.column_span()).sum()
    }

    fn is_mutable(&self) -> bool {
        true
    }

    fn deep_copy(&self, value: &Value) -> Value {
        match self.parts_of(value) {
            Some(items) => Value::Array(
                self.parts
                    .iter()
                    .zip(items)
                    .map(|(ty, v)| ty.deep_copy(v))
                    .collect(),
            ),
            None => value.clone(),
        }
    }

    fn normalize(&self, value: &Value) -> Value {
        match self.parts_of(value) {
            Some(items) => Value::Array(
                self.parts
                    .iter()
                    .zip(items)
                    .map(|(ty, v)| ty.normalize(v))
                    .collect(),
            ),
            None => value.clone(),
        }
    }

    fn disassemble(&self, value: &Value) -> Vec<Value> {
        match self.parts_of(value) {
            Some(items) => self
                .parts
                .iter()
                .zip(items)
                .flat_map(|(ty, v)| ty.disassemble(v))
                .collect(),
            None => vec![Value::Null; self.column_span()],
        }
    }

    fn assemble(&self, columns: &[Value]) -> Result<Value> {
        let span = self.column_span();
        if columns.len() < span {
            return Err(Error::Type(TypeError {
                expected: "component columns",
                actual: format!("{} of {} columns", columns.len(), span),
                column: None,
            }));
        }
        if columns[..span].iter().all(Value::is_null) {
            return Ok(Value::Null);
        }
        let mut offset = 0;
        let mut parts = Vec::with_capacity(self.parts.len());
        for ty in &self.parts {
            let width = ty.column_span();
            parts.push(ty.assemble(&columns[offset..offset + width])?);
            offset += width;
        }
        Ok(Value::Array(parts))
    }
}

pub fn basic(sql_type: SqlType) -> Arc<dyn PersistentType> {
    Arc::new(BasicType { sql_type })
}

pub fn long() -> Arc<dyn PersistentType> {
    basic(SqlType::BigInt)
}

pub fn integer() -> Arc<dyn PersistentType> {
    basic(SqlType::Integer)
}

pub fn text() -> Arc<dyn PersistentType> {
    basic(SqlType::Text)
}

pub fn decimal() -> Arc<dyn PersistentType> {
    basic(SqlType::Decimal)
}

pub fn entity(entity_name: impl Into<String>, identifier_type: Arc<dyn PersistentType>) -> Arc<dyn PersistentType> {
    Arc::new(EntityType {
        entity_name: entity_name.into(),
        identifier_type,
    })
}

pub fn component(name: impl Into<String>, parts: Vec<Arc<dyn PersistentType>>) -> Arc<dyn PersistentType> {
    Arc::new(ComponentType {
        name: name.into(),
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_transitions_are_dirty() {
        let ty = text();
        assert!(ty.is_dirty(&Value::Null, &Value::Text("a".into())));
        assert!(ty.is_dirty(&Value::Text("a".into()), &Value::Null));
        assert!(!ty.is_dirty(&Value::Null, &Value::Null));
    }

    #[test]
    fn integers_compare_across_widths() {
        let ty = long();
        assert!(!ty.is_dirty(&Value::Int(5), &Value::BigInt(5)));
        assert!(ty.is_dirty(&Value::Int(5), &Value::BigInt(6)));
    }

    #[test]
    fn canonical_forms_agree_with_equality() {
        let ty = long();
        assert_eq!(ty.normalize(&Value::Int(5)), ty.normalize(&Value::BigInt(5)));
        assert_ne!(ty.normalize(&Value::Int(5)), ty.normalize(&Value::BigInt(6)));

        let ty = decimal();
        assert_eq!(
            ty.normalize(&Value::Decimal("1.50".into())),
            ty.normalize(&Value::Text("01.5".into()))
        );

        let ty = component("Line", vec![text(), integer()]);
        let a = Value::Array(vec![Value::Text("x".into()), Value::SmallInt(2)]);
        let b = Value::Array(vec![Value::Text("x".into()), Value::BigInt(2)]);
        assert!(ty.is_equal(&a, &b));
        assert_eq!(ty.normalize(&a), ty.normalize(&b));
        assert_eq!(text().normalize(&Value::Text("a".into())), Value::Text("a".into()));
    }

    #[test]
    fn decimals_compare_numerically() {
        let ty = decimal();
        assert!(!ty.is_dirty(
            &Value::Decimal("1.50".into()),
            &Value::Decimal("01.5".into())
        ));
        assert!(!ty.is_dirty(&Value::Decimal("-0.0".into()), &Value::Decimal("0".into())));
        assert!(ty.is_dirty(&Value::Decimal("1.5".into()), &Value::Decimal("1.05".into())));
    }

    #[test]
    fn entity_references_compare_by_identifier() {
        let ty = entity("Customer", long());
        assert!(!ty.is_dirty(&Value::Int(9), &Value::BigInt(9)));
        assert!(ty.is_dirty(&Value::BigInt(9), &Value::BigInt(10)));
    }

    #[test]
    fn component_round_trip_through_columns() {
        let ty = component("Address", vec![text(), integer()]);
        let value = Value::Array(vec![Value::Text("Main".into()), Value::Int(12)]);
        let columns = ty.disassemble(&value);
        assert_eq!(columns.len(), 2);
        assert_eq!(ty.assemble(&columns).unwrap(), value);
        assert_eq!(ty.assemble(&[Value::Null, Value::Null]).unwrap(), Value::Null);
        assert!(ty.assemble(&[Value::Null]).is_err());
    }

    #[test]
    fn component_dirty_when_any_part_dirty() {
        let ty = component("Money", vec![decimal(), text()]);
        let a = Value::Array(vec![Value::Decimal("2.0".into()), Value::Text("EUR".into())]);
        let b = Value::Array(vec![Value::Decimal("2".into()), Value::Text("EUR".into())]);
        let c = Value::Array(vec![Value::Decimal("2".into()), Value::Text("USD".into())]);
        assert!(!ty.is_dirty(&a, &b));
        assert!(ty.is_dirty(&a, &c));
    }
}
