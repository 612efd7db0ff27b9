//! Dirty detection for managed entities.
//!
//! Entity state is compared property by property with the state captured at
//! load (or at the last flush). A property is dirty exactly when its
//! persistent type's dirtiness predicate says so; a null on one side only is
//! always dirty.

use dormant_core::{Error, ModelPart, Result, Value};

use crate::context::{EntityEntry, EntityStatus};

/// Indexes of the properties whose current value differs from the loaded one.
///
/// Properties that are neither updatable nor version properties never count
/// as dirty.
#[tracing::instrument(level = "trace", skip_all)]
pub fn find_dirty(properties: &[ModelPart], loaded: &[Value], current: &[Value]) -> Vec<usize> {
    let dirty: Vec<usize> = properties
        .iter()
        .enumerate()
        .filter(|(_, part)| part.updatable || part.version)
        .filter(|(i, part)| match (loaded.get(*i), current.get(*i)) {
            (Some(old), Some(new)) => part.ty.is_dirty(old, new),
            (None, None) => false,
            _ => true,
        })
        .map(|(i, _)| i)
        .collect();
    tracing::trace!(dirty = ?dirty, "Dirty check result");
    dirty
}

/// Dirty properties of a managed entry, or nothing when it needs no update.
pub fn dirty_properties(entry: &EntityEntry) -> Vec<usize> {
    if entry.status != EntityStatus::Managed || !entry.exists_in_database {
        return Vec::new();
    }
    let Some(loaded) = &entry.loaded_state else {
        return Vec::new();
    };
    find_dirty(&entry.metadata.properties, loaded, &entry.state)
}

/// The version value that follows `current`.
#[allow(clippy::result_large_err)]
pub fn next_version(current: &Value) -> Result<Value> {
    match current {
        Value::Null => Ok(Value::BigInt(0)),
        Value::SmallInt(v) => Ok(Value::SmallInt(v.wrapping_add(1))),
        Value::Int(v) => Ok(Value::Int(v.wrapping_add(1))),
        Value::BigInt(v) => Ok(Value::BigInt(v.wrapping_add(1))),
        other => Err(Error::Custom(format!(
            "cannot increment version value of type {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_core::types;

    fn parts() -> Vec<ModelPart> {
        vec![
            ModelPart::new("number", "number", types::text()),
            ModelPart::new("total", "total", types::decimal()),
            ModelPart::new("created", "created", types::text()).immutable(),
            ModelPart::new("version", "version", types::long()).version(),
        ]
    }

    #[test]
    fn reports_only_changed_properties() {
        let loaded = vec![
            Value::Text("A-1".into()),
            Value::Decimal("9.50".into()),
            Value::Text("today".into()),
            Value::BigInt(1),
        ];
        let mut current = loaded.clone();
        current[1] = Value::Decimal("9.5".into());
        assert!(find_dirty(&parts(), &loaded, &current).is_empty());

        current[0] = Value::Null;
        current[2] = Value::Text("yesterday".into());
        assert_eq!(find_dirty(&parts(), &loaded, &current), vec![0]);
    }

    #[test]
    fn null_transitions_are_dirty() {
        let loaded = vec![Value::Null, Value::Null, Value::Null, Value::BigInt(0)];
        let mut current = loaded.clone();
        current[1] = Value::Decimal("0".into());
        assert_eq!(find_dirty(&parts(), &loaded, &current), vec![1]);
    }

    #[test]
    fn versions_increment() {
        assert_eq!(next_version(&Value::BigInt(4)).unwrap(), Value::BigInt(5));
        assert_eq!(next_version(&Value::Int(1)).unwrap(), Value::Int(2));
        assert_eq!(next_version(&Value::Null).unwrap(), Value::BigInt(0));
        assert!(next_version(&Value::Text("x".into())).is_err());
    }
}
