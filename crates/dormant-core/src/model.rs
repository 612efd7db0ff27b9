//! Model trait for mapping structs onto entity state.
//!
//! An entity's persistent state is an ordered `Vec<Value>`, one value per
//! property of its [`EntityMetadata`]. The `Model` trait converts between a
//! struct and that representation; the session never inspects the struct
//! itself.

use crate::Result;
use crate::metadata::EntityMetadata;
use crate::value::Value;

/// Trait for structs that map to entities.
///
/// # Example
///
/// ```ignore
/// impl Model for Order {
///     const ENTITY_NAME: &'static str = "Order";
///
///     fn metadata() -> Result<EntityMetadata> {
///         EntityMetadata::builder("Order", "orders", IdentifierPart::assigned("id", "id", types::long()))
///             .property(ModelPart::new("total", "total", types::decimal()))
///             .build()
///     }
///
///     fn identifier(&self) -> Value { Value::BigInt(self.id) }
///     fn state(&self) -> Vec<Value> { vec![Value::Decimal(self.total.clone())] }
///     fn from_state(id: Value, state: Vec<Value>) -> Result<Self> { /* ... */ }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// Entity name, unique within a session factory.
    const ENTITY_NAME: &'static str;

    /// Mapping metadata; consulted once while the session factory is built.
    #[allow(clippy::result_large_err)]
    fn metadata() -> Result<EntityMetadata>;

    /// Current identifier value (`Value::Null` when not yet generated).
    fn identifier(&self) -> Value;

    /// Property values in metadata order.
    fn state(&self) -> Vec<Value>;

    /// Rebuild an instance from an identifier and property values.
    #[allow(clippy::result_large_err)]
    fn from_state(identifier: Value, state: Vec<Value>) -> Result<Self>;
}
