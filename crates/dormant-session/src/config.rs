//! Session configuration.

use dormant_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// When a session writes pending changes without an explicit `flush()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Flush before commit and before reading an entity from the database.
    #[default]
    Auto,
    /// Flush before commit only.
    Commit,
    /// Never flush implicitly.
    Manual,
}

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Begin a transaction on the first operation that needs one.
    pub auto_begin: bool,
    /// Write only dirty columns in updates instead of every updatable column.
    pub dynamic_update: bool,
    /// Allow reading generated keys from the driver when `RETURNING` is unavailable.
    pub use_get_generated_keys: bool,
    /// Order inserts so that referenced entities are written first.
    pub order_inserts: bool,
    /// Let inverse and extra-lazy collections queue mutations instead of loading.
    pub operation_queue: bool,
    pub flush_mode: FlushMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            dynamic_update: false,
            use_get_generated_keys: true,
            order_inserts: true,
            operation_queue: true,
            flush_mode: FlushMode::Auto,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; absent keys keep their defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid session configuration: {e}")))
    }

    #[must_use]
    pub fn auto_begin(mut self, enabled: bool) -> Self {
        self.auto_begin = enabled;
        self
    }

    #[must_use]
    pub fn dynamic_update(mut self, enabled: bool) -> Self {
        self.dynamic_update = enabled;
        self
    }

    #[must_use]
    pub fn use_get_generated_keys(mut self, enabled: bool) -> Self {
        self.use_get_generated_keys = enabled;
        self
    }

    #[must_use]
    pub fn order_inserts(mut self, enabled: bool) -> Self {
        self.order_inserts = enabled;
        self
    }

    #[must_use]
    pub fn operation_queue(mut self, enabled: bool) -> Self {
        self.operation_queue = enabled;
        self
    }

    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }
}
