//! Per-user settings.
//!
//! Settings are stored as an opaque JSONB document on the user row; the
//! engine only reads the fields it understands and ignores the rest, so the
//! settings schema can grow without migrations.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default page size for stream listing.
pub const DEFAULT_LIST_COUNT: i64 = 20;

/// Largest page size a user may configure.
pub const MAX_LIST_COUNT: i64 = 100;

/// Typed view over the per-user settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    /// Page-size hint for stream listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_count: Option<i64>,
}

impl UserSettings {
    /// Parse from the raw settings document, ignoring unknown fields.
    /// A malformed document falls back to defaults rather than failing the
    /// read path.
    pub fn from_json(value: &JsonValue) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Effective page size, clamped to `[1, MAX_LIST_COUNT]`.
    pub fn list_count(&self) -> i64 {
        self.list_count
            .unwrap_or(DEFAULT_LIST_COUNT)
            .clamp(1, MAX_LIST_COUNT)
    }
}
