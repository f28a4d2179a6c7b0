//! Structured record exposed by the query surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted document of a material, tagged with the standard it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredRecord {
    /// The extracted JSON document as written by the extract stage
    pub data: Value,

    /// `Material.BelongsToStandard.StandardCode`, or `"Unknown"`
    pub standard: String,

    /// `Material.BelongsToStandard.Description`, or empty
    pub description: String,
}

impl StructuredRecord {
    /// Wrap an extracted document, reading the standard it belongs to.
    pub fn from_data(data: Value) -> Self {
        let belongs_to = data
            .get("Material")
            .and_then(|m| m.get("BelongsToStandard"));

        let standard = belongs_to
            .and_then(|b| b.get("StandardCode"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let description = belongs_to
            .and_then(|b| b.get("Description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            data,
            standard,
            description,
        }
    }
}
