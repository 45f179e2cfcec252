//! JSON Schema for catalog products.

use std::path::Path;

use serde_json::{json, Value};
use tracing::info;

use prodsearch_core::Result;

/// Version stamped into the generated schema.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// JSON Schema (draft 2020-12) describing one product record.
pub fn product_json_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://example.com/schemas/product.schema.json",
        "title": "Product",
        "version": SCHEMA_VERSION,
        "type": "object",
        "properties": {
            "id": {
                "type": "integer",
                "description": "Unique product identifier"
            },
            "category": {
                "type": "string",
                "description": "Top-level product category"
            },
            "title": {
                "type": "string",
                "description": "Product title or name"
            },
            "description": {
                "type": "string",
                "description": "Product description"
            },
            "price": {
                "type": "number",
                "minimum": 0,
                "description": "Product price (non-negative)"
            },
            "url": {
                "type": "string",
                "format": "uri",
                "minLength": 1,
                "description": "Product URL (HTTP/HTTPS)"
            }
        },
        "required": ["id", "category", "title", "description", "price", "url"]
    })
}

/// Write the schema, pretty-printed, creating parent directories.
pub fn save_json_schema(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let text = serde_json::to_string_pretty(&product_json_schema())?;
    std::fs::write(path, text)?;
    info!("Wrote product schema to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REQUIRED_COLUMNS;

    #[test]
    fn test_schema_lists_required_columns() {
        let schema = product_json_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, REQUIRED_COLUMNS.to_vec());
        assert_eq!(schema["version"], SCHEMA_VERSION);
        assert_eq!(schema["properties"]["price"]["minimum"], 0);
    }

    #[test]
    fn test_save_json_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs").join("product.schema.json");
        save_json_schema(&path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["title"], "Product");
    }
}
