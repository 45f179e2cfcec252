//! Database schema definitions.

/// Relational schema for product rows.
pub const SCHEMA: &str = r#"
-- Products table
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    category TEXT,
    title TEXT,
    description TEXT,
    price REAL,
    url TEXT,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
CREATE INDEX IF NOT EXISTS idx_products_price ON products(price);

-- Store metadata (dimension, schema version)
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema for the sqlite-vec virtual table.
/// This must be created separately after the extension is available.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_products USING vec0(
    product_id INTEGER PRIMARY KEY,
    embedding float[{}] distance_metric=cosine
);
"#,
        dimension
    )
}

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
