//! prodsearch-ingest - product catalog ingestion
//!
//! Reads a product CSV, reports on its quality, and cleans it into
//! [`Product`](prodsearch_core::Product) records ready to embed.

mod loader;
mod preprocess;
mod schema;
mod stats;

pub use loader::{load_products, RawCatalog};
pub use preprocess::{preprocess, product_text, title_case, validate, CleanCatalog, ValidationReport};
pub use schema::{product_json_schema, save_json_schema, SCHEMA_VERSION};
pub use stats::{CatalogStatistics, PriceStatistics};

/// Columns every catalog must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 6] = ["id", "category", "title", "description", "price", "url"];
