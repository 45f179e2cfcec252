//! Catalog validation and cleaning.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use prodsearch_core::{Product, ProductId, Result, SearchError};

use crate::loader::RawCatalog;
use crate::REQUIRED_COLUMNS;

/// Data-quality summary of a raw catalog. Nothing is modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total_rows: usize,
    /// Blank cells per column.
    pub missing_values: BTreeMap<String, usize>,
    /// Rows identical to an earlier row.
    pub duplicates: usize,
    pub required_columns_present: bool,
    pub missing_columns: Vec<String>,
}

/// Quality-check a raw catalog.
pub fn validate(catalog: &RawCatalog) -> ValidationReport {
    let missing_columns: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| catalog.column_index(c).is_none())
        .map(|c| c.to_string())
        .collect();

    let missing_values = catalog
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let blanks = catalog
                .rows
                .iter()
                .filter(|row| catalog.cell(row, Some(i)).is_none())
                .count();
            (name.clone(), blanks)
        })
        .collect();

    let mut seen = HashSet::new();
    let duplicates = catalog.rows.iter().filter(|row| !seen.insert(*row)).count();

    let report = ValidationReport {
        total_rows: catalog.len(),
        missing_values,
        duplicates,
        required_columns_present: missing_columns.is_empty(),
        missing_columns,
    };

    info!("Data validation completed");
    info!("Total rows: {}", report.total_rows);
    info!("Missing values: {:?}", report.missing_values);
    info!("Duplicates: {}", report.duplicates);

    report
}

/// Result of cleaning a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanCatalog {
    pub products: Vec<Product>,
    /// Exact duplicate rows removed.
    pub duplicate_rows: usize,
    /// Rows dropped for missing or invalid fields.
    pub invalid_rows: usize,
    /// Later rows dropped because their id was already taken.
    pub duplicate_ids: usize,
}

/// Clean a raw catalog into products.
///
/// Fails only when a required column is absent; bad rows are dropped and
/// counted.
pub fn preprocess(catalog: &RawCatalog) -> Result<CleanCatalog> {
    let mut idx = [0usize; 6];
    for (slot, name) in idx.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = catalog
            .column_index(name)
            .ok_or_else(|| SearchError::ingest(format!("Missing required column: {}", name)))?;
    }
    let [id_col, category_col, title_col, description_col, price_col, url_col] = idx;

    let mut seen_rows = HashSet::new();
    let mut seen_ids: HashSet<ProductId> = HashSet::new();
    let mut clean = CleanCatalog {
        products: Vec::new(),
        duplicate_rows: 0,
        invalid_rows: 0,
        duplicate_ids: 0,
    };

    for (line, row) in catalog.rows.iter().enumerate() {
        if !seen_rows.insert(row) {
            clean.duplicate_rows += 1;
            continue;
        }

        let cell = |col: usize| catalog.cell(row, Some(col)).map(str::trim);

        let parsed = (|| {
            let id = parse_id(cell(id_col)?)?;
            let price = parse_price(cell(price_col)?)?;
            Some(Product {
                id,
                category: title_case(cell(category_col)?),
                title: cell(title_col)?.to_string(),
                description: cell(description_col).unwrap_or("").to_string(),
                price,
                url: cell(url_col).filter(|u| is_web_url(u))?.to_string(),
            })
        })();

        let Some(product) = parsed else {
            warn!("Dropping invalid catalog row {}", line + 1);
            clean.invalid_rows += 1;
            continue;
        };

        if !seen_ids.insert(product.id) {
            clean.duplicate_ids += 1;
            continue;
        }

        clean.products.push(product);
    }

    info!(
        "Preprocessing completed. Cleaned {} -> {} rows (removed {} duplicate IDs)",
        catalog.len(),
        clean.products.len(),
        clean.duplicate_ids
    );

    Ok(clean)
}

/// Positive integer id; integral decimals such as `7.0` are accepted.
fn parse_id(raw: &str) -> Option<ProductId> {
    raw.parse::<ProductId>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as ProductId)
        })
        .filter(|id| *id > 0)
}

/// Finite, non-negative price.
fn parse_price(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
}

fn is_web_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Capitalize the first letter of every word and lowercase the rest.
///
/// A word starts at any letter not preceded by another letter, so
/// `"home & kitchen"` becomes `"Home & Kitchen"`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = false;
        }
    }
    out
}

/// Text embedded for a product.
pub fn product_text(product: &Product) -> String {
    product.embedding_text()
}
