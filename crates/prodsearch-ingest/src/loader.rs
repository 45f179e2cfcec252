//! CSV loading.

use std::fs::File;
use std::path::Path;

use tracing::{error, info};

use prodsearch_core::{Result, SearchError};

/// A catalog as read from disk: header plus untyped string cells.
///
/// Empty cells are kept as empty strings and treated as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCatalog {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawCatalog {
    /// Position of a column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell value, `None` when the column is absent or the cell is blank.
    pub fn cell<'a>(&self, row: &'a [String], column: Option<usize>) -> Option<&'a str> {
        column
            .and_then(|i| row.get(i))
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a headered CSV file.
pub fn load_products(path: &Path) -> Result<RawCatalog> {
    info!("Loading products from {:?}", path);

    let file = File::open(path).map_err(|e| {
        error!("File not found: {:?}", path);
        SearchError::Io(e)
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| SearchError::ingest(format!("Failed to read header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            SearchError::ingest(format!("Malformed CSV record {}: {}", line + 1, e))
        })?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(columns.len(), String::new());
        rows.push(row);
    }

    info!("Successfully loaded {} products", rows.len());
    Ok(RawCatalog { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_products() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,category,title,description,price,url").unwrap();
        writeln!(file, "1,home,Lamp,\"Warm, dimmable\",25.00,https://shop.example.com/p/1").unwrap();
        writeln!(file, "2,home,Rug").unwrap();

        let catalog = load_products(file.path()).unwrap();
        assert_eq!(catalog.columns.len(), 6);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.rows[0][3], "Warm, dimmable");
        // Short rows are padded.
        assert_eq!(catalog.rows[1].len(), 6);

        let price = catalog.column_index("price");
        assert_eq!(catalog.cell(&catalog.rows[0], price), Some("25.00"));
        assert_eq!(catalog.cell(&catalog.rows[1], price), None);
    }

    #[test]
    fn test_missing_file() {
        let err = load_products(Path::new("/nonexistent/products.csv")).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
