//! Result-set summaries and file exports.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use prodsearch_core::{Candidate, Result, SearchError};

use crate::format::to_result_row;

/// Aggregate view of a result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub total_results: usize,
    /// `(min, max)` over results that carry a price.
    pub price_range: Option<(f64, f64)>,
    /// Distinct categories, sorted.
    pub categories: Vec<String>,
    /// Mean over priced results, `0.0` when none are priced.
    pub avg_price: f64,
}

impl SearchSummary {
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        let prices: Vec<f64> = candidates
            .iter()
            .filter_map(|c| c.metadata.price.filter(|p| p.is_finite()))
            .collect();

        let categories: BTreeSet<String> = candidates
            .iter()
            .filter_map(|c| c.metadata.category.clone())
            .filter(|c| !c.is_empty())
            .collect();

        let price_range = prices.iter().copied().reduce(f64::min).map(|min| {
            let max = prices.iter().copied().fold(min, f64::max);
            (min, max)
        });

        let avg_price = if prices.is_empty() {
            0.0
        } else {
            prices.iter().sum::<f64>() / prices.len() as f64
        };

        Self {
            total_results: candidates.len(),
            price_range,
            categories: categories.into_iter().collect(),
            avg_price,
        }
    }
}

#[derive(Serialize)]
struct JsonExport<'a> {
    timestamp: String,
    total_results: usize,
    results: &'a [Candidate],
}

/// Write results as CSV. Returns `false`, writing nothing, for an empty list.
pub fn export_csv(candidates: &[Candidate], path: &Path) -> Result<bool> {
    if candidates.is_empty() {
        warn!("No results to export");
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| SearchError::internal(format!("Failed to create {:?}: {}", path, e)))?;
    for candidate in candidates {
        writer
            .serialize(to_result_row(candidate))
            .map_err(|e| SearchError::internal(format!("Failed to write CSV row: {}", e)))?;
    }
    writer.flush()?;

    info!("Results exported to {:?}", path);
    Ok(true)
}

/// Write results as timestamped JSON. Returns `false` for an empty list.
pub fn export_json(candidates: &[Candidate], path: &Path) -> Result<bool> {
    if candidates.is_empty() {
        warn!("No results to export");
        return Ok(false);
    }

    let export = JsonExport {
        timestamp: chrono::Local::now().to_rfc3339(),
        total_results: candidates.len(),
        results: candidates,
    };
    std::fs::write(path, serde_json::to_string_pretty(&export)?)?;

    info!("Results exported to {:?}", path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodsearch_core::ProductMetadata;

    fn candidate(id: i64, category: Option<&str>, price: Option<f64>) -> Candidate {
        Candidate {
            id,
            similarity: 0.5,
            metadata: ProductMetadata {
                id: Some(id),
                title: Some(format!("Item {}", id)),
                category: category.map(str::to_string),
                price,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_summary() {
        let summary = SearchSummary::from_candidates(&[
            candidate(1, Some("Home"), Some(10.0)),
            candidate(2, Some("Garden"), Some(30.0)),
            candidate(3, Some("Home"), None),
        ]);
        assert_eq!(summary.total_results, 3);
        assert_eq!(summary.price_range, Some((10.0, 30.0)));
        assert_eq!(summary.categories, vec!["Garden", "Home"]);
        assert_eq!(summary.avg_price, 20.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = SearchSummary::from_candidates(&[]);
        assert_eq!(summary.total_results, 0);
        assert_eq!(summary.price_range, None);
        assert!(summary.categories.is_empty());
        assert_eq!(summary.avg_price, 0.0);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let written = export_csv(&[candidate(7, Some("Home"), Some(12.5))], &path).unwrap();
        assert!(written);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,title,description,category,price,url,similarity_score")
        );
        assert_eq!(lines.next(), Some("7,Item 7,,Home,12.5,,0.5"));
    }

    #[test]
    fn test_export_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        assert!(export_json(&[candidate(1, None, None)], &path).unwrap());
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_results"], 1);
        assert_eq!(value["results"][0]["id"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_empty_export_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert!(!export_csv(&[], &path).unwrap());
        assert!(!export_json(&[], &path).unwrap());
        assert!(!path.exists());
    }
}
