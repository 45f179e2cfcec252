//! Result projections.

use prodsearch_core::{Candidate, RankedResult, ResultRow};

/// Caller-facing `{title, price, url}` view of a candidate.
pub fn to_ranked_result(candidate: &Candidate) -> RankedResult {
    let md = &candidate.metadata;
    RankedResult {
        title: md.title.clone(),
        price: md.price,
        url: md.url.clone(),
    }
}

/// Project candidates in order.
pub fn format_results(candidates: &[Candidate]) -> Vec<RankedResult> {
    candidates.iter().map(to_ranked_result).collect()
}

/// Detailed row for one candidate.
pub fn to_result_row(c: &Candidate) -> ResultRow {
    ResultRow {
        id: c.id,
        title: c.metadata.title.clone(),
        description: c.metadata.description.clone(),
        category: c.metadata.category.clone(),
        price: c.metadata.price,
        url: c.metadata.url.clone(),
        similarity_score: c.similarity,
    }
}

/// Detailed rows, highest similarity first (stable on ties).
pub fn result_rows(candidates: &[Candidate]) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = candidates.iter().map(to_result_row).collect();
    rows.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    rows
}
