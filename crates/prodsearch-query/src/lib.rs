//! prodsearch-query - hybrid product ranking
//!
//! Turns a free-text query into ranked products:
//!
//! 1. extract a price constraint from the query text
//! 2. embed the query and over-fetch nearest neighbours
//! 3. drop candidates outside the price constraint
//! 4. re-score survivors with BM25 and fuse with vector similarity
//!
//! Also hosts the non-hybrid catalog searches and result exports.

pub mod catalog;
pub mod format;
pub mod lexical;
pub mod parser;
pub mod ranker;
pub mod summary;

pub use catalog::CatalogSearch;
pub use format::{format_results, result_rows, to_ranked_result, to_result_row};
pub use lexical::{bm25_scores, min_max_normalize, tokenize, Bm25};
pub use parser::{parse_price_constraint, BoundKind, PriceConstraintParser, PriceMatcher};
pub use ranker::{HybridRanker, RankTrace, ScoredCandidate};
pub use summary::{export_csv, export_json, SearchSummary};
