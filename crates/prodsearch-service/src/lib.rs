//! prodsearch-service - the product search context object
//!
//! [`SearchService`] owns the open vector store, the embedder and the hybrid
//! ranker for the lifetime of a process. Callers build it once, reuse it
//! across requests and close it with [`SearchService::shutdown`].
//!
//! # Operations
//!
//! - `search` - hybrid search with request validation and `top_k` clamping
//! - `semantic` - plain vector search with a similarity floor
//! - `ingest_csv` / `ingest_products` - embed and upsert catalog products
//! - `product`, `recommend`, `by_category`, `by_price_range` - catalog lookups
//! - `stats` - store size and dimension
//! - `evaluate` - latency over a fixed query set

mod service;

pub use service::{
    EvalQuery, EvalReport, IngestReport, SearchParams, SearchResponse, SearchService, EVAL_QUERIES,
};
