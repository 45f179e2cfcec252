//! Search service: the long-lived context shared by every request.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use prodsearch_core::{
    Candidate, Embedder, PriceConstraint, Product, ProductId, ProductMetadata, ProductSearchConfig,
    RankedResult, Result, SearchConfig, SearchError, StoreStats, VectorStore,
};
use prodsearch_embed::{MockEmbedder, OnnxEmbedder};
use prodsearch_ingest::{load_products, preprocess, product_text, validate, ValidationReport};
use prodsearch_query::{format_results, CatalogSearch, HybridRanker};
use prodsearch_store::{open_store, AnyStore};

/// Queries run by [`SearchService::evaluate`] when none are given.
pub const EVAL_QUERIES: [&str; 10] = [
    "linen summer dress under $300",
    "running shoes under $120",
    "wireless earbuds under $80",
    "coffee maker under $100",
    "gaming mouse",
    "4k tv under $600",
    "winter jacket",
    "yoga mat under $30",
    "portable bluetooth speaker",
    "office chair ergonomic under $200",
];

/// Search request parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchParams {
    /// The search query.
    pub query: String,

    /// Maximum number of results; defaults to `search.default_top_k` and is
    /// clamped to `[1, search.max_top_k]`.
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// Search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Result count actually requested from the ranker after clamping.
    pub top_k: usize,
    pub constraint: PriceConstraint,
    pub results: Vec<RankedResult>,
}

/// Outcome of loading a catalog into the store.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub validation: ValidationReport,
    /// Products embedded and upserted.
    pub ingested: usize,
    pub duplicate_rows: usize,
    pub invalid_rows: usize,
    pub duplicate_ids: usize,
}

/// Latency of one evaluation query.
#[derive(Debug, Clone, Serialize)]
pub struct EvalQuery {
    pub query: String,
    pub latency_ms: f64,
    pub results: Vec<RankedResult>,
}

/// Latency summary over an evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub backend: String,
    pub queries: Vec<EvalQuery>,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

/// Product search service state.
pub struct SearchService {
    store: Arc<AnyStore>,
    embedder: Arc<dyn Embedder>,
    ranker: HybridRanker<AnyStore, dyn Embedder>,
    catalog: CatalogSearch<AnyStore, dyn Embedder>,
    config: SearchConfig,
    batch_size: usize,
}

impl SearchService {
    /// Open the configured store and load the ONNX embedder.
    pub async fn open(config: &ProductSearchConfig) -> Result<Self> {
        let embedder = OnnxEmbedder::from_config(&config.embedding)?
            .with_dimension(config.store.dimension);
        Self::open_with_embedder(config, Arc::new(embedder)).await
    }

    /// Open the configured store with a deterministic embedder that needs no
    /// model files.
    pub async fn open_mock(config: &ProductSearchConfig) -> Result<Self> {
        let embedder = MockEmbedder::with_config(config.store.dimension, config.embedding.max_tokens);
        Self::open_with_embedder(config, Arc::new(embedder)).await
    }

    /// Open the configured store around an existing embedder.
    pub async fn open_with_embedder(
        config: &ProductSearchConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing search service: backend={}, model={}",
            config.store.backend,
            embedder.model_name()
        );

        let store = Arc::new(open_store(&config.store).await?);
        let mut service = Self::from_parts(store, embedder, config.search.clone())?;
        service.batch_size = config.embedding.batch_size.max(1);
        Ok(service)
    }

    /// Assemble a service from already-open collaborators.
    pub fn from_parts(
        store: Arc<AnyStore>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Result<Self> {
        if store.dimension() != embedder.dimension() {
            return Err(SearchError::config(format!(
                "embedder '{}' produces {}-dimensional vectors, store expects {}",
                embedder.model_name(),
                embedder.dimension(),
                store.dimension()
            )));
        }

        let ranker = HybridRanker::with_config(store.clone(), embedder.clone(), config.clone());
        let catalog = CatalogSearch::new(store.clone(), embedder.clone());

        Ok(Self {
            store,
            embedder,
            ranker,
            catalog,
            config,
            batch_size: 32,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AnyStore> {
        &self.store
    }

    /// Hybrid search.
    pub async fn search(&self, params: SearchParams) -> Result<SearchResponse> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err(SearchError::validation("query must not be empty"));
        }
        let top_k = self.config.clamp_top_k(params.top_k);

        info!("Searching for: {:?} (top_k={})", query, top_k);
        let trace = self.ranker.rank_scored(query, top_k).await?;
        let ranked: Vec<Candidate> = trace.results.into_iter().map(|s| s.candidate).collect();

        Ok(SearchResponse {
            query: query.to_string(),
            top_k,
            constraint: trace.constraint,
            results: format_results(&ranked),
        })
    }

    /// Plain vector search without price parsing or lexical re-scoring.
    pub async fn semantic(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_similarity: f32,
    ) -> Result<Vec<Candidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::validation("query must not be empty"));
        }
        let top_k = self.config.clamp_top_k(top_k);
        self.catalog.semantic_search(query, top_k, min_similarity).await
    }

    /// Load, clean, embed and upsert a catalog CSV.
    pub async fn ingest_csv(&self, path: &Path) -> Result<IngestReport> {
        info!("Ingesting catalog from {:?}", path);

        let raw = load_products(path)?;
        let validation = validate(&raw);
        let clean = preprocess(&raw)?;
        let ingested = self.ingest_products(&clean.products).await?;

        Ok(IngestReport {
            validation,
            ingested,
            duplicate_rows: clean.duplicate_rows,
            invalid_rows: clean.invalid_rows,
            duplicate_ids: clean.duplicate_ids,
        })
    }

    /// Embed and upsert products, one embedding batch at a time.
    pub async fn ingest_products(&self, products: &[Product]) -> Result<usize> {
        if products.is_empty() {
            warn!("No products to ingest");
            return Ok(0);
        }

        for (n, batch) in products.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(product_text).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = self.embedder.embed_batch(&refs).await?;

            let metadata: Vec<ProductMetadata> = batch.iter().map(Product::metadata).collect();
            let ids: Vec<ProductId> = batch.iter().map(|p| p.id).collect();
            self.store.add(&vectors, &metadata, &ids).await?;

            info!("Embedded batch {} ({} products)", n + 1, batch.len());
        }

        info!("Ingested {} products", products.len());
        Ok(products.len())
    }

    /// Stored metadata for one product.
    pub async fn product(&self, id: ProductId) -> Result<ProductMetadata> {
        self.catalog.product(id).await
    }

    /// Products most similar to `id`.
    pub async fn recommend(&self, id: ProductId, top_k: Option<usize>) -> Result<Vec<Candidate>> {
        let top_k = self.config.clamp_top_k(top_k);
        self.catalog.recommendations(id, top_k).await
    }

    /// Products in one category.
    pub async fn by_category(&self, category: &str, top_k: Option<usize>) -> Result<Vec<Candidate>> {
        if category.trim().is_empty() {
            return Err(SearchError::validation("category must not be empty"));
        }
        let top_k = self.config.clamp_top_k(top_k);
        self.catalog.search_by_category(category, top_k).await
    }

    /// Products priced within `[min_price, max_price]`, cheapest first.
    pub async fn by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        top_k: Option<usize>,
    ) -> Result<Vec<Candidate>> {
        if !min_price.is_finite() || !max_price.is_finite() || min_price > max_price {
            return Err(SearchError::validation(format!(
                "invalid price range {}-{}",
                min_price, max_price
            )));
        }
        let top_k = self.config.clamp_top_k(top_k);
        self.catalog
            .search_by_price_range(min_price, max_price, top_k)
            .await
    }

    /// Store statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            backend: self.store.kind(),
            vectors: self.store.count().await? as u64,
            dimension: self.store.dimension(),
        })
    }

    /// Run `queries` one after another and summarize latency.
    pub async fn evaluate(&self, queries: &[&str], top_k: Option<usize>) -> Result<EvalReport> {
        let mut runs = Vec::with_capacity(queries.len());
        for query in queries {
            let start = Instant::now();
            let response = self
                .search(SearchParams {
                    query: query.to_string(),
                    top_k,
                })
                .await?;
            runs.push(EvalQuery {
                query: response.query,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                results: response.results,
            });
        }

        let mut latencies: Vec<f64> = runs.iter().map(|r| r.latency_ms).collect();
        latencies.sort_by(f64::total_cmp);
        let mean_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok(EvalReport {
            backend: self.store.kind().to_string(),
            queries: runs,
            mean_ms,
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
        })
    }

    /// Close the store. The service must not be used afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down search service");
        self.store.close().await
    }
}

/// Nearest-rank percentile of sorted values; `0.0` when empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
