//! Hybrid ranking: vector retrieval, price filtering, BM25 re-scoring, fusion.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use prodsearch_core::{
    Candidate, Embedder, PriceConstraint, RankedResult, Result, SearchConfig, VectorStore,
};

use crate::format::to_ranked_result;
use crate::lexical::{bm25_scores, min_max_normalize};
use crate::parser::PriceConstraintParser;

/// A candidate with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Min-max normalized BM25 score within this query's candidates.
    pub lexical: f64,
    /// `alpha * similarity + (1 - alpha) * lexical`.
    pub fused: f64,
}

/// Output of one ranking pass, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RankTrace {
    pub constraint: PriceConstraint,
    /// Candidates returned by the store.
    pub retrieved: usize,
    /// Candidates left after price filtering.
    pub admitted: usize,
    pub results: Vec<ScoredCandidate>,
}

/// Hybrid ranker.
///
/// Over-fetches from the vector store, drops candidates outside the price
/// constraint parsed from the query, re-scores the rest with BM25 over
/// title and description, and fuses both signals linearly.
pub struct HybridRanker<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: SearchConfig,
    parser: PriceConstraintParser,
}

impl<S, E> HybridRanker<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    /// Create a ranker with default settings.
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self::with_config(store, embedder, SearchConfig::default())
    }

    /// Create a ranker with explicit settings.
    pub fn with_config(store: Arc<S>, embedder: Arc<E>, config: SearchConfig) -> Self {
        let parser = PriceConstraintParser::standard().clone();
        debug!(
            "Hybrid ranker: alpha={}, price matchers {:?}",
            config.alpha,
            parser.matcher_names()
        );
        Self {
            store,
            embedder,
            config,
            parser,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Top `top_k` products for `query`, best first.
    pub async fn rank(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        let trace = self.rank_scored(query, top_k).await?;
        Ok(trace
            .results
            .iter()
            .map(|s| to_ranked_result(&s.candidate))
            .collect())
    }

    /// Like [`rank`](Self::rank), keeping the constraint and per-result scores.
    pub async fn rank_scored(&self, query: &str, top_k: usize) -> Result<RankTrace> {
        let start = Instant::now();
        let constraint = self.parser.parse(query);

        if top_k == 0 {
            return Ok(RankTrace {
                constraint,
                retrieved: 0,
                admitted: 0,
                results: Vec::new(),
            });
        }

        let query_embedding = self.embedder.embed(query).await?;

        let k_effective = self.config.effective_k(top_k);
        let retrieved = self.store.search(&query_embedding, k_effective).await?;
        let retrieved_count = retrieved.len();

        let admitted: Vec<Candidate> = if constraint.is_active() {
            retrieved
                .into_iter()
                .filter(|c| constraint.admits(&c.metadata))
                .collect()
        } else {
            retrieved
        };

        debug!(
            "Retrieved {} candidates (k={}), {} within {}",
            retrieved_count,
            k_effective,
            admitted.len(),
            constraint
        );

        let admitted_count = admitted.len();
        let results = self.fuse(query, admitted, top_k);

        info!(
            "Ranked {} results for {:?} in {:?}",
            results.len(),
            query,
            start.elapsed()
        );

        Ok(RankTrace {
            constraint,
            retrieved: retrieved_count,
            admitted: admitted_count,
            results,
        })
    }

    /// BM25 over the admitted candidates, linear fusion, stable sort, truncate.
    fn fuse(&self, query: &str, candidates: Vec<Candidate>, top_k: usize) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let corpus: Vec<String> = candidates.iter().map(|c| c.metadata.lexical_text()).collect();
        let lexical = min_max_normalize(&bm25_scores(&corpus, query, self.config.bm25));

        let alpha = self.config.alpha;
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(lexical)
            .map(|(candidate, lexical)| ScoredCandidate {
                fused: alpha * f64::from(candidate.similarity) + (1.0 - alpha) * lexical,
                lexical,
                candidate,
            })
            .collect();

        // Stable: ties keep candidate order.
        scored.sort_by(|a, b| b.fused.total_cmp(&a.fused));
        scored.truncate(top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prodsearch_core::{BackendKind, IndexedVector, ProductId, ProductMetadata, SearchError};
    use prodsearch_store::MemoryStore;

    /// Returns the same candidates, in the same order, for every query.
    struct CannedStore(Vec<Candidate>);

    #[async_trait]
    impl VectorStore for CannedStore {
        fn kind(&self) -> BackendKind {
            BackendKind::Memory
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn add(
            &self,
            _vectors: &[Vec<f32>],
            _metadata: &[ProductMetadata],
            _ids: &[ProductId],
        ) -> Result<()> {
            Ok(())
        }

        async fn search(&self, _vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        async fn fetch(&self, _id: ProductId) -> Result<Option<IndexedVector>> {
            Ok(None)
        }

        async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.0.len())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Embeds every text to the same vector.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }

        fn max_tokens(&self) -> usize {
            256
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(SearchError::embedding("model not loaded"))
        }

        fn dimension(&self) -> usize {
            3
        }

        fn max_tokens(&self) -> usize {
            256
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    fn md(title: &str, description: &str, price: Option<f64>) -> ProductMetadata {
        ProductMetadata {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            price,
            url: Some(format!("https://shop.example.com/{}", title.to_lowercase().replace(' ', "-"))),
            ..Default::default()
        }
    }

    async fn store_with(items: &[(Vec<f32>, ProductMetadata)]) -> Arc<MemoryStore> {
        let store = MemoryStore::new(3);
        let vectors: Vec<Vec<f32>> = items.iter().map(|(v, _)| v.clone()).collect();
        let metadata: Vec<ProductMetadata> = items.iter().map(|(_, m)| m.clone()).collect();
        let ids: Vec<i64> = (1..=items.len() as i64).collect();
        store.add(&vectors, &metadata, &ids).await.unwrap();
        Arc::new(store)
    }

    fn ranker(store: Arc<MemoryStore>) -> HybridRanker<MemoryStore, FixedEmbedder> {
        HybridRanker::new(store, Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])))
    }

    #[tokio::test]
    async fn test_end_to_end_price_filter() {
        let store = store_with(&[
            (vec![1.0, 0.0, 0.0], md("Item A", "", Some(50.0))),
            (vec![0.8, 0.6, 0.0], md("Item B", "", Some(90.0))),
            (vec![1.0, 0.0, 0.0], md("Item C", "", Some(150.0))),
        ])
        .await;

        let results = ranker(store).rank("item under $100", 5).await.unwrap();

        let titles: Vec<_> = results.iter().map(|r| r.title.as_deref().unwrap()).collect();
        assert_eq!(titles, vec!["Item A", "Item B"]);
        assert!(results.iter().all(|r| r.price.unwrap() <= 100.0));
        assert_eq!(results[0].url.as_deref(), Some("https://shop.example.com/item-a"));
    }

    #[tokio::test]
    async fn test_no_constraint_drops_nothing() {
        let store = store_with(&[
            (vec![1.0, 0.0, 0.0], md("Desk lamp", "brass", Some(40.0))),
            (vec![0.0, 1.0, 0.0], md("Floor lamp", "steel", None)),
            (vec![0.0, 0.0, 1.0], md("Rug", "wool", Some(-3.0))),
        ])
        .await;

        let trace = ranker(store).rank_scored("lamp", 10).await.unwrap();
        assert!(!trace.constraint.is_active());
        assert_eq!(trace.retrieved, 3);
        assert_eq!(trace.admitted, 3);
        assert_eq!(trace.results.len(), 3);
    }

    #[tokio::test]
    async fn test_constraint_rejects_missing_and_bad_prices() {
        let store = store_with(&[
            (vec![1.0, 0.0, 0.0], md("Lamp", "", None)),
            (vec![1.0, 0.0, 0.0], md("Rug", "", Some(-3.0))),
            (vec![1.0, 0.0, 0.0], md("Desk", "", Some(f64::NAN))),
            (vec![1.0, 0.0, 0.0], md("Chair", "", Some(20.0))),
        ])
        .await;

        let results = ranker(store).rank("anything under 100", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("Chair"));
    }

    #[tokio::test]
    async fn test_ties_keep_candidate_order() {
        let store = store_with(&[
            (vec![1.0, 0.0, 0.0], md("Alpha", "same words", Some(10.0))),
            (vec![1.0, 0.0, 0.0], md("Bravo", "same words", Some(10.0))),
            (vec![1.0, 0.0, 0.0], md("Charlie", "same words", Some(10.0))),
        ])
        .await;

        let trace = ranker(store).rank_scored("nothing matches", 3).await.unwrap();
        let fused: Vec<f64> = trace.results.iter().map(|s| s.fused).collect();
        assert!(fused.windows(2).all(|w| w[0] == w[1]));

        let titles: Vec<_> = trace
            .results
            .iter()
            .map(|s| s.candidate.metadata.title.clone().unwrap())
            .collect();
        assert_eq!(titles, vec!["Alpha", "Bravo", "Charlie"]);
    }

    #[tokio::test]
    async fn test_lexical_breaks_similarity_tie() {
        let store = store_with(&[
            (vec![1.0, 0.0, 0.0], md("Cotton shirt", "plain", Some(30.0))),
            (vec![1.0, 0.0, 0.0], md("Linen dress", "summer linen", Some(120.0))),
            (vec![0.0, 1.0, 0.0], md("Wool socks", "warm", Some(12.0))),
        ])
        .await;

        let trace = ranker(store).rank_scored("linen dress", 2).await.unwrap();
        assert_eq!(trace.results[0].candidate.metadata.title.as_deref(), Some("Linen dress"));
        assert_eq!(trace.results[0].lexical, 1.0);
        assert_eq!(trace.results[1].lexical, 0.0);
        assert!(trace
            .results
            .iter()
            .all(|s| (0.0..=1.0).contains(&s.lexical)));
    }

    #[tokio::test]
    async fn test_fusion_weights_are_exact() {
        // 0.7 * 0.42857143 lands just above 0.3 * 1.0; an f32 alpha flips them.
        let candidate = |id: i64, similarity: f32, title: &str| Candidate {
            id,
            similarity,
            metadata: md(title, "", Some(10.0)),
        };
        let store = Arc::new(CannedStore(vec![
            candidate(1, 0.42857143, "alpha"),
            candidate(2, 0.0, "lamp"),
            candidate(3, -1.0, "other"),
        ]));
        let ranker = HybridRanker::new(store, Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])));

        let trace = ranker.rank_scored("lamp", 3).await.unwrap();
        let ids: Vec<_> = trace.results.iter().map(|s| s.candidate.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(trace.results[0].fused, 0.7 * f64::from(0.42857143f32));
        assert_eq!(trace.results[1].lexical, 1.0);
        assert_eq!(trace.results[1].fused, 1.0 - 0.7);
    }

    #[tokio::test]
    async fn test_never_more_than_top_k() {
        let items: Vec<_> = (0..20)
            .map(|i| (vec![1.0, i as f32 / 20.0, 0.0], md(&format!("Item {}", i), "", Some(i as f64))))
            .collect();
        let store = store_with(&items).await;
        let ranker = ranker(store);

        assert_eq!(ranker.rank("item", 5).await.unwrap().len(), 5);
        assert_eq!(ranker.rank("item between 3 and 6", 10).await.unwrap().len(), 4);
        assert!(ranker.rank("item", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(MemoryStore::new(3));
        assert!(ranker(store).rank("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedder_failure_propagates() {
        let store = store_with(&[(vec![1.0, 0.0, 0.0], md("Lamp", "", Some(1.0)))]).await;
        let ranker = HybridRanker::new(store, Arc::new(BrokenEmbedder));
        let err = ranker.rank("lamp", 5).await.unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }

    #[tokio::test]
    async fn test_dyn_collaborators() {
        let store: Arc<dyn VectorStore> =
            store_with(&[(vec![1.0, 0.0, 0.0], md("Lamp", "", Some(1.0)))]).await;
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0]));
        let ranker = HybridRanker::new(store, embedder);
        assert_eq!(ranker.rank("lamp", 1).await.unwrap().len(), 1);
    }
}
