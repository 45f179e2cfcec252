//! Non-hybrid catalog searches: semantic, by category, by price, similar items.

use std::sync::Arc;

use tracing::{info, warn};

use prodsearch_core::{
    Candidate, Embedder, ProductId, ProductMetadata, Result, SearchError, VectorStore,
};

/// Catalog queries over a store and embedder.
pub struct CatalogSearch<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
}

impl<S, E> CatalogSearch<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self { store, embedder }
    }

    /// Plain vector search, dropping candidates below `min_similarity`.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<Candidate>> {
        let embedding = self.embedder.embed(query).await?;
        let results: Vec<Candidate> = self
            .store
            .search(&embedding, top_k)
            .await?
            .into_iter()
            .filter(|c| c.similarity >= min_similarity)
            .collect();

        info!(
            "Search completed. Found {} results for query: '{}'",
            results.len(),
            query
        );
        Ok(results)
    }

    /// Products whose category equals `category` (case-insensitive), ranked
    /// by similarity to the category name.
    ///
    /// Only the nearest [`VectorStore::search_limit`] products are scanned, so
    /// on catalogs larger than that limit distant matches can be missed.
    pub async fn search_by_category(&self, category: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let wanted = category.trim().to_lowercase();
        let embedding = self.embedder.embed(category).await?;
        let all = self.search_everything(&embedding).await?;

        let results: Vec<Candidate> = all
            .into_iter()
            .filter(|c| {
                c.metadata
                    .category
                    .as_deref()
                    .map(|cat| cat.trim().to_lowercase() == wanted)
                    .unwrap_or(false)
            })
            .take(top_k)
            .collect();

        info!(
            "Category search completed. Found {} results for category: '{}'",
            results.len(),
            category
        );
        Ok(results)
    }

    /// Products priced within `[min_price, max_price]`, cheapest first.
    ///
    /// No embedding is involved; similarity is reported as `1.0`.
    pub async fn search_by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        let mut in_range: Vec<(ProductId, ProductMetadata, f64)> = self
            .store
            .list_metadata()
            .await?
            .into_iter()
            .filter_map(|(id, md)| {
                let price = md.price.filter(|p| p.is_finite())?;
                (min_price..=max_price)
                    .contains(&price)
                    .then_some((id, md, price))
            })
            .collect();

        in_range.sort_by(|a, b| a.2.total_cmp(&b.2));

        let results: Vec<Candidate> = in_range
            .into_iter()
            .take(top_k)
            .map(|(id, metadata, _)| Candidate {
                id,
                similarity: 1.0,
                metadata,
            })
            .collect();

        info!(
            "Price range search completed. Found {} results for price range: ${}-${}",
            results.len(),
            min_price,
            max_price
        );
        Ok(results)
    }

    /// Products most similar to `product_id`, excluding itself.
    ///
    /// Candidates come from one store search bounded by
    /// [`VectorStore::search_limit`].
    pub async fn recommendations(&self, product_id: ProductId, top_k: usize) -> Result<Vec<Candidate>> {
        let Some(product) = self.store.fetch(product_id).await? else {
            warn!("Product with ID {} not found", product_id);
            return Err(SearchError::NotFound { id: product_id });
        };

        let results: Vec<Candidate> = self
            .search_everything(&product.embedding)
            .await?
            .into_iter()
            .filter(|c| c.id != product_id)
            .take(top_k)
            .collect();

        info!(
            "Generated {} recommendations for product {}",
            results.len(),
            product_id
        );
        Ok(results)
    }

    /// Stored metadata for one product.
    pub async fn product(&self, product_id: ProductId) -> Result<ProductMetadata> {
        self.store
            .fetch(product_id)
            .await?
            .map(|v| v.metadata)
            .ok_or(SearchError::NotFound { id: product_id })
    }

    /// Search as much of the store as one query may cover.
    async fn search_everything(&self, embedding: &[f32]) -> Result<Vec<Candidate>> {
        let total = self.store.count().await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let k = match self.store.search_limit() {
            Some(limit) if total > limit => {
                warn!(
                    "Store holds {} products but one search covers {}; scanning the nearest {}",
                    total, limit, limit
                );
                limit
            }
            _ => total,
        };
        self.store.search(embedding, k).await
    }
}
