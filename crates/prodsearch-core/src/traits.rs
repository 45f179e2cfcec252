//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::{Result, SearchError};
use crate::types::{BackendKind, Candidate, IndexedVector, ProductId, ProductMetadata};

/// Vector storage capability shared by every backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend tag.
    fn kind(&self) -> BackendKind;

    /// Embedding dimension this store accepts.
    fn dimension(&self) -> usize;

    /// Upsert vectors with their metadata, keyed by id (last write wins).
    ///
    /// The three slices must have equal length.
    async fn add(
        &self,
        vectors: &[Vec<f32>],
        metadata: &[ProductMetadata],
        ids: &[ProductId],
    ) -> Result<()>;

    /// Nearest neighbours of `vector`, by descending similarity, at most `k`.
    ///
    /// Backends with a hard query limit clamp `k` to [`search_limit`](Self::search_limit).
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>>;

    /// Largest `k` a single search honours, `None` when unbounded.
    fn search_limit(&self) -> Option<usize> {
        None
    }

    /// Stored vector and metadata for an id.
    async fn fetch(&self, id: ProductId) -> Result<Option<IndexedVector>>;

    /// Metadata for every stored id, in storage order.
    async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>>;

    /// Number of stored vectors.
    async fn count(&self) -> Result<usize>;

    /// Release connections and flush state.
    async fn close(&self) -> Result<()>;
}

/// Check the `add` contract shared by all backends.
pub fn validate_batch(
    dimension: usize,
    vectors: &[Vec<f32>],
    metadata: &[ProductMetadata],
    ids: &[ProductId],
) -> Result<()> {
    if vectors.len() != metadata.len() || vectors.len() != ids.len() {
        return Err(SearchError::validation(format!(
            "lengths of vectors ({}), metadata ({}), and ids ({}) must match",
            vectors.len(),
            metadata.len(),
            ids.len()
        )));
    }

    if let Some((idx, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
        return Err(SearchError::validation(format!(
            "vector {} (id {}) has dimension {}, store expects {}",
            idx,
            ids[idx],
            v.len(),
            dimension
        )));
    }

    Ok(())
}

/// Check a query vector against the store dimension.
pub fn validate_query(dimension: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dimension {
        return Err(SearchError::validation(format!(
            "query vector has dimension {}, store expects {}",
            vector.len(),
            dimension
        )));
    }
    Ok(())
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::embedding("No embedding returned"))
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the maximum context length in tokens.
    fn max_tokens(&self) -> usize;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_length_mismatch() {
        let err = validate_batch(2, &[vec![0.0, 1.0]], &[], &[1]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_batch_dimension_mismatch() {
        let err = validate_batch(
            3,
            &[vec![0.0, 1.0, 0.0], vec![1.0]],
            &[ProductMetadata::default(), ProductMetadata::default()],
            &[1, 2],
        )
        .unwrap_err();
        assert!(err.to_string().contains("id 2"));
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query(3, &[0.0, 0.0, 1.0]).is_ok());
        assert!(validate_query(3, &[0.0]).is_err());
    }
}
