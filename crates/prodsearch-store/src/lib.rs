//! prodsearch-store - vector store backends
//!
//! Three interchangeable implementations of [`VectorStore`]: an in-process
//! table, SQLite with the sqlite-vec extension, and a Pinecone serverless
//! index. [`open_store`] picks one from configuration.

mod memory;
mod pinecone;
mod schema;
mod sqlite;

use async_trait::async_trait;
use tracing::info;

use prodsearch_core::{
    BackendKind, Candidate, IndexedVector, ProductId, ProductMetadata, Result, StoreConfig,
    VectorStore,
};

pub use memory::MemoryStore;
pub use pinecone::{PineconeStore, PineconeStoreBuilder};
pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{vec_schema, SCHEMA};

/// Cosine similarity; zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// A store chosen at runtime.
pub enum AnyStore {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
    Pinecone(PineconeStore),
}

impl AnyStore {
    fn inner(&self) -> &dyn VectorStore {
        match self {
            Self::Memory(s) => s,
            Self::Sqlite(s) => s,
            Self::Pinecone(s) => s,
        }
    }
}

/// Open the backend named by `config.backend`.
///
/// Failure to initialize surfaces as `BackendUnavailable`; there is no
/// fallback to another backend.
pub async fn open_store(config: &StoreConfig) -> Result<AnyStore> {
    let store = match config.backend {
        BackendKind::Memory => match &config.memory.snapshot_path {
            Some(path) => AnyStore::Memory(MemoryStore::with_snapshot(config.dimension, path)?),
            None => AnyStore::Memory(MemoryStore::new(config.dimension)),
        },
        BackendKind::Sqlite => {
            AnyStore::Sqlite(SqliteStore::open_with_config(&config.sqlite, config.dimension)?)
        }
        BackendKind::Pinecone => {
            AnyStore::Pinecone(PineconeStore::connect(&config.pinecone, config.dimension).await?)
        }
    };

    info!("Opened {} vector store", config.backend);
    Ok(store)
}

#[async_trait]
impl VectorStore for AnyStore {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    async fn add(
        &self,
        vectors: &[Vec<f32>],
        metadata: &[ProductMetadata],
        ids: &[ProductId],
    ) -> Result<()> {
        self.inner().add(vectors, metadata, ids).await
    }

    fn search_limit(&self) -> Option<usize> {
        self.inner().search_limit()
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        self.inner().search(vector, k).await
    }

    async fn fetch(&self, id: ProductId) -> Result<Option<IndexedVector>> {
        self.inner().fetch(id).await
    }

    async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>> {
        self.inner().list_metadata().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner().count().await
    }

    async fn close(&self) -> Result<()> {
        self.inner().close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let config = StoreConfig {
            backend: BackendKind::Memory,
            dimension: 4,
            ..Default::default()
        };
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.kind(), BackendKind::Memory);
        assert_eq!(store.dimension(), 4);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig {
            backend: BackendKind::Sqlite,
            dimension: 4,
            ..Default::default()
        };
        config.sqlite.path = dir.path().join("products.db");

        let store = open_store(&config).await.unwrap();
        assert_eq!(store.kind(), BackendKind::Sqlite);
        store
            .add(&[vec![0.5; 4]], &[ProductMetadata::default()], &[1])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pinecone_without_key_is_unavailable() {
        let config = StoreConfig {
            backend: BackendKind::Pinecone,
            ..Default::default()
        };
        let err = open_store(&config).await.err().unwrap();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");
    }
}
