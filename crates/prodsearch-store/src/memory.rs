//! In-process vector store with exact cosine search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use prodsearch_core::{
    validate_batch, validate_query, BackendKind, Candidate, IndexedVector, ProductId,
    ProductMetadata, Result, SearchError, VectorStore,
};

use crate::cosine_similarity;

/// Vectors held in insertion order with an id -> slot index.
#[derive(Debug, Default)]
struct Table {
    entries: Vec<IndexedVector>,
    slots: HashMap<ProductId, usize>,
}

impl Table {
    fn upsert(&mut self, entry: IndexedVector) {
        match self.slots.get(&entry.id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.slots.insert(entry.id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn from_entries(entries: Vec<IndexedVector>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.upsert(entry);
        }
        table
    }
}

/// On-disk snapshot format.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    entries: Vec<IndexedVector>,
}

/// In-memory store.
///
/// Search is a brute-force cosine scan; ties keep insertion order.
pub struct MemoryStore {
    dimension: usize,
    table: RwLock<Table>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: RwLock::new(Table::default()),
            snapshot_path: None,
        }
    }

    /// Create a store bound to a snapshot file, loading it if present.
    ///
    /// The snapshot is rewritten on [`VectorStore::close`].
    pub fn with_snapshot(dimension: usize, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new(dimension);
        if path.exists() {
            store.load(&path)?;
        }
        store.snapshot_path = Some(path);
        Ok(store)
    }

    /// Write all vectors to a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let table = self.read()?;
        let snapshot = Snapshot {
            dimension: self.dimension,
            entries: table.entries.clone(),
        };
        drop(table);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &snapshot)?;

        info!(
            "Saved {} vectors to {:?}",
            snapshot.entries.len(),
            path
        );
        Ok(())
    }

    /// Replace the contents with a JSON snapshot.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(std::io::BufReader::new(file))?;

        if snapshot.dimension != self.dimension {
            return Err(SearchError::validation(format!(
                "snapshot {:?} has dimension {}, store expects {}",
                path, snapshot.dimension, self.dimension
            )));
        }

        let count = snapshot.entries.len();
        *self.write()? = Table::from_entries(snapshot.entries);
        info!("Loaded {} vectors from {:?}", count, path);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|e| SearchError::internal(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|e| SearchError::internal(e.to_string()))
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(
        &self,
        vectors: &[Vec<f32>],
        metadata: &[ProductMetadata],
        ids: &[ProductId],
    ) -> Result<()> {
        validate_batch(self.dimension, vectors, metadata, ids)?;

        let mut table = self.write()?;
        for ((vector, md), id) in vectors.iter().zip(metadata).zip(ids) {
            table.upsert(IndexedVector {
                id: *id,
                embedding: vector.clone(),
                metadata: md.clone(),
            });
        }

        info!("Added {} embeddings to memory store", ids.len());
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        validate_query(self.dimension, vector)?;

        let table = self.read()?;
        if table.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = table
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&e.embedding, vector)))
            .collect();

        // Stable: equal similarities keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!("Memory search scanned {} vectors", table.entries.len());

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| {
                let entry = &table.entries[i];
                Candidate {
                    id: entry.id,
                    similarity,
                    metadata: entry.metadata.clone(),
                }
            })
            .collect())
    }

    async fn fetch(&self, id: ProductId) -> Result<Option<IndexedVector>> {
        let table = self.read()?;
        Ok(table.slots.get(&id).map(|&slot| table.entries[slot].clone()))
    }

    async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>> {
        let table = self.read()?;
        Ok(table
            .entries
            .iter()
            .map(|e| (e.id, e.metadata.clone()))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn close(&self) -> Result<()> {
        if let Some(path) = &self.snapshot_path {
            self.save(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(title: &str, price: f64) -> ProductMetadata {
        ProductMetadata {
            title: Some(title.to_string()),
            price: Some(price),
            ..Default::default()
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new(3);
        store
            .add(
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                ],
                &[md("x", 10.0), md("y", 20.0), md("xy", 30.0)],
                &[1, 2, 3],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_store_search() {
        let store = MemoryStore::new(3);
        let results = store.search(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = seeded().await;
        let results = store.search(&[1.0, 0.1, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 3);
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn test_search_returns_fewer_than_k() {
        let store = seeded().await;
        let results = store.search(&[0.0, 0.0, 1.0], 10).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_add_length_mismatch() {
        let store = MemoryStore::new(3);
        let err = store
            .add(&[vec![1.0, 0.0, 0.0]], &[md("a", 1.0)], &[1, 2])
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = seeded().await;
        store
            .add(&[vec![0.0, 0.0, 1.0]], &[md("z", 99.0)], &[1])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        let fetched = store.fetch(1).await.unwrap().unwrap();
        assert_eq!(fetched.embedding, vec![0.0, 0.0, 1.0]);
        assert_eq!(fetched.metadata.title.as_deref(), Some("z"));
    }

    #[tokio::test]
    async fn test_readding_same_triplet_is_idempotent() {
        let store = seeded().await;
        let query = [0.6, 0.8, 0.0];
        let before = store.search(&query, 3).await.unwrap();

        store
            .add(&[vec![0.7, 0.7, 0.0]], &[md("xy", 30.0)], &[3])
            .await
            .unwrap();

        let after = store.search(&query, 3).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");

        let store = MemoryStore::with_snapshot(3, &path).unwrap();
        store
            .add(&[vec![1.0, 0.0, 0.0]], &[md("lamp", 15.0)], &[42])
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = MemoryStore::with_snapshot(3, &path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert!(reopened.fetch(42).await.unwrap().is_some());

        let mut wrong_dim = MemoryStore::new(4);
        assert!(wrong_dim.load(&path).is_err());
    }
}
