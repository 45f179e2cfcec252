//! Configuration types for product search.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SearchError};
use crate::types::BackendKind;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSearchConfig {
    /// Vector store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Ranking configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Catalog ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend to open at startup.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Embedding dimension shared by store and model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub sqlite: SqliteConfig,

    #[serde(default)]
    pub pinecone: PineconeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dimension: default_dimension(),
            memory: MemoryConfig::default(),
            sqlite: SqliteConfig::default(),
            pinecone: PineconeConfig::default(),
        }
    }
}

/// In-memory store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// JSON snapshot loaded at open and written at close.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// SQLite (sqlite-vec) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            cache_size: -64000, // 64MB
            busy_timeout_ms: 30000,
        }
    }
}

/// Pinecone serverless index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PineconeConfig {
    /// API key; usually supplied through `PINECONE_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Index name.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Data-plane host; resolved from the control plane when unset.
    #[serde(default)]
    pub host: Option<String>,

    /// Namespace inside the index.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default = "default_cloud")]
    pub cloud: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_metric")]
    pub metric: String,

    /// Vectors per upsert request.
    #[serde(default = "default_upsert_batch")]
    pub batch_size: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            index_name: default_index_name(),
            host: None,
            namespace: None,
            cloud: default_cloud(),
            region: default_region(),
            metric: default_metric(),
            batch_size: 100,
            timeout_secs: 30,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Batch size for embedding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Maximum tokens per input before truncation.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            batch_size: 32,
            num_threads: 4,
            max_tokens: 256,
        }
    }
}

/// Ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum number of results accepted at the request boundary.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Fusion weight of the similarity score (1 = vector only).
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Candidates fetched per requested result.
    #[serde(default = "default_overfetch_multiplier")]
    pub overfetch_multiplier: usize,

    /// Minimum number of candidates fetched.
    #[serde(default = "default_overfetch_floor")]
    pub overfetch_floor: usize,

    /// Lexical scorer parameters.
    #[serde(default)]
    pub bm25: Bm25Config,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 50,
            alpha: 0.7,
            overfetch_multiplier: 10,
            overfetch_floor: 50,
            bm25: Bm25Config::default(),
        }
    }
}

impl SearchConfig {
    /// Number of candidates to retrieve for `top_k` final results.
    pub fn effective_k(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.overfetch_multiplier)
            .max(self.overfetch_floor)
    }

    /// Clamp a requested result count into `[1, max_top_k]`.
    pub fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }
}

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f64,

    /// Length normalization.
    #[serde(default = "default_b")]
    pub b: f64,

    /// Floor for negative idf, as a fraction of the mean idf.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Catalog ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory holding catalog files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Catalog file name inside `data_dir`.
    #[serde(default = "default_products_file")]
    pub products_file: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            products_file: default_products_file(),
        }
    }
}

impl IngestConfig {
    /// Full path to the catalog CSV.
    pub fn products_path(&self) -> PathBuf {
        self.data_dir.join(&self.products_file)
    }
}

// Default value functions

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_dimension() -> usize {
    384
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_index_name() -> String {
    "products-index".to_string()
}

fn default_cloud() -> String {
    "aws".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_metric() -> String {
    "cosine".to_string()
}

fn default_upsert_batch() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
}

fn default_max_tokens() -> usize {
    256
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    50
}

fn default_alpha() -> f64 {
    0.7
}

fn default_overfetch_multiplier() -> usize {
    10
}

fn default_overfetch_floor() -> usize {
    50
}

fn default_k1() -> f64 {
    1.5
}

fn default_b() -> f64 {
    0.75
}

fn default_epsilon() -> f64 {
    0.25
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_products_file() -> String {
    "products.csv".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prodsearch")
        .join("products.db")
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prodsearch")
        .join("models")
        .join("all-MiniLM-L6-v2")
}

impl ProductSearchConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SearchError::config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("prodsearch").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("prodsearch.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("VECTOR_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(path) = lookup("PRODSEARCH_DB") {
            self.store.sqlite.path = PathBuf::from(path);
        }

        let pinecone = &mut self.store.pinecone;
        if let Some(key) = lookup("PINECONE_API_KEY") {
            pinecone.api_key = Some(key);
        }
        if let Some(index) = lookup("PINECONE_INDEX") {
            pinecone.index_name = index;
        }
        if let Some(host) = lookup("PINECONE_HOST") {
            pinecone.host = Some(host);
        }
        if let Some(cloud) = lookup("PINECONE_CLOUD") {
            pinecone.cloud = cloud;
        }
        if let Some(region) = lookup("PINECONE_REGION") {
            pinecone.region = region;
        }

        Ok(())
    }

    /// Reject settings the ranker cannot work with.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if !(0.0..=1.0).contains(&search.alpha) {
            return Err(SearchError::config(format!(
                "search.alpha must be within [0, 1], got {}",
                search.alpha
            )));
        }
        if search.max_top_k == 0 {
            return Err(SearchError::config("search.max_top_k must be positive"));
        }
        if search.overfetch_multiplier == 0 {
            return Err(SearchError::config(
                "search.overfetch_multiplier must be positive",
            ));
        }
        if self.store.dimension == 0 {
            return Err(SearchError::config("store.dimension must be positive"));
        }
        if self.store.pinecone.batch_size == 0 {
            return Err(SearchError::config(
                "store.pinecone.batch_size must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ProductSearchConfig::default();
        assert_eq!(config.search.default_top_k, 5);
        assert_eq!(config.search.max_top_k, 50);
        assert_eq!(config.search.alpha, 0.7);
        assert_eq!(config.store.dimension, 384);
        assert_eq!(config.store.backend, BackendKind::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_k() {
        let search = SearchConfig::default();
        assert_eq!(search.effective_k(1), 50);
        assert_eq!(search.effective_k(5), 50);
        assert_eq!(search.effective_k(8), 80);
    }

    #[test]
    fn test_clamp_top_k() {
        let search = SearchConfig::default();
        assert_eq!(search.clamp_top_k(None), 5);
        assert_eq!(search.clamp_top_k(Some(0)), 1);
        assert_eq!(search.clamp_top_k(Some(500)), 50);
        assert_eq!(search.clamp_top_k(Some(12)), 12);
    }

    #[test]
    fn test_partial_toml() {
        let config: ProductSearchConfig = toml::from_str(
            r#"
            [store]
            backend = "memory"

            [search]
            alpha = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, BackendKind::Memory);
        assert_eq!(config.store.dimension, 384);
        assert_eq!(config.search.alpha, 0.5);
        assert_eq!(config.search.overfetch_floor, 50);
        assert!((config.search.bm25.k1 - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prodsearch.toml");
        std::fs::write(&path, "[search]\ndefault_top_k = 8\n").unwrap();

        let config = ProductSearchConfig::load(&path).unwrap();
        assert_eq!(config.search.default_top_k, 8);

        std::fs::write(&path, "[search\n").unwrap();
        assert!(matches!(
            ProductSearchConfig::load(&path),
            Err(SearchError::Config { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VECTOR_BACKEND", "pinecone"),
            ("PINECONE_API_KEY", "pk-test"),
            ("PINECONE_INDEX", "catalog"),
        ]
        .into_iter()
        .collect();

        let mut config = ProductSearchConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.backend, BackendKind::Pinecone);
        assert_eq!(config.store.pinecone.api_key.as_deref(), Some("pk-test"));
        assert_eq!(config.store.pinecone.index_name, "catalog");
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut config = ProductSearchConfig::default();
        config.search.alpha = 1.5;
        assert!(config.validate().is_err());
    }
}
