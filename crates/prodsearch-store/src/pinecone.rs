//! Pinecone serverless index backend.
//!
//! Talks to the Pinecone REST API directly: the control plane resolves (or
//! creates) the index host, the data plane serves upsert, query, fetch and
//! list. Ids travel as strings and are parsed back to integers on the way out.
//!
//! # Environment Variables
//!
//! - `PINECONE_API_KEY`: API key (required)
//! - `PINECONE_INDEX`: index name (default `products-index`)
//! - `PINECONE_HOST`: data-plane host, skips the control-plane lookup

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use prodsearch_core::{
    validate_batch, validate_query, BackendKind, Candidate, IndexedVector, PineconeConfig,
    ProductId, ProductMetadata, Result, SearchError, VectorStore,
};

/// Control-plane base URL.
const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";

/// API version sent with every request.
const API_VERSION: &str = "2024-07";

/// Page size for `vectors/list`, and ids per `vectors/fetch`.
const LIST_PAGE_SIZE: usize = 100;

/// Largest `topK` the query endpoint accepts.
const MAX_TOP_K: usize = 10_000;

/// Readiness polls after creating an index.
const READY_POLLS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

const BACKEND: &str = "pinecone";

/// Pinecone-backed vector store.
#[derive(Debug, Clone)]
pub struct PineconeStore {
    client: Client,
    api_key: String,
    host: String,
    namespace: Option<String>,
    dimension: usize,
    batch_size: usize,
}

/// Builder for PineconeStore
#[derive(Debug, Clone)]
pub struct PineconeStoreBuilder {
    api_key: Option<String>,
    host: Option<String>,
    namespace: Option<String>,
    dimension: usize,
    batch_size: usize,
    timeout: Duration,
}

impl Default for PineconeStoreBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            host: None,
            namespace: None,
            dimension: 384,
            batch_size: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PineconeStoreBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the data-plane host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the namespace (default namespace when unset)
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the embedding dimension
    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the number of vectors per upsert request
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the PineconeStore
    pub fn build(self) -> Result<PineconeStore> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SearchError::unavailable(BACKEND, "PINECONE_API_KEY is required"))?;
        let host = self
            .host
            .ok_or_else(|| SearchError::unavailable(BACKEND, "index host is required"))?;

        Ok(PineconeStore {
            client: http_client(self.timeout)?,
            api_key,
            host: normalize_host(&host),
            namespace: self.namespace,
            dimension: self.dimension,
            batch_size: self.batch_size,
        })
    }
}

impl PineconeStore {
    /// Create a new builder for PineconeStore
    pub fn builder() -> PineconeStoreBuilder {
        PineconeStoreBuilder::new()
    }

    /// Connect using configuration, resolving or creating the index.
    pub async fn connect(config: &PineconeConfig, dimension: usize) -> Result<Self> {
        Self::connect_with_control_url(config, dimension, DEFAULT_CONTROL_URL).await
    }

    /// Like [`connect`](Self::connect) against an explicit control-plane URL.
    pub async fn connect_with_control_url(
        config: &PineconeConfig,
        dimension: usize,
        control_url: &str,
    ) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SearchError::unavailable(BACKEND, "PINECONE_API_KEY is required"))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let host = match &config.host {
            Some(host) => host.clone(),
            None => {
                let control = ControlPlane {
                    client: http_client(timeout)?,
                    api_key: &api_key,
                    base_url: control_url.trim_end_matches('/'),
                };
                control.resolve_host(config, dimension).await?
            }
        };

        let mut builder = Self::builder()
            .api_key(api_key)
            .host(host)
            .dimension(dimension)
            .batch_size(config.batch_size)
            .timeout(timeout);
        if let Some(namespace) = &config.namespace {
            builder = builder.namespace(namespace.clone());
        }

        let store = builder.build()?;
        info!("Connected to Pinecone index '{}' at {}", config.index_name, store.host);
        Ok(store)
    }

    /// Data-plane base URL in use.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, e.to_string()))?;
        check_status(response).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .client
            .get(self.url(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .query(query)
            .send()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, e.to_string()))?;
        check_status(response).await
    }

    fn namespace_param(&self) -> Vec<(&'static str, String)> {
        self.namespace
            .iter()
            .map(|ns| ("namespace", ns.clone()))
            .collect()
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, FetchedVector>> {
        let mut query: Vec<(&str, String)> = ids.iter().map(|id| ("ids", id.clone())).collect();
        query.extend(self.namespace_param());

        let response: FetchResponse = self
            .get("/vectors/fetch", &query)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to parse response: {}", e)))?;
        Ok(response.vectors)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("limit", LIST_PAGE_SIZE.to_string())];
            query.extend(self.namespace_param());
            if let Some(token) = &token {
                query.push(("paginationToken", token.clone()));
            }

            let page: ListResponse = self
                .get("/vectors/list", &query)
                .await?
                .json()
                .await
                .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to parse response: {}", e)))?;

            ids.extend(page.vectors.into_iter().map(|v| v.id));
            token = page.pagination.and_then(|p| p.next);
            if token.is_none() {
                break;
            }
        }

        Ok(ids)
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SearchError::unavailable(BACKEND, e.to_string()))
}

/// Prefix a bare host with https and drop any trailing slash.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SearchError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// Integer id from a Pinecone string id, falling back to the metadata copy.
fn parse_id(raw: &str, metadata: Option<&ProductMetadata>) -> Result<ProductId> {
    raw.trim()
        .parse()
        .ok()
        .or_else(|| metadata.and_then(|m| m.id))
        .ok_or_else(|| SearchError::internal(format!("non-numeric id '{}' in index", raw)))
}

struct ControlPlane<'a> {
    client: Client,
    api_key: &'a str,
    base_url: &'a str,
}

impl ControlPlane<'_> {
    async fn resolve_host(&self, config: &PineconeConfig, dimension: usize) -> Result<String> {
        if let Some(description) = self.describe(&config.index_name).await? {
            return Ok(description.host);
        }

        info!(
            "Creating Pinecone index '{}' ({} dims, {}, {}/{})",
            config.index_name, dimension, config.metric, config.cloud, config.region
        );
        self.create(config, dimension).await?;

        for attempt in 0..READY_POLLS {
            if let Some(description) = self.describe(&config.index_name).await? {
                if description.status.map(|s| s.ready).unwrap_or(false) && !description.host.is_empty() {
                    return Ok(description.host);
                }
            }
            debug!("Index '{}' not ready (poll {})", config.index_name, attempt + 1);
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(SearchError::unavailable(
            BACKEND,
            format!("index '{}' did not become ready", config.index_name),
        ))
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexDescription>> {
        let response = self
            .client
            .get(format!("{}/indexes/{}", self.base_url, name))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let description = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to parse response: {}", e)))?;
        Ok(Some(description))
    }

    async fn create(&self, config: &PineconeConfig, dimension: usize) -> Result<()> {
        let request = CreateIndexRequest {
            name: &config.index_name,
            dimension,
            metric: &config.metric,
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: &config.cloud,
                    region: &config.region,
                },
            },
            deletion_protection: "disabled",
        };

        let response = self
            .client
            .post(format!("{}/indexes", self.base_url))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, e.to_string()))?;

        // Another process won the race.
        if response.status() == StatusCode::CONFLICT {
            warn!("Index '{}' already exists", config.index_name);
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

// Request/Response structures for the Pinecone API

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: IndexSpec<'a>,
    deletion_protection: &'a str,
}

#[derive(Debug, Serialize)]
struct IndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: String,
    values: &'a [f32],
    metadata: &'a ProductMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

impl<'a> QueryRequest<'a> {
    /// Metadata-only query; `k` is clamped to the endpoint limit.
    fn new(vector: &'a [f32], k: usize, namespace: Option<&'a str>) -> Self {
        if k > MAX_TOP_K {
            debug!("Clamping topK from {} to {}", k, MAX_TOP_K);
        }
        Self {
            vector,
            top_k: k.min(MAX_TOP_K),
            include_metadata: true,
            include_values: false,
            namespace,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<ProductMetadata>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<ProductMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

impl IndexStats {
    fn count_for(&self, namespace: Option<&str>) -> u64 {
        match namespace {
            Some(ns) => self.namespaces.get(ns).map(|n| n.vector_count).unwrap_or(0),
            None => self.total_vector_count,
        }
    }
}

fn to_candidate(m: QueryMatch) -> Result<Candidate> {
    let id = parse_id(&m.id, m.metadata.as_ref())?;
    Ok(Candidate {
        id,
        similarity: m.score,
        metadata: m.metadata.unwrap_or_default(),
    })
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Pinecone
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

        let records: Vec<UpsertVector<'_>> = vectors
            .iter()
            .zip(metadata)
            .zip(ids)
            .map(|((values, metadata), id)| UpsertVector {
                id: id.to_string(),
                values,
                metadata,
            })
            .collect();

        let total = records.len();
        let mut batches = 0;
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let batch: Vec<_> = records.by_ref().take(self.batch_size).collect();
            let request = UpsertRequest {
                vectors: batch,
                namespace: self.namespace.as_deref(),
            };
            self.post("/vectors/upsert", &request).await?;
            batches += 1;
        }

        info!("Upserted {} vectors to Pinecone in {} batches", total, batches);
        Ok(())
    }

    fn search_limit(&self) -> Option<usize> {
        Some(MAX_TOP_K)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        validate_query(self.dimension, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let request = QueryRequest::new(vector, k, self.namespace.as_deref());

        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to parse response: {}", e)))?;

        debug!("Pinecone returned {} matches", response.matches.len());

        response.matches.into_iter().map(to_candidate).collect()
    }

    async fn fetch(&self, id: ProductId) -> Result<Option<IndexedVector>> {
        let key = id.to_string();
        let mut vectors = self.fetch_many(std::slice::from_ref(&key)).await?;

        Ok(vectors.remove(&key).map(|v| IndexedVector {
            id,
            embedding: v.values,
            metadata: v.metadata.unwrap_or_default(),
        }))
    }

    async fn list_metadata(&self) -> Result<Vec<(ProductId, ProductMetadata)>> {
        let ids = self.list_ids().await?;
        let mut out = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(LIST_PAGE_SIZE) {
            let mut fetched = self.fetch_many(chunk).await?;
            for raw in chunk {
                if let Some(v) = fetched.remove(raw) {
                    let id = parse_id(&v.id, v.metadata.as_ref())?;
                    out.push((id, v.metadata.unwrap_or_default()));
                }
            }
        }

        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        let stats: IndexStats = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?
            .json()
            .await
            .map_err(|e| SearchError::unavailable(BACKEND, format!("Failed to parse response: {}", e)))?;
        Ok(stats.count_for(self.namespace.as_deref()) as usize)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_api_key() {
        let err = PineconeStore::builder()
            .host("products-abc.svc.pinecone.io")
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");

        let err = PineconeStore::builder()
            .api_key("  ")
            .host("products-abc.svc.pinecone.io")
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");
    }

    #[test]
    fn test_builder() {
        let store = PineconeStore::builder()
            .api_key("pc-test")
            .host("products-abc.svc.pinecone.io/")
            .namespace("catalog")
            .dimension(8)
            .batch_size(0)
            .build()
            .unwrap();

        assert_eq!(store.host(), "https://products-abc.svc.pinecone.io");
        assert_eq!(store.dimension(), 8);
        assert_eq!(store.batch_size, 1);
        assert_eq!(store.kind(), BackendKind::Pinecone);
    }

    #[tokio::test]
    async fn test_connect_without_key() {
        let config = PineconeConfig::default();
        let err = PineconeStore::connect(&config, 384).await.unwrap_err();
        assert!(matches!(err, SearchError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("idx.pinecone.io"), "https://idx.pinecone.io");
        assert_eq!(normalize_host("http://localhost:5080/"), "http://localhost:5080");
    }

    #[test]
    fn test_query_request_shape() {
        let vector = [0.1, 0.2];
        let request = QueryRequest {
            vector: &vector,
            top_k: 50,
            include_metadata: true,
            include_values: false,
            namespace: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["topK"], 50);
        assert_eq!(json["includeMetadata"], true);
        assert!(json.get("namespace").is_none());
    }

    #[test]
    fn test_query_top_k_clamped_to_limit() {
        let vector = [0.1, 0.2];
        let request = QueryRequest::new(&vector, 25_000, Some("shop"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["topK"], 10_000);
        assert_eq!(json["namespace"], "shop");
        assert_eq!(json["includeValues"], false);

        assert_eq!(QueryRequest::new(&vector, 40, None).top_k, 40);
    }

    #[test]
    fn test_upsert_metadata_omits_nulls() {
        let metadata = ProductMetadata {
            id: Some(3),
            title: Some("Desk".to_string()),
            ..Default::default()
        };
        let values = [1.0];
        let request = UpsertRequest {
            vectors: vec![UpsertVector {
                id: "3".to_string(),
                values: &values,
                metadata: &metadata,
            }],
            namespace: Some("catalog"),
        };
        let json = serde_json::to_value(&request).unwrap();
        let md = json["vectors"][0]["metadata"].as_object().unwrap();
        assert_eq!(md.len(), 2);
        assert!(!md.contains_key("price"));
        assert_eq!(json["namespace"], "catalog");
    }

    #[test]
    fn test_parse_query_response() {
        let body = r#"{
            "matches": [
                {"id": "7", "score": 0.91, "metadata": {"title": "Lamp", "price": 25.0}},
                {"id": "8", "score": 0.80, "metadata": {"title": "Rug", "price": "n/a"}},
                {"id": "9", "score": 0.75}
            ],
            "namespace": ""
        }"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        let candidates: Vec<Candidate> = response
            .matches
            .into_iter()
            .map(to_candidate)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].id, 7);
        assert_eq!(candidates[0].metadata.price, Some(25.0));
        assert_eq!(candidates[1].metadata.price, None);
        assert_eq!(candidates[2].metadata, ProductMetadata::default());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42", None).unwrap(), 42);

        let md = ProductMetadata {
            id: Some(5),
            ..Default::default()
        };
        assert_eq!(parse_id("sku-5", Some(&md)).unwrap(), 5);
        assert!(parse_id("sku-5", None).is_err());
    }

    #[test]
    fn test_index_stats_count() {
        let body = r#"{
            "dimension": 384,
            "totalVectorCount": 12,
            "namespaces": {"": {"vectorCount": 9}, "catalog": {"vectorCount": 3}}
        }"#;
        let stats: IndexStats = serde_json::from_str(body).unwrap();
        assert_eq!(stats.count_for(None), 12);
        assert_eq!(stats.count_for(Some("catalog")), 3);
        assert_eq!(stats.count_for(Some("missing")), 0);
    }

    #[test]
    fn test_parse_list_and_fetch() {
        let list: ListResponse = serde_json::from_str(
            r#"{"vectors": [{"id": "1"}, {"id": "2"}], "pagination": {"next": "tok"}}"#,
        )
        .unwrap();
        assert_eq!(list.vectors.len(), 2);
        assert_eq!(list.pagination.and_then(|p| p.next).as_deref(), Some("tok"));

        let fetched: FetchResponse = serde_json::from_str(
            r#"{"vectors": {"1": {"id": "1", "values": [0.5, 0.5], "metadata": {"category": "Home"}}}}"#,
        )
        .unwrap();
        let v = &fetched.vectors["1"];
        assert_eq!(v.values, vec![0.5, 0.5]);
        assert_eq!(v.metadata.as_ref().and_then(|m| m.category.as_deref()), Some("Home"));
    }
}
