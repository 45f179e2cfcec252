//! Core domain types for product search.

use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Product identifier, shared by catalog rows and indexed vectors.
pub type ProductId = i64;

/// Which storage backend holds the vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process table, optionally snapshotted to JSON.
    Memory,
    /// SQLite with the sqlite-vec extension.
    Sqlite,
    /// Pinecone serverless index.
    Pinecone,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Pinecone => "pinecone",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BackendKind {
    type Err = crate::error::SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" | "in-memory" => Ok(Self::Memory),
            "sqlite" | "sqlite-vec" | "pgvector" => Ok(Self::Sqlite),
            "pinecone" => Ok(Self::Pinecone),
            other => Err(crate::error::SearchError::config(format!(
                "unknown vector backend '{}'",
                other
            ))),
        }
    }
}

/// A catalog product after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique positive identifier.
    pub id: ProductId,

    /// Top-level category (title-cased during ingestion).
    pub category: String,

    /// Product title or name.
    pub title: String,

    /// Free-text description.
    pub description: String,

    /// Non-negative price.
    pub price: f64,

    /// Product page URL (http/https).
    pub url: String,
}

impl Product {
    /// The metadata record stored next to this product's vector.
    pub fn metadata(&self) -> ProductMetadata {
        ProductMetadata {
            id: Some(self.id),
            category: Some(self.category.clone()),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            price: Some(self.price),
            url: Some(self.url.clone()),
        }
    }

    /// Text handed to the embedding model for this product.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}. {}. Category: {}.",
            self.title.trim(),
            self.description.trim(),
            self.category.trim()
        )
    }
}

/// Display/filter fields attached to an indexed vector.
///
/// All fields are optional: a managed index may hand back loosely typed
/// metadata, and a non-numeric price decodes as `None` instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ProductId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient_price", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ProductMetadata {
    /// Price usable for filtering: present, finite, and non-negative.
    pub fn usable_price(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite() && *p >= 0.0)
    }

    /// Title and description joined by a single space, missing fields empty.
    pub fn lexical_text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or("")
        )
    }
}

fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<ProductId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// A vector as held by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub id: ProductId,
    pub embedding: Vec<f32>,
    pub metadata: ProductMetadata,
}

/// A retrieved, not-yet-final-ranked item for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Product id.
    pub id: ProductId,

    /// Similarity in the store's native range (cosine: [-1, 1]).
    pub similarity: f32,

    /// Attached metadata.
    pub metadata: ProductMetadata,
}

/// Optional price bounds extracted from a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceConstraint {
    /// No bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Both bounds, ordered so that `min <= max`.
    pub fn between(a: f64, b: f64) -> Self {
        Self {
            min: Some(a.min(b)),
            max: Some(a.max(b)),
        }
    }

    /// Upper bound only.
    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Lower bound only.
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Whether either bound is set.
    pub fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Whether a candidate's metadata passes this constraint.
    ///
    /// An inactive constraint admits everything. An active one rejects
    /// missing, non-numeric, non-finite and negative prices.
    pub fn admits(&self, metadata: &ProductMetadata) -> bool {
        if !self.is_active() {
            return true;
        }
        let Some(price) = metadata.usable_price() else {
            return false;
        };
        if matches!(self.min, Some(min) if price < min) {
            return false;
        }
        if matches!(self.max, Some(max) if price > max) {
            return false;
        }
        true
    }
}

impl std::fmt::Display for PriceConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "${}-${}", min, max),
            (None, Some(max)) => write!(f, "<= ${}", max),
            (Some(min), None) => write!(f, ">= ${}", min),
            (None, None) => write!(f, "any price"),
        }
    }
}

/// Caller-facing projection of a ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub url: Option<String>,
}

/// Detailed row for similarity-ordered result listings and exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: ProductId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub url: Option<String>,
    pub similarity_score: f32,
}

/// Statistics about a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Backend holding the vectors.
    pub backend: BackendKind,

    /// Number of indexed vectors.
    pub vectors: u64,

    /// Configured embedding dimension.
    pub dimension: usize,
}
