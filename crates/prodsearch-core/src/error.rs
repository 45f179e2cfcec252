//! Error types for product search.

use thiserror::Error;

/// Result type alias using SearchError.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while ingesting, storing, or ranking products.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed input: length mismatches, wrong dimensions, blank queries.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The configured store or embedder cannot be reached or initialized.
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Product id absent from the store.
    #[error("Product not found: {id}")]
    NotFound { id: i64 },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Remote index returned a non-success response.
    #[error("Remote index error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Catalog ingestion error.
    #[error("Ingest error: {message}")]
    Ingest { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SearchError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a backend-unavailable error.
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create an ingest error.
    pub fn ingest(message: impl Into<String>) -> Self {
        Self::Ingest {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Get the stable error code reported at the request boundary.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Ingest { .. } => "INGEST_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
