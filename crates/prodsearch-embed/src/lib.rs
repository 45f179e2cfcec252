//! prodsearch-embed - sentence embedding models
//!
//! Text to dense vector, used both when indexing products and when
//! embedding queries. The same model and normalization serve both sides.
//!
//! # Features
//!
//! - ONNX Runtime inference for all-MiniLM-L6-v2 style encoders
//! - Mean pooling with attention mask, then L2 normalization
//! - A deterministic hashed bag-of-words embedder for tests and demos

mod mock;
mod onnx;

pub use mock::MockEmbedder;
pub use onnx::{OnnxEmbedder, MODEL_FILE, TOKENIZER_FILE};

// Re-export the Embedder trait for convenience
pub use prodsearch_core::Embedder;
