//! Deterministic embedder that needs no model files.

use async_trait::async_trait;

use prodsearch_core::{Embedder, Result};

use crate::onnx::l2_normalize;

/// Hashed bag-of-words embedder for testing.
///
/// Each lowercase alphanumeric token lands in one signed bucket, so texts
/// sharing words get positive cosine similarity. Output is L2 normalized;
/// text with no tokens embeds to the zero vector.
pub struct MockEmbedder {
    dimension: usize,
    max_tokens: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self {
            dimension: 384,
            max_tokens: 256,
        }
    }

    /// Create a mock embedder with custom settings.
    pub fn with_config(dimension: usize, max_tokens: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_tokens,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .take(self.max_tokens);

        for token in tokens {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        l2_normalize(embedding)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |acc, b| {
        (acc ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn model_name(&self) -> &str {
        "mock-hashed-bow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new();

        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.max_tokens(), 256);

        let texts = ["Hello world", "Rust is great"];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);

        // Check L2 normalization
        let norm: f32 = embeddings[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_deterministic_embeddings() {
        let embedder = MockEmbedder::new();

        let e1 = embedder.embed("wireless headphones").await.unwrap();
        let e2 = embedder.embed("wireless headphones").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = MockEmbedder::new();

        let query = embedder.embed("wireless headphones").await.unwrap();
        let related = embedder.embed("Wireless over-ear headphones with ANC").await.unwrap();
        let unrelated = embedder.embed("cast iron skillet").await.unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = MockEmbedder::with_config(8, 16);
        let e = embedder.embed("  ").await.unwrap();
        assert_eq!(e, vec![0.0; 8]);
    }
}
