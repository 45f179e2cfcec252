//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use prodsearch_core::{Embedder, EmbeddingConfig, Result, SearchError};

/// all-MiniLM-L6-v2 configuration.
const EMBEDDING_DIM: usize = 384;
const MAX_TOKENS: usize = 256;

/// File names expected inside a model directory.
pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

const MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// ONNX-based sentence embedder.
///
/// Queries and products go through the same path: no instruction prefixes,
/// inputs truncated to `max_tokens`, mean pooled, L2 normalized.
pub struct OnnxEmbedder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    tokenizer: Tokenizer,

    dimension: usize,

    max_tokens: usize,

    batch_size: usize,

    model_name: String,
}

impl OnnxEmbedder {
    /// Create a new embedder from model and tokenizer paths.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `tokenizer_path` - Path to the tokenizer.json file
    pub fn new(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
        Self::load(model_path.as_ref(), tokenizer_path.as_ref(), &EmbeddingConfig::default())
    }

    /// Load the model directory named in `config`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let dir = config.model_path.as_path();
        let model_path = dir.join(MODEL_FILE);
        let tokenizer_path = dir.join(TOKENIZER_FILE);

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(SearchError::unavailable(
                    "embedder",
                    format!("missing model file {:?}", path),
                ));
            }
        }

        Self::load(&model_path, &tokenizer_path, config)
    }

    fn load(model_path: &Path, tokenizer_path: &Path, config: &EmbeddingConfig) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| SearchError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SearchError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads.max(1))
            .map_err(|e| SearchError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| SearchError::unavailable("embedder", format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", tokenizer_path);

        let max_tokens = if config.max_tokens == 0 {
            MAX_TOKENS
        } else {
            config.max_tokens
        };

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| SearchError::unavailable("embedder", format!("Failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| SearchError::embedding(format!("Failed to configure truncation: {}", e)))?;

        let model_name = model_path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(MODEL_NAME)
            .to_string();

        info!(
            "Embedder initialized: model={}, dim={}, max_tokens={}",
            model_name, EMBEDDING_DIM, max_tokens
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension: EMBEDDING_DIM,
            max_tokens,
            batch_size: config.batch_size.max(1),
            model_name,
        })
    }

    /// Override the output dimension (for other sentence-transformers exports).
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Run one forward pass over `texts`.
    fn infer(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| SearchError::embedding(format!("Tokenization failed: {}", e)))?;

        // Get max length for padding
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| SearchError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor = Tensor::from_array((vec![batch_size, max_len], attention_mask))
            .map_err(|e| SearchError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let token_type_tensor = Tensor::from_array((vec![batch_size, max_len], token_type_ids))
            .map_err(|e| SearchError::embedding(format!("Failed to create token type tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SearchError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_tensor
            ])
            .map_err(|e| SearchError::embedding(format!("Inference failed: {}", e)))?;

        // First output is last_hidden_state for sentence-transformers exports.
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| SearchError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| SearchError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape_dims: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape_dims);

        let embeddings = match shape_dims.len() {
            3 => mean_pool(&view, &encodings, max_len),
            2 => (0..batch_size)
                .map(|i| l2_normalize((0..shape_dims[1]).map(|j| view[[i, j]]).collect()))
                .collect(),
            _ => {
                return Err(SearchError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape_dims
                )))
            }
        };

        if let Some(e) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(SearchError::embedding(format!(
                "model produced dimension {}, expected {}",
                e.len(),
                self.dimension
            )));
        }

        Ok(embeddings)
    }
}

/// Mean pooling over the sequence axis of a [batch, seq, hidden] tensor,
/// counting only attended tokens.
fn mean_pool(
    tensor: &ArrayViewD<'_, f32>,
    encodings: &[tokenizers::Encoding],
    max_len: usize,
) -> Vec<Vec<f32>> {
    let shape = tensor.shape();
    let seq_len = shape[1];
    let hidden_dim = shape[2];

    encodings
        .iter()
        .enumerate()
        .map(|(i, encoding)| {
            let mask = encoding.get_attention_mask();
            let mut sum = vec![0.0f32; hidden_dim];
            let mut valid = 0usize;

            for j in 0..mask.len().min(max_len).min(seq_len) {
                if mask[j] == 1 {
                    valid += 1;
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += tensor[[i, j, k]];
                    }
                }
            }

            if valid == 0 {
                return sum;
            }
            l2_normalize(sum.into_iter().map(|s| s / valid as f32).collect())
        })
        .collect()
}

/// L2 normalize a vector; zero vectors are returned unchanged.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Session is not Send; inference runs inline on the caller's task.
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            embeddings.extend(self.infer(chunk)?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            model_path: dir.path().join("nope"),
            ..Default::default()
        };
        let err = OnnxEmbedder::from_config(&config).err().unwrap();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");
    }
}
