//! Embedding and explanation generators.
//!
//! The corpus loader and the importer only see the `EmbeddingProvider` trait.
//!
//! - `openai`: OpenAI-compatible HTTP API (embeddings + chat completions)
//! - `local`: on-device models through fastembed (`local-embeddings` feature)
//! - `explain`: natural-language match explanations with a fixed fallback

pub mod explain;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod openai;

use std::path::Path;
use std::sync::Arc;

use crate::config::{EmbeddingConfig, ProviderKind};

pub use explain::{explain_or_fallback, Explainer, FALLBACK_EXPLANATION};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use openai::{OpenAiEmbedder, OpenAiExplainer};

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("API key not found in environment variable {0}")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {got} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Turns text into fixed-length vectors.
///
/// `embed_batch` returns one vector per input in input order, or fails for
/// the whole batch.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        embed_checked(self, &[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

/// `embed_batch` plus a check that the provider kept the one-to-one contract.
pub fn embed_checked<P: EmbeddingProvider + ?Sized>(
    provider: &P,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let vectors = provider.embed_batch(texts)?;
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            got: vectors.len(),
        });
    }
    Ok(vectors)
}

/// Create the configured embedding provider.
pub fn build_provider(
    config: &EmbeddingConfig,
    base_path: &Path,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::from_config(config)?)),
        #[cfg(feature = "local-embeddings")]
        ProviderKind::Local => Ok(Arc::new(LocalEmbedder::new(
            &config.local_model,
            base_path.to_path_buf(),
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        ProviderKind::Local => {
            let _ = base_path;
            Err(EmbeddingError::InvalidModel(format!(
                "{} (built without the local-embeddings feature)",
                config.local_model
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Short;

    impl EmbeddingProvider for Short {
        fn name(&self) -> &str {
            "short"
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
        }
    }

    #[test]
    fn test_count_mismatch_detected() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = embed_checked(&Short, &texts);
        assert!(matches!(
            result,
            Err(EmbeddingError::CountMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_empty_batch_skips_provider() {
        assert!(embed_checked(&Short, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_embed_uses_checked_batch() {
        assert!(matches!(
            Short.embed("x"),
            Err(EmbeddingError::CountMismatch { expected: 1, got: 0 })
        ));
    }
}
