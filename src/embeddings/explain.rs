use crate::embeddings::EmbeddingError;
use crate::records::LoincCode;

/// Shown when no explanation could be generated.
pub const FALLBACK_EXPLANATION: &str =
    "This code matches based on semantic similarity to your query.";

/// Produces a short natural-language reason why `code` matches `query`.
pub trait Explainer: Send + Sync {
    fn explain(&self, query: &str, code: &LoincCode) -> Result<String, EmbeddingError>;
}

/// Explanation failures never fail the caller.
pub fn explain_or_fallback(explainer: &dyn Explainer, query: &str, code: &LoincCode) -> String {
    match explainer.explain(query, code) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("failed to explain match {}: {err}", code.code);
            FALLBACK_EXPLANATION.to_string()
        }
    }
}
