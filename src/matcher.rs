//! Query path: free text in, ranked LOINC codes out.
//!
//! - Lazily builds the embedding corpus on first use (memoized)
//! - Embeds the query and ranks the corpus with exact cosine search
//! - Optionally attaches a natural-language explanation per match

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::Config;
use crate::corpus::{CorpusCache, CorpusError, EmbeddingStore};
use crate::embeddings::{
    explain_or_fallback, EmbeddingError, EmbeddingProvider, Explainer, FALLBACK_EXPLANATION,
};
use crate::records::{self, LoincCode};
use crate::search::{self, ScoredCode, SearchError};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Failed to build corpus: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Search failed: {0}")]
    Search(#[from] SearchError),
}

/// A match with its explanation, as shown to users.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainedMatch {
    pub code: LoincCode,
    pub confidence: f32,
    pub reasoning: String,
}

pub struct CodeMatcher {
    config: Config,
    cache: CorpusCache,
    provider: Arc<dyn EmbeddingProvider>,
    explainer: Option<Arc<dyn Explainer>>,
}

impl CodeMatcher {
    /// The corpus is not loaded until the first search or `initialize`.
    pub fn new(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            cache: CorpusCache::new(),
            provider,
            explainer: None,
        }
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = Some(explainer);
        self
    }

    /// Build the corpus now instead of on the first search.
    pub fn initialize(&self) -> Result<Arc<EmbeddingStore>, MatchError> {
        let store = self.cache.get_or_build(|| {
            log::info!("Initializing LOINC embeddings...");
            let codes = records::load_codes(&self.config.codes_path())?;
            EmbeddingStore::build(
                codes,
                &self.config.embeddings_path(),
                &self.config.reader,
                Some(self.provider.as_ref()),
            )
        })?;
        Ok(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.cache.is_built()
    }

    /// Number of corpus entries, 0 before initialization.
    pub fn indexed_count(&self) -> usize {
        self.cache.get().map(|s| s.len()).unwrap_or(0)
    }

    /// Drop the built corpus; the next search rebuilds it.
    pub fn reset(&self) {
        self.cache.reset();
    }

    /// Rank the corpus against `query`. `limit` defaults to the configured one.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<ScoredCode>, MatchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let store = self.initialize()?;
        let query_vector = self.provider.embed(&query.to_lowercase())?;
        let limit = limit.unwrap_or(self.config.search.default_limit);

        Ok(search::top_k(&query_vector, &store, limit)?)
    }

    /// Attach explanations; generation failures degrade to a fixed text.
    pub fn explain(&self, query: &str, matches: Vec<ScoredCode>) -> Vec<ExplainedMatch> {
        let explainer = self.explainer.as_deref();

        matches
            .into_par_iter()
            .map(|m| {
                let reasoning = match explainer {
                    Some(explainer) => explain_or_fallback(explainer, query, &m.code),
                    None => FALLBACK_EXPLANATION.to_string(),
                };
                ExplainedMatch {
                    code: m.code,
                    confidence: m.similarity,
                    reasoning,
                }
            })
            .collect()
    }
}
