//! Exact cosine-similarity search over an `EmbeddingStore`.
//!
//! Brute force on purpose: every entry is scored. The scan is sharded across
//! the rayon pool and merged by one stable sort, so results are deterministic
//! regardless of how the work was split.

use rayon::prelude::*;
use serde::Serialize;

use crate::corpus::EmbeddingStore;
use crate::records::LoincCode;

/// Entries scored per rayon task.
const SHARD_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SearchError {
    #[error("Dimension mismatch: query has {expected}, code {code} has {got}")]
    DimensionMismatch {
        code: String,
        expected: usize,
        got: usize,
    },

    #[error("Vectors must have the same length: {0} != {1}")]
    LengthMismatch(usize, usize),
}

/// A ranked match.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCode {
    pub code: LoincCode,
    /// Cosine similarity in [-1.0, 1.0]
    pub similarity: f32,
}

/// Cosine similarity of two equal-length vectors, in [-1.0, 1.0].
///
/// Accumulates in f64 so large or tiny components neither overflow nor
/// vanish. Zero-magnitude and non-finite vectors have similarity 0.0 with
/// everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::LengthMismatch(a.len(), b.len()));
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 || !magnitude.is_finite() || !dot.is_finite() {
        return Ok(0.0);
    }

    Ok((dot / magnitude).clamp(-1.0, 1.0) as f32)
}

/// The `k` entries most similar to `query`, highest first.
///
/// Ties keep corpus order. Any entry whose length differs from the query
/// fails the whole call.
pub fn top_k(
    query: &[f32],
    store: &EmbeddingStore,
    k: usize,
) -> Result<Vec<ScoredCode>, SearchError> {
    let entries = store.entries();

    let scored: Vec<(usize, f32)> = entries
        .par_chunks(SHARD_SIZE)
        .enumerate()
        .map(|(shard, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    let idx = shard * SHARD_SIZE + i;
                    cosine_similarity(query, &entry.embedding)
                        .map(|score| (idx, score))
                        .map_err(|_| SearchError::DimensionMismatch {
                            code: entry.code.code.clone(),
                            expected: query.len(),
                            got: entry.embedding.len(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<Vec<_>>, _>>()?
        .into_iter()
        .flatten()
        .collect();

    Ok(select_top(scored, k)
        .into_iter()
        .map(|(idx, similarity)| ScoredCode {
            code: entries[idx].code.clone(),
            similarity,
        })
        .collect())
}

/// Stable descending order by score, then corpus index.
fn select_top(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}
