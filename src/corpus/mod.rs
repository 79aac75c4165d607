//! Embedding corpus loading.
//!
//! # Architecture
//!
//! - `reader`: fixed-size chunked reads, optionally prefetched on a thread
//! - `parser`: incremental parser for a top-level array of flat objects
//! - `store`: the in-memory corpus and its single-initialization cache
//!
//! The vector file is a JSON array of `{"code": "...", "embedding": [...]}`
//! objects. It is streamed, never read into memory whole.

pub mod parser;
pub mod reader;
mod store;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ReaderConfig;
use crate::embeddings::EmbeddingError;
use crate::records::RecordError;

pub use parser::{RecordStream, StreamParser};
pub use reader::{ChunkReader, ChunkSource, PrefetchReader};
pub use store::{CorpusCache, EmbeddingStore, StoreEntry};

/// One element of the vector file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub code: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record error: {0}")]
    Records(#[from] RecordError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("No vector file at {0} and no embedding provider to generate vectors")]
    NoVectors(PathBuf),

    #[error("Corpus is empty: {records} records, none with a usable vector")]
    EmptyCorpus { records: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Open a streaming reader over a vector file.
pub fn open_vector_stream(
    path: &Path,
    config: &ReaderConfig,
) -> Result<RecordStream<Box<dyn ChunkSource + Send>, VectorRecord>, CorpusError> {
    let reader = ChunkReader::open(path, config.chunk_size_bytes)?;
    let source: Box<dyn ChunkSource + Send> = if config.prefetch {
        Box::new(PrefetchReader::spawn(reader))
    } else {
        Box::new(reader)
    };
    Ok(RecordStream::new(source, config.max_record_bytes))
}
