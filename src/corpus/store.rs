//! The in-memory embedding corpus.
//!
//! `EmbeddingStore` is immutable once built. `CorpusCache` owns at most one
//! built store: builders are serialized, readers share an `Arc` and never
//! observe a partially populated store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::config::ReaderConfig;
use crate::corpus::{open_vector_stream, CorpusError};
use crate::embeddings::EmbeddingProvider;
use crate::records::LoincCode;

/// Log progress every this many vectors while streaming.
const PROGRESS_EVERY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub code: LoincCode,
    pub embedding: Vec<f32>,
    /// Lower-cased descriptive text, embedded when no vector file exists.
    pub search_text: String,
}

#[derive(Debug, Default)]
pub struct EmbeddingStore {
    entries: Vec<StoreEntry>,
}

impl EmbeddingStore {
    pub fn from_entries(entries: Vec<StoreEntry>) -> Self {
        Self { entries }
    }

    /// Build the corpus for `records`.
    ///
    /// Vectors come from `vectors_path` when it holds any; otherwise one
    /// vector per record is generated through `provider`. Entries keep the
    /// order of `records`.
    pub fn build(
        records: Vec<LoincCode>,
        vectors_path: &Path,
        reader: &ReaderConfig,
        provider: Option<&dyn EmbeddingProvider>,
    ) -> Result<Self, CorpusError> {
        let record_count = records.len();

        let vectors = if vectors_path.exists() {
            Self::load_vectors(vectors_path, reader)?
        } else {
            log::info!("No pre-computed embeddings at {}", vectors_path.display());
            HashMap::new()
        };

        let store = if !vectors.is_empty() {
            Self::join(records, vectors)
        } else {
            let provider = provider.ok_or_else(|| CorpusError::NoVectors(vectors_path.to_path_buf()))?;
            Self::generate(records, provider)
        };

        if store.is_empty() && record_count > 0 {
            return Err(CorpusError::EmptyCorpus {
                records: record_count,
            });
        }

        Ok(store)
    }

    /// Drain the vector file into a code -> vector map.
    fn load_vectors(
        path: &Path,
        reader: &ReaderConfig,
    ) -> Result<HashMap<String, Vec<f32>>, CorpusError> {
        let size_mb = std::fs::metadata(path)?.len() as f64 / (1024.0 * 1024.0);
        log::info!("Loading embeddings file {} ({size_mb:.2} MB)", path.display());

        let now = Instant::now();
        let mut stream = open_vector_stream(path, reader)?;
        let mut vectors = HashMap::new();

        for record in stream.by_ref() {
            let record = record?;
            if vectors.insert(record.code, record.embedding).is_none()
                && vectors.len() % PROGRESS_EVERY == 0
            {
                log::info!("Loaded {} embeddings...", vectors.len());
            }
        }

        let parser = stream.parser();
        if parser.skipped() > 0 || parser.overflowed() > 0 {
            log::warn!(
                "Skipped {} malformed and {} oversized records in {}",
                parser.skipped(),
                parser.overflowed(),
                path.display()
            );
        }
        log::info!(
            "Finished loading {} embeddings in {}ms",
            vectors.len(),
            now.elapsed().as_millis()
        );

        Ok(vectors)
    }

    fn join(records: Vec<LoincCode>, mut vectors: HashMap<String, Vec<f32>>) -> Self {
        let total = records.len();
        let entries: Vec<StoreEntry> = records
            .into_iter()
            .filter_map(|code| {
                let embedding = vectors.remove(&code.code)?;
                let search_text = code.searchable_text();
                Some(StoreEntry {
                    code,
                    embedding,
                    search_text,
                })
            })
            .collect();

        if entries.len() < total {
            log::warn!("{} of {total} codes have no pre-computed embedding", total - entries.len());
        }
        log::info!("Loaded {} pre-computed embeddings", entries.len());

        Self { entries }
    }

    /// Per-record failures are logged and the record left out.
    fn generate(records: Vec<LoincCode>, provider: &dyn EmbeddingProvider) -> Self {
        log::info!(
            "Generating embeddings for {} codes with '{}'",
            records.len(),
            provider.name()
        );

        let mut entries = Vec::with_capacity(records.len());
        for code in records {
            let search_text = code.searchable_text();
            match provider.embed(&search_text) {
                Ok(embedding) => entries.push(StoreEntry {
                    code,
                    embedding,
                    search_text,
                }),
                Err(err) => log::error!("Failed to embed code {}: {err}", code.code),
            }
        }

        log::info!("Initialized {} LOINC embeddings", entries.len());
        Self { entries }
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the first vector. Lengths are only checked when compared.
    pub fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }
}

/// Holds the corpus for the lifetime of its owner.
#[derive(Default)]
pub struct CorpusCache {
    store: RwLock<Option<Arc<EmbeddingStore>>>,
    /// Serializes builders so at most one build runs at a time.
    build_lock: Mutex<()>,
}

impl CorpusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built store, if any.
    pub fn get(&self) -> Option<Arc<EmbeddingStore>> {
        self.store.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_built(&self) -> bool {
        self.get().is_some()
    }

    /// Return the built store, running `build` first if there is none.
    ///
    /// A failed build leaves the cache empty so a later call retries.
    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<EmbeddingStore>, CorpusError>
    where
        F: FnOnce() -> Result<EmbeddingStore, CorpusError>,
    {
        if let Some(store) = self.get() {
            return Ok(store);
        }

        let _build = self
            .build_lock
            .lock()
            .map_err(|e| CorpusError::Internal(format!("Lock poisoned: {}", e)))?;

        // another caller may have finished while we waited
        if let Some(store) = self.get() {
            return Ok(store);
        }

        let store = Arc::new(build()?);
        let mut guard = self
            .store
            .write()
            .map_err(|e| CorpusError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(store.clone());

        Ok(store)
    }

    /// Forget the built store. The next `get_or_build` rebuilds.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.store.write() {
            *guard = None;
        }
    }
}
