//! Resumable batch import of corpus embeddings.
//!
//! The corpus is walked in fixed-size batches. Each batch costs one provider
//! call; its vectors are appended to a partial output (JSON lines, fsynced)
//! and then a progress marker is persisted. A restart resumes after the last
//! code recorded in the marker. On completion the partial output is turned
//! into the final JSON array in a temp file, which atomically replaces the
//! output path; only then are the marker and partial output removed.

mod progress;

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::ImportConfig;
use crate::corpus::VectorRecord;
use crate::embeddings::{embed_checked, EmbeddingError, EmbeddingProvider};
use crate::records::LoincCode;

pub use progress::{MarkerFile, ProgressMarker};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Batch at offset {offset} failed: {source}")]
    Batch {
        offset: usize,
        #[source]
        source: EmbeddingError,
    },

    #[error("Failed to replace output: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Importer lifecycle. Only forward transitions happen within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Resuming { offset: usize },
    ProcessingBatch { offset: usize },
    Persisting { offset: usize },
    Completed { processed: usize },
    Failed { offset: usize },
}

/// Files owned by one import.
#[derive(Debug, Clone)]
pub struct ImportPaths {
    pub output: PathBuf,
    pub partial: PathBuf,
    pub marker: PathBuf,
}

impl ImportPaths {
    /// `<output>.partial` and `<output>.progress.json` next to the output.
    pub fn for_output(output: &Path) -> Self {
        Self {
            output: output.to_path_buf(),
            partial: with_suffix(output, ".partial"),
            marker: with_suffix(output, ".progress.json"),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    /// Pause between batches. Pacing only; failed batches are not retried.
    pub batch_delay: Duration,
}

impl From<&ImportConfig> for ImportOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

/// Reported after every committed batch.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub batch_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub resumed_from: usize,
    pub batches: usize,
}

pub struct Importer {
    paths: ImportPaths,
    options: ImportOptions,
    marker: MarkerFile,
    state: ImportState,
}

impl Importer {
    pub fn new(paths: ImportPaths, options: ImportOptions) -> Self {
        let marker = MarkerFile::new(paths.marker.clone());
        Self {
            paths,
            options,
            marker,
            state: ImportState::Idle,
        }
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    pub fn paths(&self) -> &ImportPaths {
        &self.paths
    }

    /// Drop any saved progress so the next run starts from the beginning.
    pub fn discard_progress(&self) -> std::io::Result<()> {
        self.marker.delete()?;
        match std::fs::remove_file(&self.paths.partial) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Generate embeddings for `records`, resuming saved progress if any.
    pub fn run<F>(
        &mut self,
        records: &[LoincCode],
        provider: &dyn EmbeddingProvider,
        mut on_batch: F,
    ) -> Result<ImportReport, ImportError>
    where
        F: FnMut(&BatchProgress),
    {
        self.state = ImportState::Idle;

        let resumed_from = match self.resume_offset(records) {
            Ok(offset) => offset,
            Err(err) => {
                self.transition(ImportState::Failed { offset: 0 });
                return Err(err);
            }
        };
        self.transition(ImportState::Resuming {
            offset: resumed_from,
        });

        let total = records.len();
        if resumed_from > 0 {
            log::info!("Resuming import at {resumed_from}/{total}");
        }

        let batches = match self.process_batches(records, resumed_from, provider, &mut on_batch) {
            Ok(batches) => batches,
            Err(err) => {
                let offset = match &self.state {
                    ImportState::ProcessingBatch { offset } | ImportState::Persisting { offset } => {
                        *offset
                    }
                    _ => resumed_from,
                };
                self.transition(ImportState::Failed { offset });
                return Err(err);
            }
        };

        if let Err(err) = self.finalize() {
            self.transition(ImportState::Failed { offset: total });
            return Err(err);
        }
        self.transition(ImportState::Completed { processed: total });

        Ok(ImportReport {
            total,
            resumed_from,
            batches,
        })
    }

    fn transition(&mut self, state: ImportState) {
        log::debug!("import: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Index after the marker's last code, or 0 when there is no usable
    /// marker. Leaves the partial output holding exactly the committed
    /// batches.
    fn resume_offset(&self, records: &[LoincCode]) -> Result<usize, ImportError> {
        let Some(marker) = self.marker.load() else {
            self.reset_partial()?;
            return Ok(0);
        };

        let offset = marker
            .last_code
            .as_deref()
            .and_then(|last| records.iter().position(|r| r.code == last))
            .map(|idx| idx + 1);

        let partial_len = match std::fs::metadata(&self.paths.partial) {
            Ok(meta) => Some(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        match (offset, partial_len) {
            (Some(offset), Some(len)) if offset == marker.processed && len >= marker.partial_bytes => {
                // bytes past the marker belong to a batch that never committed
                if len > marker.partial_bytes {
                    log::warn!(
                        "dropping {} uncommitted bytes from {}",
                        len - marker.partial_bytes,
                        self.paths.partial.display()
                    );
                    let file = OpenOptions::new().write(true).open(&self.paths.partial)?;
                    file.set_len(marker.partial_bytes)?;
                    file.sync_all()?;
                }
                Ok(offset)
            }
            _ => {
                log::warn!(
                    "progress marker {} is stale, restarting from the beginning",
                    self.marker.path().display()
                );
                self.marker.delete()?;
                self.reset_partial()?;
                Ok(0)
            }
        }
    }

    fn reset_partial(&self) -> std::io::Result<()> {
        File::create(&self.paths.partial)?;
        Ok(())
    }

    fn process_batches(
        &mut self,
        records: &[LoincCode],
        start: usize,
        provider: &dyn EmbeddingProvider,
        on_batch: &mut dyn FnMut(&BatchProgress),
    ) -> Result<usize, ImportError> {
        let total = records.len();
        let mut partial = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.partial)?;

        let mut offset = start;
        let mut batches = 0;

        while offset < total {
            let end = (offset + self.options.batch_size).min(total);
            let batch = &records[offset..end];

            self.transition(ImportState::ProcessingBatch { offset });
            let texts: Vec<String> = batch.iter().map(LoincCode::embedding_text).collect();
            let vectors = embed_checked(provider, &texts)
                .map_err(|source| ImportError::Batch { offset, source })?;

            self.transition(ImportState::Persisting { offset });
            let partial_bytes = append_batch(&mut partial, batch, vectors)?;
            self.marker.save(&ProgressMarker {
                processed: end,
                last_code: batch.last().map(|r| r.code.clone()),
                partial_bytes,
                updated_at: Some(chrono::Utc::now().to_rfc3339()),
            })?;

            batches += 1;
            offset = end;
            log::info!("Processed {offset}/{total} codes");
            on_batch(&BatchProgress {
                processed: offset,
                total,
                batch_len: batch.len(),
            });

            if offset < total && !self.options.batch_delay.is_zero() {
                std::thread::sleep(self.options.batch_delay);
            }
        }

        Ok(batches)
    }

    fn finalize(&self) -> Result<(), ImportError> {
        let staged = self.stage_output()?;
        self.commit(staged)?;

        self.marker.delete()?;
        std::fs::remove_file(&self.paths.partial)?;
        log::info!("Saved embeddings to {}", self.paths.output.display());
        Ok(())
    }

    /// Write the final JSON array next to the output path without touching it.
    pub(crate) fn stage_output(&self) -> Result<NamedTempFile, ImportError> {
        let dir = self
            .paths
            .output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(dir)?;

        {
            let partial = BufReader::new(File::open(&self.paths.partial)?);
            let mut writer = BufWriter::new(&mut staged);

            writer.write_all(b"[")?;
            let mut first = true;
            for line in partial.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let sep: &[u8] = if first { b"\n  " } else { b",\n  " };
                writer.write_all(sep)?;
                writer.write_all(line.as_bytes())?;
                first = false;
            }
            writer.write_all(b"\n]\n")?;
            writer.flush()?;
        }

        staged.as_file().sync_all()?;
        Ok(staged)
    }

    /// Atomically replace the output with a staged file.
    pub(crate) fn commit(&self, staged: NamedTempFile) -> Result<(), ImportError> {
        staged.persist(&self.paths.output)?;
        Ok(())
    }
}

/// Append one batch as JSON lines and make it durable. Returns the new
/// length of the partial output.
fn append_batch(
    partial: &mut File,
    batch: &[LoincCode],
    vectors: Vec<Vec<f32>>,
) -> Result<u64, ImportError> {
    let mut buf = Vec::new();
    for (record, embedding) in batch.iter().zip(vectors) {
        serde_json::to_writer(
            &mut buf,
            &VectorRecord {
                code: record.code.clone(),
                embedding,
            },
        )?;
        buf.push(b'\n');
    }

    partial.write_all(&buf)?;
    partial.flush()?;
    partial.sync_data()?;
    Ok(partial.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_for_output() {
        let paths = ImportPaths::for_output(Path::new("/data/loinc-embeddings.json"));
        assert_eq!(paths.partial, PathBuf::from("/data/loinc-embeddings.json.partial"));
        assert_eq!(
            paths.marker,
            PathBuf::from("/data/loinc-embeddings.json.progress.json")
        );
    }

    #[test]
    fn test_options_clamp_batch_size() {
        let options = ImportOptions::from(&ImportConfig {
            batch_size: 0,
            batch_delay_ms: 250,
        });
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.batch_delay, Duration::from_millis(250));
    }
}
