//! Durable progress marker for the batch importer.
//!
//! A marker present after a run always means the run is incomplete.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMarker {
    /// Codes fully processed, counted from the start of the corpus.
    pub processed: usize,
    /// Code of the last processed record.
    #[serde(default)]
    pub last_code: Option<String>,
    /// Length of the partial output that belongs to `processed` codes.
    #[serde(default)]
    pub partial_bytes: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the marker. A missing, unreadable or malformed marker is `None`.
    pub fn load(&self) -> Option<ProgressMarker> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("ignoring unreadable progress marker {}: {err}", self.path.display());
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(marker) => Some(marker),
            Err(err) => {
                log::warn!("ignoring malformed progress marker {}: {err}", self.path.display());
                None
            }
        }
    }

    /// Replace the marker atomically: temp file -> fsync -> rename.
    pub fn save(&self, marker: &ProgressMarker) -> std::io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, marker)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn delete(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
