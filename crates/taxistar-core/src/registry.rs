use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry at {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One processed source. Entries carried over from a plain list of file names
/// only know their `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub source_id: String,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub fact_rows: Option<usize>,
}

impl RegistryEntry {
    pub fn name_only(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            processed_at: None,
            content_hash: None,
            fact_rows: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(RegistryEntry),
    Name(String),
}

impl From<StoredEntry> for RegistryEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Full(entry) => entry,
            StoredEntry::Name(source_id) => RegistryEntry::name_only(source_id),
        }
    }
}

/// Sources that have been fully written to both stores.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    path: PathBuf,
    entries: Vec<RegistryEntry>,
}

impl SourceRegistry {
    /// Loads the registry at `path`; a missing file is an empty registry.
    /// Both the object list written by `save` and a bare list of file names are accepted.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let contents = fs::read(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        let stored: Vec<StoredEntry> =
            serde_json::from_slice(&contents).map_err(|source| RegistryError::Json {
                path: path.clone(),
                source,
            })?;
        let entries = stored.into_iter().map(RegistryEntry::from).collect();
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.source_id == source_id)
    }

    pub fn get(&self, source_id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.source_id == source_id)
    }

    /// Records a processed source, replacing any earlier entry for the same id.
    pub fn record(&mut self, entry: RegistryEntry) {
        self.entries.retain(|existing| existing.source_id != entry.source_id);
        info!(source_id = %entry.source_id, fact_rows = ?entry.fact_rows, "source recorded");
        self.entries.push(entry);
    }

    /// Removes a source so that it is picked up again; returns whether it was present.
    pub fn forget(&mut self, source_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.source_id != source_id);
        before != self.entries.len()
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        let io_error = |source: std::io::Error| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io_error)?;

        let json = serde_json::to_vec_pretty(&self.entries).map_err(|source| RegistryError::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut temp = NamedTempFile::new_in(parent).map_err(io_error)?;
        temp.write_all(&json).map_err(io_error)?;
        temp.persist(&self.path)
            .map_err(|err| io_error(err.error))?;
        Ok(())
    }
}

pub fn content_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}
