//! File-based preference backend with atomic commits.
//!
//! Each namespace is one JSON document under `dirs::data_dir()/<app_dir>/`.
//! Commits write a temp file and rename it over the document.

use crate::store::backend::PreferenceBackend;
use crate::TollkeeperError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk document format version.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// File-based backend for one namespace.
pub struct FileBackend {
    /// Path of the namespace document.
    path: PathBuf,
    /// Committed entries.
    entries: BTreeMap<String, String>,
    /// Values staged since the last commit.
    staged: BTreeMap<String, String>,
}

impl FileBackend {
    /// Open the namespace document under `dirs::data_dir()/<app_dir>/`.
    pub fn new(app_dir: &str, namespace: &str) -> Result<Self, TollkeeperError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| TollkeeperError::StoreIO("Could not find data directory".to_string()))?;

        Self::in_dir(base_dir.join(app_dir), namespace)
    }

    /// Open the namespace document inside an explicit directory.
    pub fn in_dir(dir: PathBuf, namespace: &str) -> Result<Self, TollkeeperError> {
        fs::create_dir_all(&dir)
            .map_err(|e| TollkeeperError::StoreIO(format!("Failed to create store dir: {}", e)))?;

        let path = dir.join(format!("{}.json", document_name(namespace)));
        let entries = load_entries(&path)?;

        Ok(Self {
            path,
            entries,
            staged: BTreeMap::new(),
        })
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing document and forget every value.
    pub fn clear(&mut self) -> Result<(), TollkeeperError> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| TollkeeperError::StoreIO(format!("Failed to delete store: {}", e)))?;
        }
        self.entries.clear();
        self.staged.clear();
        Ok(())
    }
}

impl PreferenceBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.staged.insert(key.to_string(), value);
    }

    fn commit(&mut self) -> Result<(), TollkeeperError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut merged = self.entries.clone();
        merged.extend(self.staged.iter().map(|(k, v)| (k.clone(), v.clone())));

        let document = StoreDocument {
            version: DOCUMENT_VERSION,
            entries: merged,
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| TollkeeperError::StoreIO(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)
            .map_err(|e| TollkeeperError::StoreIO(format!("Failed to write temp file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| TollkeeperError::StoreIO(format!("Failed to rename store file: {}", e)))?;

        self.entries = document.entries;
        self.staged.clear();
        tracing::debug!(path = %self.path.display(), "Committed preference store");
        Ok(())
    }
}

/// Document file name for a namespace: the first 16 hex chars of its SHA-256.
///
/// Keeps namespace strings out of the file system.
pub fn document_name(namespace: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = hex::encode(Sha256::digest(namespace.as_bytes()));
    hash[..16].to_string()
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, String>, TollkeeperError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let json = fs::read_to_string(path)
        .map_err(|e| TollkeeperError::StoreIO(format!("Failed to read store file: {}", e)))?;

    match serde_json::from_str::<StoreDocument>(&json) {
        Ok(document) => Ok(document.entries),
        Err(e) => {
            // Unreadable documents are treated like tampered values: start over.
            tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable store document");
            Ok(BTreeMap::new())
        }
    }
}
