//! Key-value substrate the preference store writes through.

use crate::TollkeeperError;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// String-keyed persistent storage with explicit commit.
///
/// `set` stages a value; `get` only observes committed values; `commit`
/// publishes every staged value as one transaction.
pub trait PreferenceBackend: Send {
    /// Read a committed value.
    fn get(&self, key: &str) -> Option<String>;

    /// Stage a value for the next commit.
    fn set(&mut self, key: &str, value: String);

    /// Publish all staged values.
    fn commit(&mut self) -> Result<(), TollkeeperError>;
}

/// In-process backend.
///
/// Clones share committed data, so a second handle can stand in for the same
/// storage after a simulated restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    committed: Arc<RwLock<BTreeMap<String, String>>>,
    staged: BTreeMap<String, String>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed contents.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.committed
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Overwrite a committed value directly, bypassing staging.
    pub fn overwrite(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.committed.write() {
            guard.insert(key.to_string(), value.to_string());
        }
    }
}

impl PreferenceBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.committed.read().ok()?.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.staged.insert(key.to_string(), value);
    }

    fn commit(&mut self) -> Result<(), TollkeeperError> {
        let mut guard = self
            .committed
            .write()
            .map_err(|_| TollkeeperError::StoreIO("Memory store lock poisoned".to_string()))?;
        guard.append(&mut self.staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_values_invisible_until_commit() {
        let mut backend = MemoryBackend::new();
        backend.set("a", "1".to_string());
        assert_eq!(backend.get("a"), None);

        backend.commit().unwrap();
        assert_eq!(backend.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_clones_share_committed_data() {
        let mut writer = MemoryBackend::new();
        let reader = writer.clone();

        writer.set("k", "v".to_string());
        writer.commit().unwrap();

        assert_eq!(reader.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_commit_overwrites_existing() {
        let mut backend = MemoryBackend::new();
        backend.set("k", "old".to_string());
        backend.commit().unwrap();
        backend.set("k", "new".to_string());
        backend.commit().unwrap();

        assert_eq!(backend.snapshot().get("k").map(String::as_str), Some("new"));
    }

    #[test]
    fn test_overwrite_bypasses_staging() {
        let backend = MemoryBackend::new();
        backend.overwrite("k", "raw");
        assert_eq!(backend.get("k"), Some("raw".to_string()));
    }
}
