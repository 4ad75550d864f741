//! Obfuscated preference store.
//!
//! Every value is obfuscated under its namespaced key before it reaches the
//! backend. Reads tolerate corruption (the caller's default is returned) but
//! report a value that decodes cleanly yet fails to parse as
//! [`TollkeeperError::TypeMismatch`].

use crate::crypto::obfuscator::Obfuscator;
use crate::store::backend::PreferenceBackend;
use crate::TollkeeperError;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Buffered, obfuscating view over one backend namespace.
pub struct ObfuscatedPreferences {
    namespace: String,
    backend: Box<dyn PreferenceBackend>,
    obfuscator: Arc<dyn Obfuscator>,
    /// Obfuscated values written since the last commit, by namespaced key.
    pending: BTreeMap<String, String>,
}

impl ObfuscatedPreferences {
    /// Create a store over `backend`, prefixing every key with `namespace`.
    pub fn new(
        namespace: &str,
        backend: Box<dyn PreferenceBackend>,
        obfuscator: Arc<dyn Obfuscator>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            backend,
            obfuscator,
            pending: BTreeMap::new(),
        }
    }

    /// The key namespace of this store.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    /// Plaintext for `key`, or `None` when missing, stored as absent, or
    /// failing validation.
    fn read(&self, key: &str) -> Option<String> {
        let scoped = self.scoped_key(key);
        let sealed = match self.pending.get(&scoped) {
            Some(value) => value.clone(),
            None => self.backend.get(&scoped)?,
        };

        match self.obfuscator.unobfuscate(&sealed, &scoped) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(key = %scoped, error = %e, "Ignoring invalid stored value");
                None
            }
        }
    }

    /// Read a string, falling back to `default`.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.read(key).unwrap_or_else(|| default.to_string())
    }

    /// Read and parse a value, falling back to `default` when it is missing
    /// or fails validation.
    ///
    /// # Errors
    /// `TypeMismatch` when the value validates but does not parse as `T`.
    pub fn get_value<T: FromStr>(&self, key: &str, default: T) -> Result<T, TollkeeperError> {
        match self.read(key) {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| TollkeeperError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Obfuscate and buffer a string.
    pub fn put_string(&mut self, key: &str, value: &str) {
        let scoped = self.scoped_key(key);
        let sealed = self.obfuscator.obfuscate(Some(value), &scoped);
        self.pending.insert(scoped, sealed);
    }

    /// Obfuscate and buffer any displayable value.
    pub fn put_value<T: Display>(&mut self, key: &str, value: T) {
        self.put_string(key, &value.to_string());
    }

    /// Whether there are buffered writes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flush buffered writes to the backend as one transaction.
    pub fn commit(&mut self) -> Result<(), TollkeeperError> {
        for (key, value) in std::mem::take(&mut self.pending) {
            self.backend.set(&key, value);
        }
        self.backend.commit()
    }
}
