//! Tollkeeper configuration.

use crate::TollkeeperError;

/// Product-level configuration shared by the codec, the stores and the
/// response validator.
///
/// All fields are compile-time constants of the host application. The device
/// identifier is a runtime value and is passed separately to
/// [`BoundObfuscator`](crate::crypto::obfuscator::BoundObfuscator).
#[derive(Debug, Clone)]
pub struct TollkeeperConfig {
    /// Identity of the licensed application (e.g. its package name).
    /// Signed responses must carry the same value.
    pub scope_id: &'static str,

    /// Version code of the running application build.
    pub version_code: u32,

    /// Random per-application salt mixed into the storage binding.
    /// SECURITY: generate once and hard-code; never reuse across products.
    pub salt: &'static [u8],

    /// License authority Ed25519 verify key (hex-encoded, 64 characters).
    pub public_key_hex: &'static str,

    /// Directory name under the platform data dir used by [`FileBackend`].
    ///
    /// [`FileBackend`]: crate::store::file::FileBackend
    pub app_dir: &'static str,
}

impl TollkeeperConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), TollkeeperError> {
        if self.scope_id.is_empty() {
            return Err(TollkeeperError::ConfigError(
                "scope_id cannot be empty".to_string(),
            ));
        }
        if self.scope_id.contains('|') {
            return Err(TollkeeperError::ConfigError(
                "scope_id cannot contain '|'".to_string(),
            ));
        }
        if self.salt.is_empty() {
            return Err(TollkeeperError::ConfigError(
                "salt cannot be empty".to_string(),
            ));
        }
        if self.public_key_hex.len() != 64 {
            return Err(TollkeeperError::ConfigError(format!(
                "public_key_hex must be 64 hex characters, got {}",
                self.public_key_hex.len()
            )));
        }
        if self.app_dir.is_empty() {
            return Err(TollkeeperError::ConfigError(
                "app_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
