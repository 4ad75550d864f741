//! License Manager - the main public API for Tollkeeper.
//!
//! The `LicenseManager` glues the pieces together:
//! - Validates each authority answer against the request that produced it
//! - Feeds the resulting verdict into the configured policy
//! - Answers access queries from the policy's cached state

use crate::config::TollkeeperConfig;
use crate::crypto::obfuscator::BoundObfuscator;
use crate::policy::{CachedPolicy, ManifestPolicy, Policy};
use crate::protocol::verdict::Verdict;
use crate::store::file::FileBackend;
use crate::validator::ResponseValidator;
use crate::TollkeeperError;
use std::sync::Arc;

/// Main license manager for Tollkeeper.
///
/// Create one instance per application and route every authority answer
/// through [`LicenseManager::handle_response`].
pub struct LicenseManager<P: Policy> {
    config: TollkeeperConfig,
    policy: P,
}

impl<P: Policy> LicenseManager<P> {
    /// Create a manager around an already constructed policy.
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration validation fails.
    pub fn new(config: TollkeeperConfig, policy: P) -> Result<Self, TollkeeperError> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    /// Validate an authority answer and record its verdict.
    ///
    /// On error the policy is left untouched.
    ///
    /// # Errors
    /// - `MalformedResponse` - Unknown code or unparseable signed data
    /// - `SignatureInvalid` - Signature verification failed
    /// - `ResponseMismatch` - Signed data answers a different request
    /// - `ApplicationError` - The authority rejected the application
    pub fn handle_response(
        &mut self,
        nonce: i64,
        response_code: i32,
        signed_data: &str,
        signature: &str,
    ) -> Result<Verdict, TollkeeperError> {
        let validated = ResponseValidator::new(&self.config, nonce).validate(
            response_code,
            signed_data,
            signature,
        )?;

        self.policy
            .process_server_response(validated.verdict, validated.envelope.as_ref());
        Ok(validated.verdict)
    }

    /// Whether the application may be used right now.
    pub fn allow_access(&self) -> bool {
        self.policy.allow_access()
    }

    /// The managed policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to the managed policy (e.g. to reset it).
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Get the current configuration.
    pub fn config(&self) -> &TollkeeperConfig {
        &self.config
    }
}

impl LicenseManager<CachedPolicy> {
    /// Cached policy persisted under the platform data directory.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails or the store
    /// directory cannot be created.
    pub fn with_file_store(
        config: TollkeeperConfig,
        device_id: &str,
    ) -> Result<Self, TollkeeperError> {
        config.validate()?;
        let backend = FileBackend::new(config.app_dir, CachedPolicy::NAMESPACE)?;
        let obfuscator = Arc::new(BoundObfuscator::from_config(&config, device_id));
        let policy = CachedPolicy::new(Box::new(backend), obfuscator);
        Self::new(config, policy)
    }
}

impl LicenseManager<ManifestPolicy> {
    /// Manifest policy persisted under the platform data directory.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails or the store
    /// directory cannot be created.
    pub fn with_file_store(
        config: TollkeeperConfig,
        device_id: &str,
    ) -> Result<Self, TollkeeperError> {
        config.validate()?;
        let backend = FileBackend::new(config.app_dir, ManifestPolicy::NAMESPACE)?;
        let obfuscator = Arc::new(BoundObfuscator::from_config(&config, device_id));
        let policy = ManifestPolicy::new(Box::new(backend), obfuscator);
        Self::new(config, policy)
    }
}
