//! # Tollkeeper
//!
//! **Offline-tolerant license policy engine for Rust.**
//!
//! Tollkeeper decides whether an application instance currently holds a valid
//! entitlement. Verdicts come from a remote license authority as signed
//! responses; Tollkeeper verifies them, caches them in tamper-evident local
//! storage and keeps answering access queries while the authority is
//! unreachable, within bounds the authority itself sets.
//!
//! ## Features
//!
//! - **Ed25519 signature verification** of every signed authority response
//! - **Request binding** - nonce, scope id and version code must match
//! - **Three policies** - no caching, caching, caching plus an expansion-file manifest
//! - **Obfuscated storage** bound to salt, scope and device: values copied
//!   between keys or devices read as defaults
//! - **Atomic commits** - every verdict is persisted as one transaction
//!
//! ## Quickstart
//!
//! ```no_run
//! use tollkeeper::{CachedPolicy, LicenseManager, TollkeeperConfig};
//!
//! fn main() -> Result<(), tollkeeper::TollkeeperError> {
//!     let config = TollkeeperConfig {
//!         scope_id: "com.example.app",
//!         version_code: 7,
//!         salt: b"generate-once-and-hard-code",
//!         public_key_hex: "your-authority-ed25519-public-key-hex-64-characters-long-000000",
//!         app_dir: "example-app",
//!     };
//!
//!     let mut manager = LicenseManager::<CachedPolicy>::with_file_store(config, "device-id")?;
//!
//!     // nonce, response code, signed data and signature come from the transport
//!     let verdict = manager.handle_response(42, 0, "0|42|com.example.app|7|user|0:VT=0", "sig")?;
//!     println!("verdict: {:?}, access: {}", verdict, manager.allow_access());
//!     Ok(())
//! }
//! ```
//!
//! ## Threat Model
//!
//! Tollkeeper protects against:
//! - **Spoofed responses** - rejected by signature verification
//! - **Replayed responses** - rejected by nonce binding
//! - **Storage edits** - modified, moved or copied values read as defaults
//!
//! Tollkeeper does **not** prevent binary patching or code modification.
//! The storage obfuscation raises the bar for casual edits; it is not
//! protection against an attacker who can read the binary.
//!
//! ## Configuration
//!
//! - `scope_id` - Identity of the licensed application
//! - `salt` - Per-product random bytes mixed into the storage binding
//! - `public_key_hex` - Authority Ed25519 verify key (64 hex chars)
//! - `app_dir` - Directory name for the file-backed store
//!
//! See [`TollkeeperConfig`] for full documentation.

#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/tollkeeper/0.1.0")]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Storage layer
pub mod store;

// Policy layer
pub mod policy;

// Validation and manager (main public API)
pub mod manager;
pub mod validator;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::TollkeeperConfig;
pub use crypto::obfuscator::{BoundObfuscator, Obfuscator};
pub use errors::TollkeeperError;
pub use manager::LicenseManager;
pub use policy::{
    CachedPolicy, ExpansionFileKind, ExpansionFileSlot, ManifestPolicy, NoCachePolicy, Policy,
    PolicyState,
};
pub use protocol::envelope::Envelope;
pub use protocol::extras::ExtensionMap;
pub use protocol::verdict::{ResponseCode, Verdict};
pub use store::backend::{MemoryBackend, PreferenceBackend};
pub use store::file::FileBackend;
pub use store::preferences::ObfuscatedPreferences;
pub use validator::{ResponseValidator, ValidatedResponse};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
