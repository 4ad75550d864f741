//! Tollkeeper error types.

use thiserror::Error;

/// Errors raised by the policy engine, its storage and the response validator.
#[derive(Debug, Error)]
pub enum TollkeeperError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The authority's response does not follow the wire grammar.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The extension segment could not be decoded.
    #[error("Malformed extras: {0}")]
    MalformedExtras(String),

    /// Obfuscated value was tampered with, truncated, or produced under a
    /// different binding or key.
    #[error("Obfuscated value failed validation")]
    ValidationFailure,

    /// A value decoded cleanly but does not parse as the requested type.
    #[error("Stored value for {key} has the wrong type (expected {expected})")]
    TypeMismatch {
        /// Preference key that held the value.
        key: String,
        /// Name of the type the caller asked for.
        expected: &'static str,
    },

    /// A file extension key carried an index outside the supported slots.
    #[error("Extension {key} refers to unsupported file index {index}")]
    OutOfRangeExtension {
        /// The offending extension key.
        key: String,
        /// The index parsed from the key.
        index: u32,
    },

    /// Preference backend I/O error.
    #[error("Store I/O error: {0}")]
    StoreIO(String),

    /// Response signature verification failed.
    #[error("Response signature verification failed")]
    SignatureInvalid,

    /// Signed response does not match the request that produced it.
    #[error("Response mismatch: {0}")]
    ResponseMismatch(String),

    /// The authority reported a problem with the application itself.
    #[error("Authority reported application error {code}")]
    ApplicationError {
        /// Raw response code from the authority.
        code: i32,
    },
}
