//! Cryptographic primitives for storage binding and response verification.

pub mod kdf;
pub mod obfuscator;
pub mod signature;
