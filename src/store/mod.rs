//! Persistence: the backend substrate and the obfuscated preference store.

pub mod backend;
pub mod file;
pub mod preferences;
