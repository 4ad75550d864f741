//! Access policies.
//!
//! A policy turns authenticated verdicts into a local access decision.

pub mod cached;
pub mod extensions;
pub mod manifest;
pub mod no_cache;

use crate::protocol::envelope::Envelope;
use crate::protocol::verdict::Verdict;

/// One minute, in milliseconds.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// Decision contract shared by every policy variant.
pub trait Policy: Send {
    /// Whether the application may be used right now.
    fn allow_access(&self) -> bool;

    /// Record an authenticated verdict.
    ///
    /// `envelope` is present when the authority returned signed data.
    fn process_server_response(&mut self, verdict: Verdict, envelope: Option<&Envelope>);
}

pub use cached::{CachedPolicy, PolicyState};
pub use manifest::{ExpansionFileKind, ExpansionFileSlot, ManifestPolicy};
pub use no_cache::NoCachePolicy;
