//! Policy that never caches: access follows the latest verdict only.

use crate::policy::Policy;
use crate::protocol::envelope::Envelope;
use crate::protocol::verdict::Verdict;

/// Allows access only after a `Licensed` verdict in this session.
#[derive(Debug, Clone)]
pub struct NoCachePolicy {
    last_verdict: Verdict,
}

impl NoCachePolicy {
    /// Create a policy that has seen no verdict yet.
    pub fn new() -> Self {
        Self {
            last_verdict: Verdict::Retry,
        }
    }

    /// Most recent verdict.
    pub fn last_verdict(&self) -> Verdict {
        self.last_verdict
    }
}

impl Default for NoCachePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for NoCachePolicy {
    fn allow_access(&self) -> bool {
        self.last_verdict == Verdict::Licensed
    }

    fn process_server_response(&mut self, verdict: Verdict, _envelope: Option<&Envelope>) {
        tracing::debug!(?verdict, "Processed server verdict (no cache)");
        self.last_verdict = verdict;
    }
}
