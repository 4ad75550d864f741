//! Authority wire protocol: verdicts, response codes and the signed envelope.

pub mod envelope;
pub mod extras;
pub mod verdict;
