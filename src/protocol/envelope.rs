//! Signed response envelope.
//!
//! Wire grammar:
//! ```text
//! <responseCode>|<nonce>|<scopeId>|<versionCode>|<userId>|<timestampMs>:<extensions>
//! ```

use crate::protocol::extras::{decode_extras, ExtensionMap};
use crate::TollkeeperError;

/// Number of fixed positional header fields.
pub const HEADER_FIELDS: usize = 6;

/// Parsed authority response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Response code echoed inside the signed data.
    pub response_code: i32,
    /// Nonce of the request this answers.
    pub nonce: i64,
    /// Scope (application) identity.
    pub scope_id: String,
    /// Version code of the requesting build.
    pub version_code: String,
    /// Opaque user identifier.
    pub user_id: String,
    /// Authority timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Raw, still-encoded extension segment.
    pub extension_segment: String,
}

impl Envelope {
    /// Parse a raw signed response string.
    ///
    /// # Errors
    /// `MalformedResponse` when the six header fields or the `:` delimiter are
    /// missing, or a numeric field does not parse.
    pub fn parse(raw: &str) -> Result<Self, TollkeeperError> {
        // The sixth field ends at the first ':' after the fifth '|'.
        let sixth_start = raw
            .match_indices('|')
            .nth(HEADER_FIELDS - 2)
            .map(|(idx, _)| idx + 1)
            .ok_or_else(|| {
                TollkeeperError::MalformedResponse(format!(
                    "Expected {} '|'-separated header fields",
                    HEADER_FIELDS
                ))
            })?;

        let colon = raw[sixth_start..]
            .find(':')
            .map(|offset| sixth_start + offset)
            .ok_or_else(|| {
                TollkeeperError::MalformedResponse(
                    "Missing ':' before extension segment".to_string(),
                )
            })?;

        let header = &raw[..colon];
        let extension_segment = &raw[colon + 1..];

        let fields: Vec<&str> = header.split('|').collect();
        if fields.len() != HEADER_FIELDS {
            return Err(TollkeeperError::MalformedResponse(format!(
                "Expected {} header fields, got {}",
                HEADER_FIELDS,
                fields.len()
            )));
        }

        Ok(Self {
            response_code: parse_number(fields[0], "response code")?,
            nonce: parse_number(fields[1], "nonce")?,
            scope_id: fields[2].to_string(),
            version_code: fields[3].to_string(),
            user_id: fields[4].to_string(),
            timestamp_ms: parse_number(fields[5], "timestamp")?,
            extension_segment: extension_segment.to_string(),
        })
    }

    /// Decode the extension segment.
    ///
    /// # Errors
    /// `MalformedExtras` on a broken escape; see [`Envelope::extras`] for the
    /// recovering form.
    pub fn try_extras(&self) -> Result<ExtensionMap, TollkeeperError> {
        decode_extras(&self.extension_segment)
    }

    /// Decode the extension segment, falling back to an empty map.
    pub fn extras(&self) -> ExtensionMap {
        match self.try_extras() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring undecodable extension segment");
                ExtensionMap::new()
            }
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, name: &str) -> Result<T, TollkeeperError> {
    field.parse().map_err(|_| {
        TollkeeperError::MalformedResponse(format!("Invalid {}: {:?}", name, field))
    })
}
