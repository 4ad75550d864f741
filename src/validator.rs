//! Response validation pipeline.
//!
//! Turns a raw authority answer into a [`Verdict`]:
//! 1. Map the response code (unsigned codes stop here)
//! 2. Verify the Ed25519 signature over the signed data
//! 3. Parse the envelope
//! 4. Check the envelope echoes this request and this application

use crate::config::TollkeeperConfig;
use crate::crypto::signature::{decode_public_key, verify_signed_data};
use crate::protocol::envelope::Envelope;
use crate::protocol::verdict::{ResponseCode, Verdict};
use crate::TollkeeperError;

/// Authenticated outcome of one license check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedResponse {
    /// Verdict to feed into a policy.
    pub verdict: Verdict,
    /// Parsed signed data, for codes that carry it.
    pub envelope: Option<Envelope>,
}

/// Validates the answer to a single request.
#[derive(Debug, Clone)]
pub struct ResponseValidator<'a> {
    config: &'a TollkeeperConfig,
    expected_nonce: i64,
}

impl<'a> ResponseValidator<'a> {
    /// Create a validator for the request that was sent with `expected_nonce`.
    pub fn new(config: &'a TollkeeperConfig, expected_nonce: i64) -> Self {
        Self {
            config,
            expected_nonce,
        }
    }

    /// Validate a raw authority answer.
    ///
    /// # Errors
    /// * `MalformedResponse` - unknown response code or unparseable envelope
    /// * `SignatureInvalid` - signature does not cover `signed_data`
    /// * `ResponseMismatch` - envelope answers a different request or app
    /// * `ApplicationError` - the authority rejected the application itself
    /// * `ConfigError` - the configured public key is unusable
    pub fn validate(
        &self,
        response_code: i32,
        signed_data: &str,
        signature_b64: &str,
    ) -> Result<ValidatedResponse, TollkeeperError> {
        let code = ResponseCode::from_raw(response_code).ok_or_else(|| {
            TollkeeperError::MalformedResponse(format!("Unknown response code {}", response_code))
        })?;

        let verdict = match code {
            ResponseCode::Licensed | ResponseCode::LicensedOldKey => Verdict::Licensed,
            ResponseCode::NotLicensed => Verdict::NotLicensed,
            ResponseCode::ServerFailure
            | ResponseCode::OverQuota
            | ResponseCode::ContactingAuthority => {
                tracing::debug!(?code, "Authority unavailable; treating as retry");
                return Ok(ValidatedResponse {
                    verdict: Verdict::Retry,
                    envelope: None,
                });
            }
            ResponseCode::NotManaged | ResponseCode::InvalidScope | ResponseCode::NonMatchingUser => {
                tracing::error!(?code, "Authority rejected the application");
                return Err(TollkeeperError::ApplicationError {
                    code: response_code,
                });
            }
        };

        let verifying_key = decode_public_key(self.config.public_key_hex)?;
        verify_signed_data(signed_data, signature_b64, &verifying_key)?;

        let envelope = Envelope::parse(signed_data)?;
        self.check_envelope(response_code, &envelope)?;

        Ok(ValidatedResponse {
            verdict,
            envelope: Some(envelope),
        })
    }

    fn check_envelope(&self, response_code: i32, envelope: &Envelope) -> Result<(), TollkeeperError> {
        if envelope.response_code != response_code {
            return Err(TollkeeperError::ResponseMismatch(format!(
                "Response code {} does not match signed code {}",
                response_code, envelope.response_code
            )));
        }
        if envelope.nonce != self.expected_nonce {
            return Err(TollkeeperError::ResponseMismatch(format!(
                "Nonce {} does not match request nonce {}",
                envelope.nonce, self.expected_nonce
            )));
        }
        if envelope.scope_id != self.config.scope_id {
            return Err(TollkeeperError::ResponseMismatch(format!(
                "Scope {} does not match {}",
                envelope.scope_id, self.config.scope_id
            )));
        }
        if envelope.version_code != self.config.version_code.to_string() {
            return Err(TollkeeperError::ResponseMismatch(format!(
                "Version code {} does not match {}",
                envelope.version_code, self.config.version_code
            )));
        }
        if envelope.user_id.is_empty() {
            return Err(TollkeeperError::ResponseMismatch(
                "Signed response has no user id".to_string(),
            ));
        }
        Ok(())
    }
}
