//! Ed25519 verification of signed authority responses.

use crate::TollkeeperError;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::RwLock;

/// Cache for decoded verifying keys.
static KEY_CACHE: OnceCell<RwLock<HashMap<String, VerifyingKey>>> = OnceCell::new();

/// Decode a hex-encoded Ed25519 verifying key.
///
/// The key is cached after first decode.
pub fn decode_public_key(hex_key: &str) -> Result<VerifyingKey, TollkeeperError> {
    let cache = KEY_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(guard) = cache.read() {
        if let Some(key) = guard.get(hex_key) {
            return Ok(*key);
        }
    }

    let bytes = hex::decode(hex_key)
        .map_err(|e| TollkeeperError::ConfigError(format!("Invalid public key hex: {}", e)))?;

    let key_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TollkeeperError::ConfigError("Public key must be 32 bytes".to_string()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| TollkeeperError::ConfigError(format!("Invalid Ed25519 public key: {}", e)))?;

    if let Ok(mut guard) = cache.write() {
        guard.insert(hex_key.to_string(), verifying_key);
    }

    Ok(verifying_key)
}

/// Verify a base64 Ed25519 signature over the exact bytes of `signed_data`.
///
/// Any decoding problem with the signature itself is reported as
/// `SignatureInvalid`; the signature arrives next to the response, so a
/// garbled one is indistinguishable from a forged one.
pub fn verify_signed_data(
    signed_data: &str,
    signature_b64: &str,
    verifying_key: &VerifyingKey,
) -> Result<(), TollkeeperError> {
    let sig_bytes = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| TollkeeperError::SignatureInvalid)?;

    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| TollkeeperError::SignatureInvalid)?;

    let signature = Signature::from_bytes(&sig_array);

    verifying_key
        .verify(signed_data.as_bytes(), &signature)
        .map_err(|_| TollkeeperError::SignatureInvalid)
}
