//! Reversible, tamper-evident obfuscation of persisted values.
//!
//! Format (base64 of): `iv[16] || (tag || plaintext) XOR keystream`
//!
//! - `iv` is a synthetic IV: the left 16 bytes of
//!   `HMAC(mac_key, len(key) || key || tag || plaintext)`. Equal inputs give
//!   equal ciphertext, and any change to the binding, the caller key or the
//!   bytes is caught when the IV is recomputed on decode.
//! - `tag` distinguishes an absent value (`0x00`) from a present one (`0x01`).
//! - The keystream is SHA-256 in counter mode over `cipher_key || iv || ctr`.

use crate::crypto::kdf::{derive_binding_keys, BindingKeys};
use crate::TollkeeperError;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length of the synthetic IV prefix in bytes.
pub const IV_LEN: usize = 16;

const TAG_ABSENT: u8 = 0x00;
const TAG_PRESENT: u8 = 0x01;

/// Two-way obfuscation of string values.
pub trait Obfuscator: Send + Sync {
    /// Obfuscate a value. `key` is the preference key the value is stored
    /// under; it becomes part of the integrity check.
    fn obfuscate(&self, plaintext: Option<&str>, key: &str) -> String;

    /// Reverse [`Obfuscator::obfuscate`].
    ///
    /// # Errors
    /// `ValidationFailure` for any corrupt, truncated or foreign input.
    fn unobfuscate(&self, ciphertext: &str, key: &str)
        -> Result<Option<String>, TollkeeperError>;
}

/// Obfuscator bound to a `(salt, scope_id, device_id)` identity.
#[derive(Debug, Clone)]
pub struct BoundObfuscator {
    keys: BindingKeys,
}

impl BoundObfuscator {
    /// Derive a new obfuscator for the given binding.
    pub fn new(salt: &[u8], scope_id: &str, device_id: &str) -> Self {
        Self {
            keys: derive_binding_keys(salt, scope_id, device_id),
        }
    }

    /// Build from product configuration and the runtime device identifier.
    pub fn from_config(config: &crate::TollkeeperConfig, device_id: &str) -> Self {
        Self::new(config.salt, config.scope_id, device_id)
    }

    fn iv_mac(&self, key: &str, body: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.keys.mac).expect("HMAC accepts keys of any length");
        mac.update(&(key.len() as u64).to_be_bytes());
        mac.update(key.as_bytes());
        mac.update(body);
        mac
    }

    fn apply_keystream(&self, iv: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (counter, chunk) in data.chunks(32).enumerate() {
            let block = Sha256::new()
                .chain_update(self.keys.cipher)
                .chain_update(iv)
                .chain_update((counter as u64).to_be_bytes())
                .finalize();
            out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
        }
        out
    }
}

impl Obfuscator for BoundObfuscator {
    fn obfuscate(&self, plaintext: Option<&str>, key: &str) -> String {
        let body = match plaintext {
            None => vec![TAG_ABSENT],
            Some(text) => {
                let mut body = Vec::with_capacity(1 + text.len());
                body.push(TAG_PRESENT);
                body.extend_from_slice(text.as_bytes());
                body
            }
        };

        let tag = self.iv_mac(key, &body).finalize().into_bytes();
        let iv = &tag[..IV_LEN];

        let mut sealed = Vec::with_capacity(IV_LEN + body.len());
        sealed.extend_from_slice(iv);
        sealed.extend(self.apply_keystream(iv, &body));
        STANDARD.encode(sealed)
    }

    fn unobfuscate(
        &self,
        ciphertext: &str,
        key: &str,
    ) -> Result<Option<String>, TollkeeperError> {
        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|_| TollkeeperError::ValidationFailure)?;

        if raw.len() <= IV_LEN {
            return Err(TollkeeperError::ValidationFailure);
        }

        let (iv, sealed) = raw.split_at(IV_LEN);
        let body = self.apply_keystream(iv, sealed);

        self.iv_mac(key, &body)
            .verify_truncated_left(iv)
            .map_err(|_| TollkeeperError::ValidationFailure)?;

        match body.split_first() {
            Some((&TAG_ABSENT, rest)) if rest.is_empty() => Ok(None),
            Some((&TAG_PRESENT, rest)) => String::from_utf8(rest.to_vec())
                .map(Some)
                .map_err(|_| TollkeeperError::ValidationFailure),
            _ => Err(TollkeeperError::ValidationFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = &[
        104, 244, 112, 82, 171, 246, 245, 61, 15, 54, 44, 190, 139, 167, 192, 110, 203, 123, 33,
        81,
    ];
    const SCOPE: &str = "com.example.app";
    const DEVICE: &str = "device-0001";
    const KEY: &str = "tollkeeper.cached.validityTimestamp";

    fn codec() -> BoundObfuscator {
        BoundObfuscator::new(SALT, SCOPE, DEVICE)
    }

    fn assert_round_trip(codec: &BoundObfuscator, value: Option<&str>) {
        let sealed = codec.obfuscate(value, KEY);
        let opened = codec.unobfuscate(&sealed, KEY).unwrap();
        assert_eq!(opened.as_deref(), value);
    }

    #[test]
    fn test_round_trip_absent_and_empty() {
        let codec = codec();
        assert_round_trip(&codec, None);
        assert_round_trip(&codec, Some(""));
    }

    #[test]
    fn test_absent_and_empty_are_distinct() {
        let codec = codec();
        assert_ne!(codec.obfuscate(None, KEY), codec.obfuscate(Some(""), KEY));
    }

    #[test]
    fn test_round_trip_text() {
        let codec = codec();
        assert_round_trip(&codec, Some("1234567890"));
        assert_round_trip(&codec, Some("The quick brown fox jumps over the lazy dog"));
        assert_round_trip(&codec, Some("Ünïcödé ✓ 許可 🔑"));
        assert_round_trip(&codec, Some(&"x".repeat(4096)));
    }

    #[test]
    fn test_round_trip_all_lengths_around_blocks() {
        let codec = codec();
        for len in 0..100 {
            let value = "a".repeat(len);
            assert_round_trip(&codec, Some(&value));
        }
    }

    #[test]
    fn test_deterministic_across_instances() {
        let a = codec();
        let b = codec();
        for value in [None, Some(""), Some("291"), Some("hello world")] {
            assert_eq!(a.obfuscate(value, KEY), b.obfuscate(value, KEY));
        }
    }

    #[test]
    fn test_different_plaintexts_differ() {
        let codec = codec();
        assert_ne!(
            codec.obfuscate(Some("256"), KEY),
            codec.obfuscate(Some("561"), KEY)
        );
    }

    #[test]
    fn test_foreign_binding_or_key_fails_for_every_length() {
        let producer = codec();
        let other_salt = BoundObfuscator::new(b"another salt", SCOPE, DEVICE);
        let other_scope = BoundObfuscator::new(SALT, "com.example.other", DEVICE);
        let other_device = BoundObfuscator::new(SALT, SCOPE, "device-0002");

        for len in 0..255 {
            let value = "z".repeat(len);
            let sealed = producer.obfuscate(Some(&value), KEY);

            for consumer in [&other_salt, &other_scope, &other_device] {
                assert!(
                    matches!(
                        consumer.unobfuscate(&sealed, KEY),
                        Err(TollkeeperError::ValidationFailure)
                    ),
                    "foreign binding accepted at length {}",
                    len
                );
            }
            assert!(matches!(
                producer.unobfuscate(&sealed, "tollkeeper.cached.retryUntil"),
                Err(TollkeeperError::ValidationFailure)
            ));
        }
    }

    #[test]
    fn test_garbage_input_is_validation_failure() {
        let codec = codec();
        for input in ["", "!!!", "not base64 at all", "AAAA", "AAAAAAAAAAAAAAAAAAAAAA=="] {
            assert!(matches!(
                codec.unobfuscate(input, KEY),
                Err(TollkeeperError::ValidationFailure)
            ));
        }
    }

    #[test]
    fn test_truncation_at_any_length_is_validation_failure() {
        let codec = codec();
        let sealed = codec.obfuscate(Some(&"payload".repeat(10)), KEY);
        let raw = STANDARD.decode(&sealed).unwrap();

        for len in 0..raw.len() {
            let truncated = STANDARD.encode(&raw[..len]);
            assert!(matches!(
                codec.unobfuscate(&truncated, KEY),
                Err(TollkeeperError::ValidationFailure)
            ));
        }
    }

    #[test]
    fn test_bit_flip_is_detected() {
        let codec = codec();
        let sealed = codec.obfuscate(Some("256"), KEY);
        let raw = STANDARD.decode(&sealed).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(
                codec.unobfuscate(&STANDARD.encode(&tampered), KEY),
                Err(TollkeeperError::ValidationFailure)
            ));
        }
    }

    #[test]
    fn test_ciphertext_does_not_leak_plaintext() {
        let codec = codec();
        let sealed = codec.obfuscate(Some("LICENSED"), KEY);
        assert!(!sealed.contains("LICENSED"));
    }
}
