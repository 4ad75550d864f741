//! Storage binding key derivation.
//!
//! Keys are derived from the application salt and the scope and device
//! identities, so values written on one device (or by another application)
//! cannot be decoded on another.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 iteration count for the binding master key.
pub const KDF_ROUNDS: u32 = 1024;

const CIPHER_LABEL: &[u8] = b"tollkeeper/cipher/v1";
const MAC_LABEL: &[u8] = b"tollkeeper/mac/v1";

/// Sub-keys derived from one storage binding.
#[derive(Clone)]
pub struct BindingKeys {
    /// Keystream key.
    pub cipher: [u8; 32],
    /// Synthetic-IV / integrity key.
    pub mac: [u8; 32],
}

impl std::fmt::Debug for BindingKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingKeys").finish_non_exhaustive()
    }
}

/// One-shot HMAC-SHA256 over the concatenation of `parts`.
pub(crate) fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Derive the cipher and MAC keys for a `(salt, scope_id, device_id)` binding.
///
/// The master key is PBKDF2-HMAC-SHA256 over the length-prefixed identity,
/// salted with the application salt.
pub fn derive_binding_keys(salt: &[u8], scope_id: &str, device_id: &str) -> BindingKeys {
    let master = master_key(salt, &binding_identity(scope_id, device_id));

    BindingKeys {
        cipher: hmac_sha256(&master, &[CIPHER_LABEL]),
        mac: hmac_sha256(&master, &[MAC_LABEL]),
    }
}

fn binding_identity(scope_id: &str, device_id: &str) -> Vec<u8> {
    let mut identity = Vec::with_capacity(16 + scope_id.len() + device_id.len());
    push_len_prefixed(&mut identity, scope_id.as_bytes());
    push_len_prefixed(&mut identity, device_id.as_bytes());
    identity
}

fn master_key(salt: &[u8], identity: &[u8]) -> [u8; 32] {
    let mut master = [0u8; 32];
    pbkdf2_hmac::<Sha256>(identity, salt, KDF_ROUNDS, &mut master);
    master
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}
