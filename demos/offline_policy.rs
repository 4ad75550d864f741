//! Offline policy walkthrough.
//!
//! Plays the license authority with a throwaway key, feeds its answers
//! through a `LicenseManager` and shows how the cached policy keeps granting
//! access while the authority is unreachable.
//!
//! # Running
//!
//! ```bash
//! cargo run --example offline_policy
//! ```
//!
//! # Note
//!
//! In production, `scope_id`, `salt` and `public_key_hex` are compile-time
//! constants embedded in your binary, and the private key never leaves the
//! authority.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signer, SigningKey};
use std::sync::Arc;
use tollkeeper::{
    BoundObfuscator, CachedPolicy, LicenseManager, MemoryBackend, TollkeeperConfig,
    TollkeeperError,
};

// RFC 8032 test key standing in for the authority.
const AUTHORITY_SEED: [u8; 32] = [
    0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60, 0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c, 0xc4,
    0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19, 0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae, 0x7f, 0x60,
];
const AUTHORITY_PUBLIC_KEY: &str =
    "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

const LICENSED: i32 = 0;
const CONTACTING_AUTHORITY: i32 = 0x101;

fn authority_answer(nonce: i64, extras: &str) -> (String, String) {
    let now = chrono::Utc::now().timestamp_millis();
    let data = format!("{}|{}|com.example.app|7|demo-user|{}:{}", LICENSED, nonce, now, extras);
    let signature = SigningKey::from_bytes(&AUTHORITY_SEED).sign(data.as_bytes());
    (data, STANDARD.encode(signature.to_bytes()))
}

fn main() -> Result<(), TollkeeperError> {
    let config = TollkeeperConfig {
        scope_id: "com.example.app",
        version_code: 7,
        salt: &[46, 65, 30, 128, 103, 57, 74, 64, 51, 88, 95, 45, 77, 117, 36, 113],
        public_key_hex: AUTHORITY_PUBLIC_KEY,
        app_dir: "tollkeeper-demo",
    };

    let backend = MemoryBackend::new();
    let obfuscator = Arc::new(BoundObfuscator::from_config(&config, "demo-device"));
    let policy = CachedPolicy::new(Box::new(backend.clone()), obfuscator);
    let mut manager = LicenseManager::new(config, policy)?;

    println!("Before any check: access = {}", manager.allow_access());

    // Licensed for one hour, with up to two tolerated retries.
    let valid_until = chrono::Utc::now().timestamp_millis() + 60 * 60 * 1000;
    let (data, signature) = authority_answer(1, &format!("VT={}&GT=0&GR=2", valid_until));
    let verdict = manager.handle_response(1, LICENSED, &data, &signature)?;
    println!("Authority said {:?}: access = {}", verdict, manager.allow_access());

    // The network drops out.
    for nonce in 2..=4 {
        let verdict = manager.handle_response(nonce, CONTACTING_AUTHORITY, "", "")?;
        println!(
            "Attempt {} -> {:?}: retries = {}, access = {}",
            nonce,
            verdict,
            manager.policy().consecutive_retry_count(),
            manager.allow_access()
        );
    }

    // A forged answer is rejected and changes nothing.
    let (data, _) = authority_answer(5, "VT=99999999999999");
    match manager.handle_response(5, LICENSED, &data, &STANDARD.encode([0u8; 64])) {
        Err(TollkeeperError::SignatureInvalid) => {
            println!("SECURITY: forged answer rejected");
        }
        other => println!("Unexpected: {:?}", other),
    }

    println!("Stored entries (obfuscated):");
    for (key, value) in backend.snapshot() {
        println!("  {} = {}", key, value);
    }
    Ok(())
}
