//! PKCE material and correlation-state generation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate PKCE code verifier (43-128 characters per RFC 7636)
pub fn generate_code_verifier() -> String {
    let mut random_bytes = [0u8; 32]; // 32 bytes = 43 chars base64
    rand::thread_rng().fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate PKCE code challenge (SHA-256 of verifier)
pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate an unguessable state token. Doubles as CSRF protection and as
/// the correlation key for pending login flows.
pub fn generate_state() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(random_bytes)
}
