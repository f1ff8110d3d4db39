//! Token fingerprinting for session storage.
//!
//! Refresh tokens are never stored verbatim; sessions keep a SHA-256
//! fingerprint and compare against it on refresh.

use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint stored in `user_sessions.refresh_token_hash`.
pub fn token_fingerprint(token: &str) -> String {
    sha256_hex(token.trim())
}

/// Compares a presented token with a stored fingerprint.
///
/// Runs over the full length of both hex strings so the comparison time does
/// not depend on where the first mismatch is.
pub fn fingerprint_matches(token: &str, fingerprint: &str) -> bool {
    let candidate = token_fingerprint(token);
    if candidate.len() != fingerprint.len() {
        return false;
    }
    candidate
        .bytes()
        .zip(fingerprint.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Random alphanumeric identifier, used for pin ids created server-side
/// when the client does not supply one.
pub fn random_document_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
