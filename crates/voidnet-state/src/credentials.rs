//! Secret generation and hashing.

use sha2::{Digest, Sha256};

use crate::error::{StateError, StateResult};

/// Random bytes per generated secret (hex-encoded to twice this length).
const SECRET_BYTES: usize = 32;

/// Generate a fresh high-entropy secret from the OS RNG.
pub fn generate_secret() -> StateResult<String> {
    let mut buf = [0u8; SECRET_BYTES];
    getrandom::getrandom(&mut buf).map_err(|e| StateError::Credential(e.to_string()))?;
    Ok(hex::encode(buf))
}

/// SHA-256 digest of a secret, hex-encoded. Admin secrets are stored only in
/// this form.
pub fn digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Compare two digests without short-circuiting on the first mismatch.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
