//! Body signing with a shared key.
//!
//! The signature is `hex(sha256(body || key))`, computed over the bytes as
//! they travel on the wire (i.e. after compression).

use sha2::{Digest, Sha256};

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "hashsha256";

pub fn sign(body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a received signature against the body.
pub fn verify(body: &[u8], key: &str, signature: &str) -> bool {
    let expected = sign(body, key);
    let signature = signature.trim();
    if expected.len() != signature.len() {
        return false;
    }
    expected
        .bytes()
        .zip(signature.bytes().map(|b| b.to_ascii_lowercase()))
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
