//! Hashing - SHA-256 checksums for embedded provenance
//!
//! The checksum is computed over the exact payload text that gets written
//! onto the page, so any edit to that text shows up on decode.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn checksum(payload: &str) -> String {
    sha256_hex(payload.as_bytes())
}

pub fn verify(payload: &str, expected: &str) -> bool {
    checksum(payload).eq_ignore_ascii_case(expected.trim())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
