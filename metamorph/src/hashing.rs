//! Conversion identity hashing.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a source URL.
///
/// This is the primary key fragment for every cache and queue record, so it
/// must stay byte-for-byte stable across processes and releases.
pub fn sha256_hex(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{digest:x}")
}
