//! Checksums for schema sources
//!
//! SHA-256 of the source text, recorded when a source is applied

use sha2::{Digest, Sha256};

/// Compute the hex SHA-256 of a schema source
pub fn compute_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
