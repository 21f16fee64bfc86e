//! Blob integrity digests.
//!
//! Every queue message carries the SHA-256 of the blob it points at; stage
//! processors verify the digest before acting. A mismatch is treated as
//! data corruption, never as a transient fault.

use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Verifies that `bytes` hash to `expected` (case-insensitive hex).
///
/// # Errors
///
/// Returns `CoreError::DigestMismatch` when they do not.
pub fn verify_digest(bytes: &[u8], expected: &str) -> Result<()> {
    let computed = sha256_hex(bytes);
    if computed.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CoreError::digest_mismatch(expected, computed))
    }
}
