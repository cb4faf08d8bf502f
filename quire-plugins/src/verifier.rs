//! Source verification: SHA-256 (and optional SHA-512) digest checks

use base64::Engine;
use sdk::errors::SourceError;
use sdk::manifest::Integrity;
use sha2::{Digest, Sha256, Sha512};

use crate::code::{DownloadedCode, VerifiedCode};

/// Whether the SHA-256 of `data` matches `expected_hex` (case-insensitive)
pub fn verify_integrity(data: &[u8], expected_hex: &str) -> bool {
    compute_hash(data).eq_ignore_ascii_case(expected_hex.trim())
}

/// Compute the SHA-256 hash of `data` and return hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-512 hash of `data` and return hex string
pub fn compute_hash_512(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify downloaded code against the manifest digests
///
/// The exact downloaded bytes are hashed. When the manifest also carries a
/// `sha512` digest (hex or base64) it must match too.
///
/// # Errors
///
/// Returns [`SourceError::Integrity`] on any mismatch. There is no lenient
/// mode: a mismatch always blocks execution. Bytes that match but are not
/// UTF-8 text are a [`SourceError::Structural`] error.
pub fn verify_code(
    id: &str,
    code: DownloadedCode,
    integrity: &Integrity,
) -> Result<VerifiedCode, SourceError> {
    let bytes = code.bytes();
    let actual = compute_hash(bytes);

    if !actual.eq_ignore_ascii_case(integrity.sha256.trim()) {
        tracing::error!(source_id = %id, origin = %code.origin(), "SHA-256 mismatch");
        return Err(SourceError::Integrity {
            id: id.to_string(),
            expected: integrity.sha256.to_lowercase(),
            actual,
        });
    }

    if let Some(expected_512) = integrity.sha512.as_deref().filter(|s| !s.is_empty()) {
        let digest = {
            let mut hasher = Sha512::new();
            hasher.update(bytes);
            hasher.finalize()
        };
        if !sha512_matches(&digest, expected_512) {
            tracing::error!(source_id = %id, origin = %code.origin(), "SHA-512 mismatch");
            return Err(SourceError::Integrity {
                id: id.to_string(),
                expected: expected_512.to_string(),
                actual: hex::encode(digest),
            });
        }
    }

    tracing::debug!(source_id = %id, sha256 = %actual, "Integrity verified");
    code.into_verified(actual)
}

/// Manifests publish SHA-512 either as hex or as base64 (optionally with
/// an SRI-style `sha512-` prefix).
fn sha512_matches(digest: &[u8], expected: &str) -> bool {
    let expected = expected.trim();
    let expected = expected.strip_prefix("sha512-").unwrap_or(expected);

    if expected.len() == 128 && expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::encode(digest).eq_ignore_ascii_case(expected);
    }

    base64::engine::general_purpose::STANDARD
        .decode(expected)
        .is_ok_and(|decoded| decoded == digest)
}
