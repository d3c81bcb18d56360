//! Text normalization and content fingerprints.
//!
//! Fingerprints are computed over normalized text so that whitespace-only
//! differences between two fetches do not register as an update.

use sha2::{Digest, Sha256};

/// Collapses runs of whitespace within each line, trims lines, and drops
/// empty ones. Lines are joined with `\n`.
pub fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercase hex SHA-256 of `text`.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
