//! Content fingerprinting for entry identity comparison.
//!
//! A fingerprint is a hash of an entry's trimmed content, computed
//! client-side so it is stable across both storage backends. It is an
//! equality accelerator, not an integrity guarantee.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hash of an entry's trimmed content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Get the hex string representation of this fingerprint
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of entry content.
///
/// Leading/trailing whitespace is stripped before hashing; no other
/// normalization is applied. Case, internal whitespace, and punctuation
/// are all significant — near-duplicate detection is handled separately
/// by the duplicate detector.
#[must_use]
pub fn fingerprint(content: &str) -> Fingerprint {
    let hash = blake3::hash(content.trim().as_bytes());
    Fingerprint(hash.to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("Dear diary, today was a good day.");
        let b = fingerprint("Dear diary, today was a good day.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_trims_outer_whitespace() {
        assert_eq!(fingerprint("  hello world \n"), fingerprint("hello world"));
    }

    #[test]
    fn test_fingerprint_inner_whitespace_significant() {
        assert_ne!(fingerprint("hello world"), fingerprint("hello  world"));
    }

    #[test]
    fn test_fingerprint_case_significant() {
        assert_ne!(fingerprint("Hello"), fingerprint("hello"));
    }

    #[test]
    fn test_fingerprint_empty_contents_equal() {
        assert_eq!(fingerprint(""), fingerprint("   \n\t"));
    }

    #[test]
    fn test_fingerprint_display_is_hex() {
        let fp = fingerprint("x");
        assert!(fp.to_string().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
