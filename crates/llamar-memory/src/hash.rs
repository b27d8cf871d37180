//! Content hashing for change detection. MD5 is deliberate: the digests
//! gate re-indexing and nothing else, so speed and stability across
//! versions matter more than collision resistance.

use md5::{Digest, Md5};

/// Lowercase MD5 hex digest of the UTF-8 bytes of `text`.
pub fn hash(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // The classic test vectors.
        assert_eq!(hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_stable_across_calls() {
        assert_eq!(hash("some text"), hash("some text"));
    }

    #[test]
    fn test_sensitive_to_single_char() {
        assert_ne!(hash("line one\nline two"), hash("line one\nline twO"));
    }
}
