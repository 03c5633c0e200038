//! Source Fingerprinting - SHA-256 over Text
//!
//! Fingerprints drive change detection: a template is stale when the hash of
//! its current source differs from the hash recorded at the last resolve.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Fingerprint of a piece of template or generated source.
pub fn fingerprint(source: &str) -> String {
    sha256_hex(source.as_bytes())
}

// We need hex encoding
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"<p>hello</p>";
        let h1 = sha256_hex(data);
        let h2 = sha256_hex(data);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_fingerprint_distinguishes_sources() {
        assert_ne!(fingerprint("@param a"), fingerprint("@param b"));
    }

    #[test]
    fn test_hex_lowercase() {
        let h = sha256_hex(b"");
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h.len(), 64);
    }
}
