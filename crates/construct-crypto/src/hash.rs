//! SHA-256 digests and the base64/base58 encodings layered on top of them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha2::{Digest, Sha256};

/// A raw 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let out: [u8; 32] = hasher.finalize().into();
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Unpadded standard base64, the encoding used for `hashes.sha256` and
    /// for node ids in the state tree (§4.3, §4.5).
    pub fn to_base64_unpadded(self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }

    /// Base58 (Bitcoin alphabet), used only for `event_id` derivation (§4.4).
    pub fn to_base58(self) -> String {
        bs58::encode(self.0).into_string()
    }
}

/// Convenience one-shot: SHA-256 then unpadded base64.
pub fn sha256_base64_unpadded(bytes: &[u8]) -> String {
    Sha256Digest::of(bytes).to_base64_unpadded()
}

/// Convenience one-shot: SHA-256 then base58.
pub fn sha256_base58(bytes: &[u8]) -> String {
    Sha256Digest::of(bytes).to_base58()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_vector() {
        // SHA-256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let d = Sha256Digest::of(b"");
        let hex: String = d.as_bytes().iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(
            hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn base64_has_no_padding() {
        let s = sha256_base64_unpadded(b"hello");
        assert!(!s.contains('='));
    }

    #[test]
    fn base58_never_contains_ambiguous_glyphs() {
        let s = sha256_base58(b"hello world");
        for ambiguous in ['0', 'O', 'I', 'l'] {
            assert!(!s.contains(ambiguous));
        }
    }
}
