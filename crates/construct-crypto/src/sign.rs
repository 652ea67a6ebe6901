//! Ed25519 signing and verification (§4.3).
//!
//! Each signing server holds one active keypair identified by a short id
//! string (`ed25519:1`, for example), published via
//! `/_matrix/key/v2/server/{keyid}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("malformed base64 signature")]
    MalformedBase64,
    #[error("signature is not 64 bytes")]
    WrongLength,
    #[error("signature verification failed")]
    Inauthentic,
    #[error("malformed base64 or base32 public key")]
    MalformedKey,
}

/// A server's active signing identity: a keypair plus the short id under
/// which its public half is published.
pub struct ServerSigningKey {
    keyid: String,
    signing_key: SigningKey,
}

impl ServerSigningKey {
    /// Generates a fresh keypair with the given key id (e.g. `"ed25519:1"`).
    pub fn generate(keyid: impl Into<String>) -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self {
            keyid: keyid.into(),
            signing_key,
        }
    }

    /// Restores a signing key from its 32-byte seed.
    pub fn from_seed(keyid: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self {
            keyid: keyid.into(),
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn keyid(&self) -> &str {
        &self.keyid
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The base64-unpadded public key, as served from
    /// `/_matrix/key/v2/server/{keyid}` (§6).
    pub fn public_key_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs `message`, returning unpadded base64.
    pub fn sign(&self, message: &[u8]) -> String {
        let sig: Signature = self.signing_key.sign(message);
        STANDARD_NO_PAD.encode(sig.to_bytes())
    }
}

/// Verifies a base64-unpadded Ed25519 signature over `message`.
pub fn verify(
    message: &[u8],
    signature_base64: &str,
    public_key_base64: &str,
) -> Result<(), SignError> {
    let key_bytes = STANDARD_NO_PAD
        .decode(public_key_base64)
        .map_err(|_| SignError::MalformedKey)?;
    let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| SignError::MalformedKey)?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignError::MalformedKey)?;

    let sig_bytes = STANDARD_NO_PAD
        .decode(signature_base64)
        .map_err(|_| SignError::MalformedBase64)?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| SignError::WrongLength)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| SignError::Inauthentic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = ServerSigningKey::generate("ed25519:1");
        let sig = key.sign(b"hello");
        verify(b"hello", &sig, &key.public_key_base64()).unwrap();
    }

    #[test]
    fn flipping_a_message_byte_breaks_verification() {
        let key = ServerSigningKey::generate("ed25519:1");
        let sig = key.sign(b"hello");
        assert!(verify(b"hellp", &sig, &key.public_key_base64()).is_err());
    }

    #[test]
    fn seed_round_trip_is_deterministic() {
        let key1 = ServerSigningKey::generate("ed25519:1");
        let seed = key1.seed();
        let key2 = ServerSigningKey::from_seed("ed25519:1", &seed);
        assert_eq!(key1.public_key_base64(), key2.public_key_base64());
    }
}
