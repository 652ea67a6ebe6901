//! Loading and persisting a server's signing key (§4.3, §6).
//!
//! Stored as a single line `ed25519 <keyid-version> <base64-unpadded-seed>`,
//! the same shape Matrix homeservers have used for their `signing.key` file
//! since the reference implementation's synapse days.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use construct_crypto::ServerSigningKey;

use crate::error::{HomeserverError, Result};

/// Loads the signing key at `path`, generating and persisting a fresh
/// `ed25519:1` key if the file does not exist yet.
pub fn load_or_generate(path: &Path) -> Result<ServerSigningKey> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::read_to_string(path) {
        Ok(contents) => parse(&contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let key = ServerSigningKey::generate("ed25519:1");
            fs::write(path, serialize(&key))?;
            tracing::info!(path = %path.display(), keyid = key.keyid(), "generated new signing key");
            Ok(key)
        }
        Err(err) => Err(err.into()),
    }
}

fn serialize(key: &ServerSigningKey) -> String {
    let version = key.keyid().strip_prefix("ed25519:").unwrap_or(key.keyid());
    format!("ed25519 {version} {}\n", STANDARD_NO_PAD.encode(key.seed()))
}

fn parse(contents: &str) -> Result<ServerSigningKey> {
    let line = contents
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| HomeserverError::Malformed("empty signing key file".into()))?;
    let mut parts = line.split_whitespace();
    let algorithm = parts.next().ok_or_else(|| HomeserverError::Malformed("missing algorithm".into()))?;
    if algorithm != "ed25519" {
        return Err(HomeserverError::Malformed(format!("unsupported signing key algorithm {algorithm}")));
    }
    let version = parts.next().ok_or_else(|| HomeserverError::Malformed("missing key version".into()))?;
    let seed_b64 = parts.next().ok_or_else(|| HomeserverError::Malformed("missing key seed".into()))?;

    let seed_bytes = STANDARD_NO_PAD
        .decode(seed_b64)
        .map_err(|_| HomeserverError::Malformed("signing key seed is not valid base64".into()))?;
    let seed: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| HomeserverError::Malformed("signing key seed must be 32 bytes".into()))?;

    Ok(ServerSigningKey::from_seed(format!("ed25519:{version}"), &seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_a_fresh_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/signing.key");
        assert!(!path.exists());

        let key = load_or_generate(&path).unwrap();
        assert!(path.exists());
        assert_eq!(key.keyid(), "ed25519:1");
    }

    #[test]
    fn reloading_returns_the_same_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signing.key");

        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();
        assert_eq!(first.public_key_base64(), second.public_key_base64());
    }

    #[test]
    fn rejects_an_unknown_algorithm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signing.key");
        fs::write(&path, "rsa 1 deadbeef\n").unwrap();
        assert!(load_or_generate(&path).is_err());
    }
}
