//! Node identity key management
//!
//! The key pair is created once, persisted as `keypair.json` in the node's
//! storage directory and read-only afterwards.

use ed25519_dalek::SigningKey;
use hypercorn_core::FeedKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::chain::{issue_link, LinkRequest, TrustLink};

/// Key management errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed key file: {0}")]
    Malformed(String),

    #[error("Stored public key does not match the secret key")]
    Mismatch,
}

pub type Result<T> = std::result::Result<T, KeyError>;

/// On-disk representation. Both fields are hex.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeyPair {
    public_key: String,
    secret_key: String,
}

/// The node's signing identity.
pub struct KeyPair {
    public_key: FeedKey,
    signing_key: SigningKey,
    just_created: bool,
}

impl KeyPair {
    /// Generate a fresh identity. The result reports `just_created`.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let mut pair = Self::from_seed(&seed);
        seed.zeroize();
        pair.just_created = true;
        pair
    }

    /// Rebuild an identity from its 32 byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public_key = FeedKey::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            public_key,
            signing_key,
            just_created: false,
        }
    }

    /// Load the key pair stored at `path`, or create and persist a new one.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let pair = Self::load(path)?;
            info!(feed = %pair.public_key, "Loaded node identity");
            return Ok(pair);
        }

        let pair = Self::generate();
        pair.save(path)?;
        info!(feed = %pair.public_key, path = %path.display(), "Created node identity");
        Ok(pair)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut raw = std::fs::read_to_string(path)?;
        let parsed = serde_json::from_str::<StoredKeyPair>(&raw);
        raw.zeroize();
        let stored = parsed.map_err(|e| KeyError::Malformed(e.to_string()))?;

        let mut seed_bytes =
            hex::decode(&stored.secret_key).map_err(|e| KeyError::Malformed(e.to_string()))?;
        let seed: Result<[u8; 32]> = seed_bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Malformed("secret key must be 32 bytes".to_string()));
        seed_bytes.zeroize();
        let mut seed = seed?;

        let pair = Self::from_seed(&seed);
        seed.zeroize();

        let expected =
            FeedKey::from_hex(&stored.public_key).map_err(|e| KeyError::Malformed(e.to_string()))?;
        if expected != pair.public_key {
            return Err(KeyError::Mismatch);
        }
        Ok(pair)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredKeyPair {
            public_key: self.public_key.to_hex(),
            secret_key: hex::encode(self.signing_key.to_bytes()),
        };
        let mut json =
            serde_json::to_string_pretty(&stored).map_err(|e| KeyError::Malformed(e.to_string()))?;
        let written = write_private(path, json.as_bytes());
        json.zeroize();
        written
    }

    pub fn public_key(&self) -> FeedKey {
        self.public_key
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Whether this identity was generated by this process rather than loaded.
    pub fn just_created(&self) -> bool {
        self.just_created
    }

    /// Sign a trust link for `subject` expiring at `expires_at` (unix seconds).
    pub fn issue_link(&self, subject: FeedKey, expires_at: u64) -> TrustLink {
        issue_link(
            &LinkRequest {
                subject,
                expiration: expires_at,
            },
            &self.signing_key,
        )
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("just_created", &self.just_created)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_key_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("hypercorn_keys_{}", uuid::Uuid::new_v4()))
            .join("keypair.json")
    }

    #[test]
    fn test_create_then_reload() {
        let path = temp_key_path();

        let created = KeyPair::load_or_create(&path).unwrap();
        assert!(created.just_created());

        let loaded = KeyPair::load_or_create(&path).unwrap();
        assert!(!loaded.just_created());
        assert_eq!(created.public_key(), loaded.public_key());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_detects_mismatched_public_key() {
        let path = temp_key_path();
        let pair = KeyPair::generate();
        pair.save(&path).unwrap();

        let other = KeyPair::generate();
        let tampered = serde_json::json!({
            "public_key": other.public_key().to_hex(),
            "secret_key": hex::encode(pair.signing_key().to_bytes()),
        });
        std::fs::write(&path, tampered.to_string()).unwrap();

        assert!(matches!(KeyPair::load(&path), Err(KeyError::Mismatch)));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_rejects_malformed_file() {
        let path = temp_key_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"public_key\": \"00\"}").unwrap();

        assert!(matches!(KeyPair::load(&path), Err(KeyError::Malformed(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&hex::encode(pair.signing_key().to_bytes())));
    }
}
