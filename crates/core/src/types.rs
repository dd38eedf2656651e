//! Feed identities and cross-feed references.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CoreError, Result};

/// Public key identifying a feed (Ed25519 verifying key bytes).
///
/// Two encodings are canonical: lowercase hex for storage paths and logs,
/// standard base64 for message payloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey([u8; FeedKey::LEN]);

impl FeedKey {
    /// Length of a feed key in bytes
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            CoreError::InvalidKey(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Parse either encoding. A 64 character hex string is read as hex,
    /// anything else as base64.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() == Self::LEN * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::from_hex(s)
        } else {
            Self::from_base64(s)
        }
    }

    /// Short hex prefix for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey({}..)", self.short())
    }
}

impl FromStr for FeedKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for FeedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FeedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FeedKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Pointer at one entry of a feed.
///
/// A replying post stores the forward reference; the target feed stores the
/// backward annotation pointing at the replier's feed and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyRef {
    pub feed_key: FeedKey,
    pub index: u64,
}

impl ReplyRef {
    pub fn new(feed_key: FeedKey, index: u64) -> Self {
        Self { feed_key, index }
    }
}

/// Current unix time in seconds.
pub fn current_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> FeedKey {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        FeedKey::from_bytes(bytes)
    }

    #[test]
    fn test_parse_accepts_both_encodings() {
        let key = sample_key();
        assert_eq!(FeedKey::parse(&key.to_hex()).unwrap(), key);
        assert_eq!(FeedKey::parse(&key.to_base64()).unwrap(), key);
        assert_eq!(key.to_hex().parse::<FeedKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            FeedKey::parse(&short),
            Err(CoreError::InvalidKey(_))
        ));
        assert!(FeedKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(FeedKey::parse("not a key!").is_err());
        assert!(FeedKey::parse("").is_err());
    }

    #[test]
    fn test_serde_uses_hex() {
        let key = sample_key();
        let json = serde_json::to_string(&ReplyRef::new(key, 7)).unwrap();
        assert!(json.contains(&key.to_hex()));

        let back: ReplyRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.feed_key, key);
        assert_eq!(back.index, 7);
    }

    #[test]
    fn test_debug_is_short() {
        let key = sample_key();
        assert_eq!(format!("{:?}", key), "FeedKey(00010203..)");
    }
}
