//! Trust Link Module - Signed, Expiring Vouches
//!
//! A trust link is the unit of the web of trust: the issuer asserts that it
//! vouches for the subject until `expires_at`. Links are never mutated after
//! issuance; consumers enforce expiry.
//!
//! # Wire Format
//!
//! ```text
//! issuer (32) | subject (32) | expires_at (u64 BE, 8) | signature (64)
//! ```
//!
//! The Ed25519 signature covers the BLAKE3 digest of [`LINK_DOMAIN`] followed
//! by the first 72 bytes.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hypercorn_core::FeedKey;
use std::fmt;
use thiserror::Error;

/// Domain separation tag mixed into every link digest
pub const LINK_DOMAIN: &[u8] = b"hypercorn/trust-link/v1";

/// Encoded length of a trust link in bytes
pub const LINK_LEN: usize = FeedKey::LEN * 2 + 8 + Signature::BYTE_SIZE;

/// Errors produced while decoding or verifying links
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Malformed trust link: {0}")]
    Malformed(String),

    #[error("Invalid issuer key: {0}")]
    InvalidKey(String),

    #[error("Trust link signature does not verify")]
    InvalidSignature,
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// What the issuer is asked to sign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRequest {
    /// Key being vouched for
    pub subject: FeedKey,
    /// Unix seconds after which the link no longer holds
    pub expiration: u64,
}

/// A signed assertion that `issuer` vouches for `subject` until `expires_at`.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustLink {
    issuer: FeedKey,
    subject: FeedKey,
    expires_at: u64,
    signature: [u8; Signature::BYTE_SIZE],
}

/// Sign a link for `request` with the issuer's key.
///
/// Deterministic for a given key and request.
pub fn issue_link(request: &LinkRequest, signing_key: &SigningKey) -> TrustLink {
    let issuer = FeedKey::from_bytes(signing_key.verifying_key().to_bytes());
    let digest = link_digest(&issuer, &request.subject, request.expiration);
    let signature = signing_key.sign(digest.as_bytes());

    TrustLink {
        issuer,
        subject: request.subject,
        expires_at: request.expiration,
        signature: signature.to_bytes(),
    }
}

fn link_digest(issuer: &FeedKey, subject: &FeedKey, expires_at: u64) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LINK_DOMAIN);
    hasher.update(issuer.as_bytes());
    hasher.update(subject.as_bytes());
    hasher.update(&expires_at.to_be_bytes());
    hasher.finalize()
}

impl TrustLink {
    pub fn issuer(&self) -> FeedKey {
        self.issuer
    }

    pub fn subject(&self) -> FeedKey {
        self.subject
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// True once `now` (unix seconds) has reached the expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LINK_LEN);
        out.extend_from_slice(self.issuer.as_bytes());
        out.extend_from_slice(self.subject.as_bytes());
        out.extend_from_slice(&self.expires_at.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Decode a link without checking its signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != LINK_LEN {
            return Err(ChainError::Malformed(format!(
                "expected {} bytes, got {}",
                LINK_LEN,
                bytes.len()
            )));
        }

        let (issuer, rest) = bytes.split_at(FeedKey::LEN);
        let (subject, rest) = rest.split_at(FeedKey::LEN);
        let (expires_at, signature) = rest.split_at(8);

        let issuer = FeedKey::from_slice(issuer).map_err(|e| ChainError::Malformed(e.to_string()))?;
        let subject =
            FeedKey::from_slice(subject).map_err(|e| ChainError::Malformed(e.to_string()))?;
        let expires_at = u64::from_be_bytes(
            expires_at
                .try_into()
                .map_err(|_| ChainError::Malformed("truncated expiry".to_string()))?,
        );
        let signature = signature
            .try_into()
            .map_err(|_| ChainError::Malformed("truncated signature".to_string()))?;

        Ok(Self {
            issuer,
            subject,
            expires_at,
            signature,
        })
    }

    /// Check the signature against the embedded issuer key.
    pub fn verify(&self) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(self.issuer.as_bytes())
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let digest = link_digest(&self.issuer, &self.subject, self.expires_at);
        let signature = Signature::from_bytes(&self.signature);

        verifying_key
            .verify(digest.as_bytes(), &signature)
            .map_err(|_| ChainError::InvalidSignature)
    }
}

impl fmt::Debug for TrustLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustLink")
            .field("issuer", &self.issuer)
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn test_issued_link_verifies() {
        let issuer = KeyPair::generate();
        let subject = KeyPair::generate().public_key();

        let link = issuer.issue_link(subject, 1_900_000_000);
        assert_eq!(link.issuer(), issuer.public_key());
        assert_eq!(link.subject(), subject);
        assert_eq!(link.expires_at(), 1_900_000_000);
        assert!(link.verify().is_ok());
    }

    #[test]
    fn test_decode_preserves_fields() {
        let issuer = KeyPair::generate();
        let link = issuer.issue_link(KeyPair::generate().public_key(), 42);

        let bytes = link.to_bytes();
        assert_eq!(bytes.len(), LINK_LEN);

        let decoded = TrustLink::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, link);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_tampered_expiry_fails_verification() {
        let issuer = KeyPair::generate();
        let link = issuer.issue_link(KeyPair::generate().public_key(), 1000);

        let mut bytes = link.to_bytes();
        bytes[FeedKey::LEN * 2 + 7] ^= 0x01;

        let tampered = TrustLink::from_bytes(&bytes).unwrap();
        assert_eq!(tampered.verify(), Err(ChainError::InvalidSignature));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(
            TrustLink::from_bytes(&[0u8; 10]),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn test_issuance_is_deterministic() {
        let issuer = KeyPair::generate();
        let subject = KeyPair::generate().public_key();
        assert_eq!(
            issuer.issue_link(subject, 500).to_bytes(),
            issuer.issue_link(subject, 500).to_bytes()
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let issuer = KeyPair::generate();
        let link = issuer.issue_link(KeyPair::generate().public_key(), 100);
        assert!(!link.is_expired(99));
        assert!(link.is_expired(100));
    }
}
