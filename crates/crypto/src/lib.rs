//! Cryptographic primitives for Hypercorn nodes.
//!
//! Two leaf components live here:
//!
//! - **Key pair provider** ([`keys`]): loads the node's Ed25519 identity from
//!   disk, creating and persisting it on first run.
//! - **Trust chain issuer** ([`chain`]): produces signed, expiring trust links
//!   ("issuer vouches for subject until `expires_at`") and verifies them.
//!
//! # Security Principles
//!
//! - Secrets are never logged
//! - Secret material read from disk is zeroized after use
//! - Links are verified before they are trusted; expiry is checked by the
//!   consumer, never by revocation

pub mod chain;
pub mod keys;

pub use chain::{issue_link, ChainError, LinkRequest, TrustLink, LINK_DOMAIN, LINK_LEN};
pub use keys::{KeyError, KeyPair};
