//! Trust Mesh
//!
//! The distributed trust store for Hypercorn: the sink where trust links end
//! up once a node has observed them on a feed, indexed by issuer and subject.
//!
//! The store is append-only from the node's point of view. Links are verified
//! on the way in; expiry is enforced when the store is queried.

pub mod ledger;
pub mod store;

pub use ledger::{LedgerState, TrustLedger, TrustRecord};
pub use store::{Result, TrustStore, TrustStoreError};
