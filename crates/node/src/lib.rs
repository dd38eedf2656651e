//! Hypercorn node
//!
//! Ties a local identity, its append-only feed, the feeds it follows and the
//! trust store together:
//! - [`FeedRegistry`] owns every long-lived feed handle and its watch task
//! - [`Coordinator`] consumes the watches and applies the social graph
//! - [`Node`] is the public surface: listen, follow, trust, post, read

pub mod coordinator;
pub mod error;
pub mod message;
pub mod node;
pub mod registry;

pub use coordinator::{Coordinator, Progress};
pub use error::{NodeError, Result};
pub use message::{Message, PostMessage, SchemaError, TrustMessage, PROTOCOL, PROTOCOL_VERSION};
pub use node::{Node, PendingTrust, PostOutcome, PostRequest, ReplyTarget, TimelineEntry, TrustOptions};
pub use registry::{FeedEvent, FeedRegistry};
