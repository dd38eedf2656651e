//! Message schema for feed entries.
//!
//! Every entry is a JSON object `{"type": <kind>, "payload": {...}}`. Entries
//! are validated once, here, and turned into a closed [`Message`] enum; the
//! rest of the node never looks at raw JSON.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hypercorn_core::{FeedKey, ReplyRef};
use hypercorn_crypto::TrustLink;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Protocol name announced by `open` messages
pub const PROTOCOL: &str = "hypercorn";
/// Protocol version announced by `open` messages
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Malformed entry: {0}")]
    Envelope(String),

    #[error("Invalid {kind} payload: {reason}")]
    Payload { kind: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrustMessage {
    pub expires_at: u64,
    pub feed_key: FeedKey,
    pub link: TrustLink,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessage {
    pub content: String,
    pub reply_to: Option<ReplyRef>,
}

/// A validated feed entry
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Open { protocol: String, version: u32 },
    Follow { feed_key: FeedKey },
    Unfollow { feed_key: FeedKey },
    Trust(TrustMessage),
    Post(PostMessage),
    /// Any entry whose type this node does not know. Ignored by every handler.
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenPayload {
    protocol: String,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct FollowPayload {
    feed_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrustPayload {
    expires_at: u64,
    feed_key: String,
    link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplyToPayload {
    feed_key: String,
    index: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PostPayload {
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<ReplyToPayload>,
}

fn payload<T: for<'de> Deserialize<'de>>(
    kind: &'static str,
    value: Value,
) -> Result<T, SchemaError> {
    serde_json::from_value(value).map_err(|e| SchemaError::Payload {
        kind,
        reason: e.to_string(),
    })
}

fn feed_key(kind: &'static str, encoded: &str) -> Result<FeedKey, SchemaError> {
    FeedKey::from_base64(encoded).map_err(|e| SchemaError::Payload {
        kind,
        reason: e.to_string(),
    })
}

impl Message {
    /// Self-introduction written as the first entry of a fresh feed
    pub fn open() -> Self {
        Message::Open {
            protocol: PROTOCOL.to_string(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Message::Open { .. } => "open",
            Message::Follow { .. } => "follow",
            Message::Unfollow { .. } => "unfollow",
            Message::Trust(_) => "trust",
            Message::Post(_) => "post",
            Message::Unknown { kind } => kind,
        }
    }

    /// Encode as a feed entry
    pub fn to_entry(&self) -> Value {
        let payload = match self {
            Message::Open { protocol, version } => json!({
                "protocol": protocol,
                "version": version,
            }),
            Message::Follow { feed_key } | Message::Unfollow { feed_key } => json!({
                "feed_key": feed_key.to_base64(),
            }),
            Message::Trust(trust) => {
                let mut payload = json!({
                    "expires_at": trust.expires_at,
                    "feed_key": trust.feed_key.to_base64(),
                    "link": STANDARD.encode(trust.link.to_bytes()),
                });
                if let Some(description) = &trust.description {
                    payload["description"] = json!(description);
                }
                payload
            }
            Message::Post(post) => {
                let mut payload = json!({ "content": post.content });
                if let Some(reply) = &post.reply_to {
                    payload["reply_to"] = json!({
                        "feed_key": reply.feed_key.to_base64(),
                        "index": reply.index,
                    });
                }
                payload
            }
            Message::Unknown { .. } => json!({}),
        };

        json!({ "type": self.kind(), "payload": payload })
    }

    /// Validate a feed entry
    pub fn from_entry(entry: &Value) -> Result<Self, SchemaError> {
        let envelope: Envelope = serde_json::from_value(entry.clone())
            .map_err(|e| SchemaError::Envelope(e.to_string()))?;

        match envelope.kind.as_str() {
            "open" => {
                let open: OpenPayload = payload("open", envelope.payload)?;
                Ok(Message::Open {
                    protocol: open.protocol,
                    version: open.version,
                })
            }
            "follow" => {
                let follow: FollowPayload = payload("follow", envelope.payload)?;
                Ok(Message::Follow {
                    feed_key: feed_key("follow", &follow.feed_key)?,
                })
            }
            "unfollow" => {
                let unfollow: FollowPayload = payload("unfollow", envelope.payload)?;
                Ok(Message::Unfollow {
                    feed_key: feed_key("unfollow", &unfollow.feed_key)?,
                })
            }
            "trust" => decode_trust(payload("trust", envelope.payload)?),
            "post" => {
                let post: PostPayload = payload("post", envelope.payload)?;
                let reply_to = post
                    .reply_to
                    .map(|reply| {
                        Ok::<_, SchemaError>(ReplyRef::new(
                            feed_key("post", &reply.feed_key)?,
                            reply.index,
                        ))
                    })
                    .transpose()?;
                Ok(Message::Post(PostMessage {
                    content: post.content,
                    reply_to,
                }))
            }
            _ => Ok(Message::Unknown {
                kind: envelope.kind,
            }),
        }
    }
}

fn decode_trust(trust: TrustPayload) -> Result<Message, SchemaError> {
    let invalid = |reason: String| SchemaError::Payload {
        kind: "trust",
        reason,
    };

    let subject = feed_key("trust", &trust.feed_key)?;
    let bytes = STANDARD
        .decode(&trust.link)
        .map_err(|e| invalid(format!("link is not base64: {e}")))?;
    let link = TrustLink::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))?;

    if link.subject() != subject {
        return Err(invalid("link subject does not match feed_key".to_string()));
    }
    if link.expires_at() != trust.expires_at {
        return Err(invalid(
            "link expiry does not match expires_at".to_string(),
        ));
    }

    Ok(Message::Trust(TrustMessage {
        expires_at: trust.expires_at,
        feed_key: subject,
        link,
        description: trust.description,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypercorn_crypto::KeyPair;

    #[test]
    fn test_open_entry_shape() {
        let entry = Message::open().to_entry();
        assert_eq!(
            entry,
            json!({"type": "open", "payload": {"protocol": "hypercorn", "version": 1}})
        );
    }

    #[test]
    fn test_follow_decodes_base64_key() {
        let key = KeyPair::generate().public_key();
        let entry = json!({"type": "follow", "payload": {"feed_key": key.to_base64()}});
        assert_eq!(
            Message::from_entry(&entry).unwrap(),
            Message::Follow { feed_key: key }
        );
    }

    #[test]
    fn test_follow_without_feed_key_is_rejected() {
        let entry = json!({"type": "follow", "payload": {}});
        let err = Message::from_entry(&entry).unwrap_err();
        assert!(matches!(err, SchemaError::Payload { kind: "follow", .. }));
    }

    #[test]
    fn test_missing_type_is_envelope_error() {
        let err = Message::from_entry(&json!({"payload": {}})).unwrap_err();
        assert!(matches!(err, SchemaError::Envelope(_)));
        assert!(Message::from_entry(&json!("post")).is_err());
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let entry = json!({"type": "reaction", "payload": {"emoji": "+1"}});
        assert_eq!(
            Message::from_entry(&entry).unwrap(),
            Message::Unknown {
                kind: "reaction".to_string()
            }
        );
    }

    #[test]
    fn test_trust_entry_decodes_link() {
        let issuer = KeyPair::generate();
        let subject = KeyPair::generate().public_key();
        let link = issuer.issue_link(subject, 1_800_000_000);
        let message = Message::Trust(TrustMessage {
            expires_at: 1_800_000_000,
            feed_key: subject,
            link: link.clone(),
            description: Some("met at the meetup".to_string()),
        });

        let entry = message.to_entry();
        assert_eq!(entry["payload"]["description"], "met at the meetup");
        assert_eq!(Message::from_entry(&entry).unwrap(), message);
    }

    #[test]
    fn test_trust_subject_mismatch_is_rejected() {
        let issuer = KeyPair::generate();
        let subject = KeyPair::generate().public_key();
        let other = KeyPair::generate().public_key();
        let link = issuer.issue_link(subject, 500);

        let entry = json!({
            "type": "trust",
            "payload": {
                "expires_at": 500,
                "feed_key": other.to_base64(),
                "link": STANDARD.encode(link.to_bytes()),
            }
        });
        assert!(matches!(
            Message::from_entry(&entry),
            Err(SchemaError::Payload { kind: "trust", .. })
        ));
    }

    #[test]
    fn test_post_reply_reference() {
        let target = KeyPair::generate().public_key();
        let entry = json!({
            "type": "post",
            "payload": {
                "content": "agreed",
                "reply_to": {"feed_key": target.to_base64(), "index": 5}
            }
        });

        match Message::from_entry(&entry).unwrap() {
            Message::Post(post) => {
                assert_eq!(post.content, "agreed");
                assert_eq!(post.reply_to, Some(ReplyRef::new(target, 5)));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_post_without_reply_omits_field() {
        let entry = Message::Post(PostMessage {
            content: "hello".to_string(),
            reply_to: None,
        })
        .to_entry();
        assert!(entry["payload"].get("reply_to").is_none());
    }
}
