use joinstr_core::protocol::{EventKind, SignedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

/// Subscription filter, serialized as a relay filter object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u64>>,
    #[serde(default, rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind.as_u64());
        self
    }

    pub fn pubkeys<I, S>(mut self, public_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.p_tags
            .get_or_insert_with(Vec::new)
            .extend(public_keys.into_iter().map(Into::into));
        self
    }

    pub fn author(mut self, public_key: &str) -> Self {
        self.authors
            .get_or_insert_with(Vec::new)
            .push(public_key.to_owned());
        self
    }

    /// Encrypted direct messages addressed to the given public keys
    pub fn direct_messages_to<I, S>(public_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new()
            .kind(EventKind::EncryptedDirectMessage)
            .pubkeys(public_keys)
    }

    pub fn matches(&self, event: &SignedEvent) -> bool {
        let kind_matches = self
            .kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind));
        let author_matches = self
            .authors
            .as_ref()
            .is_none_or(|authors| authors.iter().any(|a| a == &event.pubkey));
        let tag_matches = self.p_tags.as_ref().is_none_or(|p_tags| {
            event
                .tagged_public_keys()
                .any(|tagged| p_tags.iter().any(|p| p == tagged))
        });
        let since_matches = self.since.is_none_or(|since| event.created_at >= since);
        kind_matches && author_matches && tag_matches && since_matches
    }
}

/// Frames sent from a client to a relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Req { subscription_id: String, filter: Filter },
    Event(SignedEvent),
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Req {
                subscription_id,
                filter,
            } => json!(["REQ", subscription_id, to_value(filter)?]),
            ClientMessage::Event(event) => json!(["EVENT", to_value(event)?]),
            ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(value.to_string())
    }

    pub fn from_json(frame: &str) -> Result<Self> {
        let parts = frame_parts(frame)?;
        match (label(&parts)?, parts.len()) {
            ("REQ", 3) => Ok(ClientMessage::Req {
                subscription_id: string_at(&parts, 1)?,
                filter: from_value(parts[2].clone())?,
            }),
            ("EVENT", 2) => Ok(ClientMessage::Event(from_value(parts[1].clone())?)),
            ("CLOSE", 2) => Ok(ClientMessage::Close(string_at(&parts, 1)?)),
            (other, len) => Err(Error::Message(format!(
                "unsupported client frame {other} with {len} elements"
            ))),
        }
    }
}

/// Frames sent from a relay to a client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: SignedEvent,
    },
    EndOfStoredEvents(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, to_value(event)?]),
            RelayMessage::EndOfStoredEvents(subscription_id) => json!(["EOSE", subscription_id]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Notice(message) => json!(["NOTICE", message]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
        };
        Ok(value.to_string())
    }

    pub fn from_json(frame: &str) -> Result<Self> {
        let parts = frame_parts(frame)?;
        match label(&parts)? {
            "EVENT" if parts.len() >= 3 => Ok(RelayMessage::Event {
                subscription_id: string_at(&parts, 1)?,
                event: from_value(parts[2].clone())?,
            }),
            "EOSE" if parts.len() >= 2 => {
                Ok(RelayMessage::EndOfStoredEvents(string_at(&parts, 1)?))
            }
            "OK" if parts.len() >= 3 => Ok(RelayMessage::Ok {
                event_id: string_at(&parts, 1)?,
                accepted: parts[2]
                    .as_bool()
                    .ok_or_else(|| Error::Message("OK flag is not a boolean".to_string()))?,
                message: parts
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            "NOTICE" if parts.len() >= 2 => Ok(RelayMessage::Notice(string_at(&parts, 1)?)),
            "CLOSED" if parts.len() >= 2 => Ok(RelayMessage::Closed {
                subscription_id: string_at(&parts, 1)?,
                message: parts
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            other => Err(Error::Message(format!(
                "unsupported relay frame {other} with {} elements",
                parts.len()
            ))),
        }
    }
}

fn frame_parts(frame: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| Error::Message(format!("frame is not JSON: {e}")))?;
    match value {
        Value::Array(parts) if !parts.is_empty() => Ok(parts),
        _ => Err(Error::Message("frame is not a non-empty array".to_string())),
    }
}

fn label(parts: &[Value]) -> Result<&str> {
    parts[0]
        .as_str()
        .ok_or_else(|| Error::Message("frame label is not a string".to_string()))
}

fn string_at(parts: &[Value], index: usize) -> Result<String> {
    parts
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::Message(format!("frame element {index} is not a string")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Message(format!("could not serialize: {e}")))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Message(format!("could not deserialize: {e}")))
}
