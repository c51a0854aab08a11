use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Result;
use crate::pool::PoolAnnouncement;

const TYPE_FIELD: &str = "type";
const KNOWN_TYPES: [&str; 4] = ["new_pool", "join_pool", "output", "input"];

/// A registration published on the pool's channel. Doubles as the stored
/// element of a pool's `peersData`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Registration {
    Output { address: String },
    /// A signed PSBT contributing an input
    Input { hex: String },
}

impl Registration {
    pub fn address(&self) -> Option<&str> {
        match self {
            Registration::Output { address } => Some(address),
            Registration::Input { .. } => None,
        }
    }

    pub fn hex(&self) -> Option<&str> {
        match self {
            Registration::Input { hex } => Some(hex),
            Registration::Output { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum TaggedMessage {
    #[serde(rename = "new_pool")]
    Announcement(PoolAnnouncement),
    #[serde(rename = "join_pool")]
    JoinRequest,
    #[serde(rename = "output")]
    Output { address: String },
    #[serde(rename = "input")]
    Input { hex: String },
}

/// Content payload of a pool event, keyed by its `type` discriminator
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    Announcement(PoolAnnouncement),
    JoinRequest,
    OutputRegistration { address: String },
    InputRegistration { hex: String },
    /// Any JSON object with a missing or unrecognized `type`
    Unknown(Value),
}

impl PoolMessage {
    /// Decodes event content. Content that is not JSON, or a known type with
    /// missing fields, is an error. An unrecognized type is not.
    pub fn decode(content: &str) -> Result<PoolMessage> {
        let value: Value = serde_json::from_str(content)?;
        let known = value
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .is_some_and(|t| KNOWN_TYPES.contains(&t));
        if !known {
            return Ok(PoolMessage::Unknown(value));
        }
        let message = match serde_json::from_value(value)? {
            TaggedMessage::Announcement(announcement) => PoolMessage::Announcement(announcement),
            TaggedMessage::JoinRequest => PoolMessage::JoinRequest,
            TaggedMessage::Output { address } => PoolMessage::OutputRegistration { address },
            TaggedMessage::Input { hex } => PoolMessage::InputRegistration { hex },
        };
        Ok(message)
    }

    pub fn encode(&self) -> Result<String> {
        let tagged = match self {
            PoolMessage::Announcement(announcement) => {
                TaggedMessage::Announcement(announcement.clone())
            }
            PoolMessage::JoinRequest => TaggedMessage::JoinRequest,
            PoolMessage::OutputRegistration { address } => TaggedMessage::Output {
                address: address.clone(),
            },
            PoolMessage::InputRegistration { hex } => TaggedMessage::Input { hex: hex.clone() },
            PoolMessage::Unknown(raw) => return Ok(raw.to_string()),
        };
        Ok(serde_json::to_string(&tagged)?)
    }

    /// The registration carried by this message, if any
    pub fn registration(&self) -> Option<Registration> {
        match self {
            PoolMessage::OutputRegistration { address } => Some(Registration::Output {
                address: address.clone(),
            }),
            PoolMessage::InputRegistration { hex } => Some(Registration::Input { hex: hex.clone() }),
            _ => None,
        }
    }
}

impl From<Registration> for PoolMessage {
    fn from(value: Registration) -> Self {
        match value {
            Registration::Output { address } => PoolMessage::OutputRegistration { address },
            Registration::Input { hex } => PoolMessage::InputRegistration { hex },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;
    use crate::tests::tests::test_announcement;
    use rstest::rstest;

    #[test]
    fn test_decode_announcement() {
        let content = r#"{"type":"new_pool","id":"abcdefghij1700000000","publicKey":"9d7dfdc4e5fff62bfd4f94a5c8f586021caa0fc503ca88d4457233b1a17ec11e","denomination":0.01,"peers":3,"timeout":1700000600,"relay":"wss://nostr.fmt.wiz.biz","feeRate":4}"#;
        match PoolMessage::decode(content).unwrap() {
            PoolMessage::Announcement(a) => {
                assert_eq!(a.id, "abcdefghij1700000000");
                assert_eq!(a.peers, 3);
                assert_eq!(a.fee_rate, 4);
                assert_eq!(a.timeout.inner(), 1_700_000_600);
                assert!(a.transport.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_encode_announcement_has_discriminator() {
        let encoded = PoolMessage::Announcement(test_announcement()).encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "new_pool");
        assert_eq!(value["publicKey"], test_announcement().public_key);
        assert_eq!(value["feeRate"], 2);
        assert!(value.get("vpnGateway").is_none());
    }

    #[test]
    fn test_join_request_shape() {
        assert_eq!(PoolMessage::JoinRequest.encode().unwrap(), r#"{"type":"join_pool"}"#);
        assert_eq!(
            PoolMessage::decode(r#"{"type":"join_pool"}"#).unwrap(),
            PoolMessage::JoinRequest
        );
    }

    #[test]
    fn test_registrations() {
        let output = PoolMessage::decode(r#"{"address":"tb1qabc","type":"output"}"#).unwrap();
        assert_eq!(
            output.registration(),
            Some(Registration::Output { address: "tb1qabc".into() })
        );
        let input = PoolMessage::decode(r#"{"type":"input","hex":"cHNidP8"}"#).unwrap();
        assert_eq!(input.registration().unwrap().hex(), Some("cHNidP8"));
        assert_eq!(
            PoolMessage::from(Registration::Output { address: "a".into() }).encode().unwrap(),
            r#"{"type":"output","address":"a"}"#
        );
    }

    #[rstest]
    #[case::unknown_type(r#"{"type":"chat","text":"hi"}"#)]
    #[case::missing_type(r#"{"id":"x"}"#)]
    #[case::numeric_type(r#"{"type":5}"#)]
    fn test_unknown_messages_are_not_errors(#[case] content: &str) {
        let message = PoolMessage::decode(content).unwrap();
        assert!(matches!(message, PoolMessage::Unknown(_)));
        assert!(message.registration().is_none());
        let raw: Value = serde_json::from_str(content).unwrap();
        assert_eq!(message.encode().unwrap(), raw.to_string());
    }

    #[rstest]
    #[case::not_json("hello")]
    #[case::output_without_address(r#"{"type":"output"}"#)]
    #[case::announcement_without_fields(r#"{"type":"new_pool","id":"x"}"#)]
    fn test_malformed_messages_are_errors(#[case] content: &str) {
        assert!(matches!(
            PoolMessage::decode(content),
            Err(ProtocolError::Deserialization(_))
        ));
    }
}
