use std::fmt;

use bitcoin::secp256k1::{Message, SECP256K1, XOnlyPublicKey, schnorr::Signature};
use log::debug;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use super::ProtocolValidationError;
use super::crypto::{Error, JoinstrKeys, Result, parse_public_key};
use super::timestamp::Timestamp;

/// The closed set of event kinds the pool protocol produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum EventKind {
    Note,
    EncryptedDirectMessage,
    JoinStr,
    TestJoinStr,
}

impl EventKind {
    pub fn as_u64(&self) -> u64 {
        match self {
            EventKind::Note => 1,
            EventKind::EncryptedDirectMessage => 4,
            EventKind::JoinStr => 2022,
            EventKind::TestJoinStr => 2022566,
        }
    }
}

impl TryFrom<u64> for EventKind {
    type Error = ProtocolValidationError;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(EventKind::Note),
            4 => Ok(EventKind::EncryptedDirectMessage),
            2022 => Ok(EventKind::JoinStr),
            2022566 => Ok(EventKind::TestJoinStr),
            other => Err(ProtocolValidationError::UnknownEventKind(other)),
        }
    }
}

impl From<EventKind> for u64 {
    fn from(value: EventKind) -> Self {
        value.as_u64()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_u64().fmt(f)
    }
}

/// A signed relay event in its wire shape. The kind is kept as a raw number
/// so events of foreign kinds can still be parsed and rejected later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl SignedEvent {
    /// Returns the known kind of this event, if any
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::try_from(self.kind).ok()
    }

    /// All public keys referenced by `p` tags
    pub fn tagged_public_keys(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|tag| tag.len() >= 2 && tag[0] == "p")
            .map(|tag| tag[1].as_str())
    }

    /// The author's public key
    pub fn author(&self) -> Result<XOnlyPublicKey> {
        parse_public_key(&self.pubkey)
    }

    pub fn created_at(&self) -> Timestamp {
        Timestamp::from(self.created_at)
    }

    /// Recomputes the id and checks the signature, never panics
    pub fn verify(&self) -> bool {
        match check_event(self) {
            Ok(()) => true,
            Err(e) => {
                debug!("Event {} failed verification: {e}", self.id);
                false
            }
        }
    }
}

/// Computes the canonical id: the hex encoded sha256 of the compact JSON
/// serialization of `[0, pubkey, created_at, kind, tags, content]`
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u64,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let canonical = json!([0, pubkey, created_at, kind, tags, content]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// Builds and signs an event. `created_at` is always the current time. A
/// `tag_pub_key` only results in a `p` tag on encrypted direct messages.
pub fn create_event(
    content: &str,
    kind: EventKind,
    keys: &JoinstrKeys,
    tag_pub_key: Option<&str>,
) -> Result<SignedEvent> {
    build_event(content, kind, keys, tag_pub_key, Timestamp::now())
}

fn build_event(
    content: &str,
    kind: EventKind,
    keys: &JoinstrKeys,
    tag_pub_key: Option<&str>,
    created_at: Timestamp,
) -> Result<SignedEvent> {
    let tags = match (kind, tag_pub_key) {
        (EventKind::EncryptedDirectMessage, Some(tag)) => {
            parse_public_key(tag)?;
            vec![vec!["p".to_string(), tag.to_string()]]
        }
        _ => vec![],
    };
    let pubkey = keys.get_public_key();
    let id = compute_event_id(&pubkey, created_at.inner(), kind.as_u64(), &tags, content);
    let sig = sign_id(&id, keys)?;
    Ok(SignedEvent {
        id,
        pubkey,
        created_at: created_at.inner(),
        kind: kind.as_u64(),
        tags,
        content: content.to_string(),
        sig,
    })
}

fn id_message(id: &str) -> Result<Message> {
    let digest: [u8; 32] = hex::decode(id)
        .map_err(|e| Error::Format(format!("event id is not hex: {e}")))?
        .try_into()
        .map_err(|_| Error::Format("event id must be 32 bytes".to_string()))?;
    Ok(Message::from_digest(digest))
}

fn sign_id(id: &str, keys: &JoinstrKeys) -> Result<String> {
    let msg = id_message(id)?;
    let mut aux_rand = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut aux_rand);
    let signature = SECP256K1.sign_schnorr_with_aux_rand(&msg, &keys.get_key_pair(), &aux_rand);
    Ok(hex::encode(signature.serialize()))
}

fn check_event(event: &SignedEvent) -> Result<()> {
    let id = compute_event_id(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    );
    if id != event.id {
        return Err(Error::Signature(format!("id mismatch, computed {id}")));
    }
    let msg = id_message(&event.id)?;
    let pub_key = event.author()?;
    let signature =
        Signature::from_str(&event.sig).map_err(|e| Error::Signature(e.to_string()))?;
    SECP256K1
        .verify_schnorr(&signature, &msg, &pub_key)
        .map_err(|e| Error::Signature(e.to_string()))
}

/// Verifies id and signature of an event, returning false on any mismatch
pub fn verify_event(event: &SignedEvent) -> bool {
    event.verify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::tests::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
    use rstest::rstest;

    fn test_keys() -> JoinstrKeys {
        JoinstrKeys::from_private_key_string(TEST_PRIVATE_KEY).unwrap()
    }

    fn flip_bit(value: &str, index: usize) -> String {
        let mut bytes = value.as_bytes().to_vec();
        bytes[index] ^= 0x01;
        String::from_utf8(bytes).unwrap()
    }

    fn flip_sig_bit(sig: &str) -> String {
        let mut bytes = hex::decode(sig).unwrap();
        bytes[10] ^= 0x01;
        hex::encode(bytes)
    }

    fn direct_message() -> SignedEvent {
        create_event(
            "encrypted?iv=payload",
            EventKind::EncryptedDirectMessage,
            &test_keys(),
            Some(TEST_PUBLIC_KEY),
        )
        .unwrap()
    }

    #[test]
    fn test_create_event_verifies() {
        let event = create_event("hello", EventKind::Note, &test_keys(), None).unwrap();
        assert!(verify_event(&event));
        assert_eq!(event.pubkey, TEST_PUBLIC_KEY);
        assert_eq!(event.kind, 1);
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.sig.len(), 128);
        assert!(event.tags.is_empty());
    }

    #[test]
    fn test_direct_message_is_tagged() {
        let event = direct_message();
        assert_eq!(event.tags, vec![vec!["p".to_string(), TEST_PUBLIC_KEY.to_string()]]);
        assert_eq!(event.tagged_public_keys().collect::<Vec<_>>(), vec![TEST_PUBLIC_KEY]);
        assert!(event.verify());
    }

    #[test]
    fn test_tag_is_ignored_for_other_kinds() {
        let event =
            create_event("{}", EventKind::JoinStr, &test_keys(), Some(TEST_PUBLIC_KEY)).unwrap();
        assert!(event.tags.is_empty());
    }

    #[test]
    fn test_invalid_tag_key_is_rejected() {
        let result = create_event(
            "x",
            EventKind::EncryptedDirectMessage,
            &test_keys(),
            Some("not a key"),
        );
        assert!(matches!(result, Err(Error::PublicKey(_))));
    }

    #[test]
    fn test_id_is_deterministic_for_same_time() {
        let ts = Timestamp::from(1_700_000_000);
        let first = build_event("same", EventKind::JoinStr, &test_keys(), None, ts).unwrap();
        let second = build_event("same", EventKind::JoinStr, &test_keys(), None, ts).unwrap();
        assert_eq!(first.id, second.id);
        // fresh aux randomness per signature
        assert_ne!(first.sig, second.sig);
        assert!(first.verify() && second.verify());
    }

    #[test]
    fn test_id_differs_a_second_apart() {
        let first =
            build_event("same", EventKind::JoinStr, &test_keys(), None, Timestamp::from(10))
                .unwrap();
        let second =
            build_event("same", EventKind::JoinStr, &test_keys(), None, Timestamp::from(11))
                .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_canonical_serialization_is_compact() {
        let id = compute_event_id("ab", 1, 4, &[vec!["p".into(), "cd".into()]], "a\"b\nc");
        let expected = hex::encode(Sha256::digest(
            r#"[0,"ab",1,4,[["p","cd"]],"a\"b\nc"]"#.as_bytes(),
        ));
        assert_eq!(id, expected);
    }

    #[rstest]
    #[case::content_first(0)]
    #[case::content_middle(7)]
    #[case::content_last(19)]
    fn test_flipped_content_bit_fails(#[case] index: usize) {
        let mut event = direct_message();
        event.content = flip_bit(&event.content, index);
        assert!(!verify_event(&event));
    }

    #[rstest]
    #[case::tag_name(0)]
    #[case::tag_value(1)]
    fn test_flipped_tag_bit_fails(#[case] position: usize) {
        let mut event = direct_message();
        event.tags[0][position] = flip_bit(&event.tags[0][position], 0);
        assert!(!verify_event(&event));
    }

    #[rstest]
    #[case::low_bit(1)]
    #[case::high_bit(1 << 20)]
    fn test_flipped_created_at_bit_fails(#[case] mask: u64) {
        let mut event = direct_message();
        event.created_at ^= mask;
        assert!(!verify_event(&event));
    }

    #[test]
    fn test_flipped_sig_bit_fails() {
        let mut event = direct_message();
        event.sig = flip_sig_bit(&event.sig);
        assert!(!verify_event(&event));
    }

    #[test]
    fn test_mismatched_id_or_pubkey_fails() {
        let mut event = direct_message();
        event.pubkey = JoinstrKeys::new().get_public_key();
        assert!(!event.verify());

        let mut event = direct_message();
        event.id = "00".repeat(32);
        assert!(!event.verify());

        let mut event = direct_message();
        event.sig = "zz".to_string();
        assert!(!event.verify());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EventKind::Note,
            EventKind::EncryptedDirectMessage,
            EventKind::JoinStr,
            EventKind::TestJoinStr,
        ] {
            assert_eq!(EventKind::try_from(kind.as_u64()).unwrap(), kind);
        }
        assert!(EventKind::try_from(7).is_err());
        assert_eq!(serde_json::to_string(&EventKind::TestJoinStr).unwrap(), "2022566");
    }

    #[test]
    fn test_wire_shape_is_accepted_by_nostr() {
        use nostr::JsonUtil;

        let event = direct_message();
        let json = serde_json::to_string(&event).unwrap();
        let parsed = nostr::Event::from_json(&json).unwrap();
        assert!(parsed.verify().is_ok());
        assert_eq!(parsed.id.to_hex(), event.id);

        let parsed_back: SignedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed_back, event);
    }
}
