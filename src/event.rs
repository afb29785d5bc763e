use crate::crypto::{Digester, Schnorr, SignatureVerifier};
use crate::event_template::{canonical_bytes, malformed, UnsignedEvent};
use crate::helpers::is_lower_hex;
use crate::signature::{SignatureGate, Verification};
use crate::tag_index::TagIndex;
use crate::{Kind, PubKey, Signature, Tags, Timestamp, ID};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("malformed event: {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("secret key does not belong to {0}")]
    KeyMismatch(PubKey),
}

pub type Result<T> = std::result::Result<T, EventError>;

/// represents a signed nostr event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Event {
    pub id: ID,
    pub pubkey: PubKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Tags,
    pub content: String,
    pub sig: Signature,

    /// NIP-03 attestation, not part of the id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ots: Option<String>,
}

impl Event {
    /// parse untrusted JSON text, checking the shape of every field
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|err| malformed("event", err))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let unsigned = UnsignedEvent::from_value(value)?;

        let id = match value.get("id") {
            Some(Value::String(s)) if s.len() == 64 && is_lower_hex(s) => {
                ID::from_hex(s).map_err(|err| malformed("id", err))?
            }
            Some(_) => return Err(malformed("id", "expected 64 lowercase hex characters")),
            None => return Err(malformed("id", "missing")),
        };

        let sig = match value.get("sig") {
            Some(Value::String(s)) if s.len() == 128 && is_lower_hex(s) => {
                Signature::from_hex(s).map_err(|err| malformed("sig", err))?
            }
            Some(_) => return Err(malformed("sig", "expected 128 lowercase hex characters")),
            None => return Err(malformed("sig", "missing")),
        };

        let ots = match value.get("ots") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(malformed("ots", "expected a string")),
        };

        Ok(Self {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig,
            ots,
        })
    }

    /// the id pre-image of this event
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// serialize the event for ID computation
    pub fn canonicalize(&self) -> Vec<u8> {
        canonical_bytes(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// check if the event ID matches the computed ID
    pub fn check_id(&self) -> bool {
        ID::from_bytes(Schnorr.hash(&self.canonicalize())) == self.id
    }

    /// check the signature over the claimed id, without recomputing it
    pub fn verify_signature(&self) -> bool {
        Schnorr.verify(&self.pubkey, &self.id, &self.sig)
    }

    /// id check followed by signature check
    pub fn verify(&self) -> Verification {
        SignatureGate::new().verify(self)
    }

    pub fn tag_index(&self) -> TagIndex {
        TagIndex::build(self)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Event::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(err) => write!(f, "Event({} >> {})", self.id, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventTemplate, SecretKey};
    use serde_json::json;

    fn signed() -> Event {
        EventTemplate::new(Kind::TEXT, "hello")
            .tags(Tags::new().with(["t", "greeting"]))
            .finalize(&SecretKey::generate())
    }

    #[test]
    fn test_json_roundtrip() {
        let event = signed();
        let json = event.to_string();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed, event);
        assert!(!json.contains("ots"));

        let via_serde: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(via_serde, event);
    }

    #[test]
    fn test_ots_is_carried_but_not_hashed() {
        let mut event = signed();
        event.ots = Some("AE9wZW5UaW1lc3RhbXBz".to_string());
        assert!(event.check_id());

        let parsed = Event::from_json(&event.to_string()).unwrap();
        assert_eq!(parsed.ots.as_deref(), Some("AE9wZW5UaW1lc3RhbXBz"));
    }

    #[test]
    fn test_verify_classifies() {
        let event = signed();
        assert_eq!(event.verify(), Verification::Valid);

        let mut tampered = event.clone();
        tampered.content = "goodbye".to_string();
        assert_eq!(tampered.verify(), Verification::InvalidId);
    }

    #[test]
    fn test_tampering_breaks_id() {
        let mut event = signed();
        assert!(event.check_id());
        event.content = "goodbye".to_string();
        assert!(!event.check_id());
        // the signature still covers the claimed id
        assert!(event.verify_signature());
    }

    #[test]
    fn test_from_value_requires_id_and_sig() {
        let event = signed();
        let mut value = serde_json::to_value(&event).unwrap();
        value["sig"] = json!("00");
        assert!(matches!(
            Event::from_value(&value),
            Err(EventError::Malformed { field: "sig", .. })
        ));

        let mut value = serde_json::to_value(&event).unwrap();
        value.as_object_mut().unwrap().remove("id");
        assert!(matches!(
            Event::from_value(&value),
            Err(EventError::Malformed { field: "id", .. })
        ));

        assert!(matches!(
            Event::from_json("[1,2,3]"),
            Err(EventError::Malformed { field: "event", .. })
        ));
        assert!(serde_json::from_str::<Event>("{\"id\":1}").is_err());
    }
}
