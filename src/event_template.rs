use crate::crypto::{Digester, Schnorr, Signer};
use crate::event::{EventError, Result};
use crate::helpers::is_lower_hex;
use crate::{Event, Kind, PubKey, SecretKey, Tags, Timestamp, ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// the minimum needed to create an event: who signs it is decided later
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Tags,
    pub content: String,
}

impl EventTemplate {
    pub fn new(kind: Kind, content: impl Into<String>) -> Self {
        Self {
            created_at: Timestamp::now(),
            kind,
            tags: Tags::new(),
            content: content.into(),
        }
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// attach the author, producing the id pre-image
    pub fn into_unsigned(self, pubkey: PubKey) -> UnsignedEvent {
        UnsignedEvent {
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }

    /// returns a signed event with id, pubkey and sig
    pub fn finalize(self, secret_key: &SecretKey) -> Event {
        self.finalize_with(secret_key, &Schnorr, &Schnorr)
    }

    pub fn finalize_with<D, S>(self, secret_key: &SecretKey, digester: &D, signer: &S) -> Event
    where
        D: Digester + ?Sized,
        S: Signer + ?Sized,
    {
        self.into_unsigned(secret_key.pubkey())
            .sign_unchecked(secret_key, digester, signer)
    }
}

impl std::fmt::Display for EventTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EventTemplate({}, {}, {}, {})",
            self.kind, self.created_at, self.tags, self.content
        )
    }
}

/// an event minus `id` and `sig`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UnsignedEvent {
    pub pubkey: PubKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Tags,
    pub content: String,
}

impl UnsignedEvent {
    /// the bytes the id is the digest of
    pub fn canonicalize(&self) -> Vec<u8> {
        canonical_bytes(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    pub fn compute_id(&self) -> ID {
        self.compute_id_with(&Schnorr)
    }

    pub fn compute_id_with<D: Digester + ?Sized>(&self, digester: &D) -> ID {
        ID::from_bytes(digester.hash(&self.canonicalize()))
    }

    /// sign with a key that must belong to `self.pubkey`
    pub fn sign(self, secret_key: &SecretKey) -> Result<Event> {
        self.sign_with(secret_key, &Schnorr, &Schnorr)
    }

    pub fn sign_with<D, S>(self, secret_key: &SecretKey, digester: &D, signer: &S) -> Result<Event>
    where
        D: Digester + ?Sized,
        S: Signer + ?Sized,
    {
        if secret_key.pubkey() != self.pubkey {
            return Err(EventError::KeyMismatch(self.pubkey));
        }
        Ok(self.sign_unchecked(secret_key, digester, signer))
    }

    fn sign_unchecked<D, S>(self, secret_key: &SecretKey, digester: &D, signer: &S) -> Event
    where
        D: Digester + ?Sized,
        S: Signer + ?Sized,
    {
        let id = self.compute_id_with(digester);
        let sig = signer.sign(secret_key, &id);

        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
            ots: None,
        }
    }

    /// read the unsigned fields out of untrusted JSON, checking their shape
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| malformed("event", "expected a JSON object"))?;

        let pubkey = match object.get("pubkey") {
            Some(Value::String(s)) if s.len() == 64 && is_lower_hex(s) => {
                PubKey::from_hex(s).map_err(|err| malformed("pubkey", err))?
            }
            Some(_) => return Err(malformed("pubkey", "expected 64 lowercase hex characters")),
            None => return Err(malformed("pubkey", "missing")),
        };

        let created_at = match object.get("created_at") {
            Some(v) => v
                .as_u64()
                .map(Timestamp)
                .ok_or_else(|| malformed("created_at", "expected a non-negative integer"))?,
            None => return Err(malformed("created_at", "missing")),
        };

        let kind = match object.get("kind") {
            Some(v) => v
                .as_u64()
                .and_then(|k| u16::try_from(k).ok())
                .map(Kind)
                .ok_or_else(|| malformed("kind", "expected an integer between 0 and 65535"))?,
            None => return Err(malformed("kind", "missing")),
        };

        let tags = match object.get("tags") {
            Some(v) => parse_tags(v)?,
            None => return Err(malformed("tags", "missing")),
        };

        let content = match object.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(malformed("content", "expected a string")),
            None => return Err(malformed("content", "missing")),
        };

        Ok(Self {
            pubkey,
            created_at,
            kind,
            tags,
            content,
        })
    }
}

/// compute the id of untrusted JSON
pub fn compute_id(value: &Value) -> Result<ID> {
    UnsignedEvent::from_value(value).map(|unsigned| unsigned.compute_id())
}

pub(crate) fn canonical_bytes(
    pubkey: &PubKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &Tags,
    content: &str,
) -> Vec<u8> {
    let array = serde_json::json!([0, pubkey.to_hex(), created_at.0, kind.0, tags, content]);
    array.to_string().into_bytes()
}

pub(crate) fn malformed(field: &'static str, reason: impl ToString) -> EventError {
    EventError::Malformed {
        field,
        reason: reason.to_string(),
    }
}

fn parse_tags(value: &Value) -> Result<Tags> {
    let list = value
        .as_array()
        .ok_or_else(|| malformed("tags", "expected an array of arrays"))?;

    let mut tags = Vec::with_capacity(list.len());
    for (i, tag) in list.iter().enumerate() {
        let items = tag
            .as_array()
            .ok_or_else(|| malformed("tags", format!("tag {i} is not an array")))?;
        if items.is_empty() {
            return Err(malformed("tags", format!("tag {i} is empty")));
        }

        let mut strings = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => strings.push(s.clone()),
                _ => return Err(malformed("tags", format!("tag {i} has a non-string item"))),
            }
        }
        tags.push(strings);
    }

    Ok(Tags(tags))
}
