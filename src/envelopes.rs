//! client <-> relay messages
//!
//! every message is a JSON array whose first element names it. decoding checks
//! the exact arity of each form and the type of each position; a message that
//! fails is never partially applied.

use crate::normalize::ReasonMessage;
use crate::{Event, Filter, ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("{label}: expected {expected} elements, got {actual}")]
    ArityMismatch {
        label: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("{label}: element {position}: {reason}")]
    TypeMismatch {
        label: String,
        position: usize,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// messages a client sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Count {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
    Auth(Event),
}

/// messages a relay sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: ID,
        accepted: bool,
        message: String,
    },
    Eose(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice(String),
    Auth {
        challenge: String,
    },
    Count {
        subscription_id: String,
        count: CountResponse,
    },
}

/// payload of a relay's COUNT answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate: Option<bool>,
}

/// a message of either direction, as inferred from its shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Client(ClientMessage),
    Relay(RelayMessage),
}

/// the top-level array, split into its label and the whole element list
struct Frame {
    label: String,
    items: Vec<Value>,
}

impl Frame {
    fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let items = match value {
            Value::Array(items) => items,
            _ => {
                return Err(DecodeError::TypeMismatch {
                    label: "message".to_string(),
                    position: 0,
                    reason: "expected a JSON array".to_string(),
                })
            }
        };

        let label = match items.first() {
            Some(Value::String(label)) => label.clone(),
            Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
            None => {
                return Err(DecodeError::ArityMismatch {
                    label: "message".to_string(),
                    expected: "at least 1",
                    actual: 0,
                })
            }
        };

        Ok(Self { label, items })
    }

    fn arity_error(&self, expected: &'static str) -> DecodeError {
        DecodeError::ArityMismatch {
            label: self.label.clone(),
            expected,
            actual: self.items.len(),
        }
    }

    fn type_error(&self, position: usize, reason: impl ToString) -> DecodeError {
        DecodeError::TypeMismatch {
            label: self.label.clone(),
            position,
            reason: reason.to_string(),
        }
    }

    fn exactly(&self, n: usize, expected: &'static str) -> Result<()> {
        if self.items.len() == n {
            Ok(())
        } else {
            Err(self.arity_error(expected))
        }
    }

    fn string_at(&self, position: usize) -> Result<String> {
        match &self.items[position] {
            Value::String(s) => Ok(s.clone()),
            _ => Err(self.type_error(position, "expected a string")),
        }
    }

    fn event_at(&self, position: usize) -> Result<Event> {
        if !self.items[position].is_object() {
            return Err(self.type_error(position, "expected an event object"));
        }
        Event::from_value(&self.items[position]).map_err(|err| self.type_error(position, err))
    }

    fn filters_from(&self, start: usize) -> Result<Vec<Filter>> {
        if self.items.len() <= start {
            return Err(self.arity_error("at least 3"));
        }

        let mut filters = Vec::with_capacity(self.items.len() - start);
        for (position, item) in self.items.iter().enumerate().skip(start) {
            if !item.is_object() {
                return Err(self.type_error(position, "expected a filter object"));
            }
            let filter = Filter::deserialize(item).map_err(|err| self.type_error(position, err))?;
            filters.push(filter);
        }
        Ok(filters)
    }

    fn client(&self) -> Result<ClientMessage> {
        match self.label.as_str() {
            "EVENT" => {
                self.exactly(2, "2")?;
                Ok(ClientMessage::Event(self.event_at(1)?))
            }
            "REQ" | "COUNT" => {
                let filters = self.filters_from(2)?;
                let subscription_id = self.string_at(1)?;
                if self.label == "REQ" {
                    Ok(ClientMessage::Req {
                        subscription_id,
                        filters,
                    })
                } else {
                    Ok(ClientMessage::Count {
                        subscription_id,
                        filters,
                    })
                }
            }
            "CLOSE" => {
                self.exactly(2, "2")?;
                Ok(ClientMessage::Close(self.string_at(1)?))
            }
            "AUTH" => {
                self.exactly(2, "2")?;
                Ok(ClientMessage::Auth(self.event_at(1)?))
            }
            _ => Err(DecodeError::UnknownType(self.label.clone())),
        }
    }

    fn relay(&self) -> Result<RelayMessage> {
        match self.label.as_str() {
            "EVENT" => {
                self.exactly(3, "3")?;
                Ok(RelayMessage::Event {
                    subscription_id: self.string_at(1)?,
                    event: self.event_at(2)?,
                })
            }
            "OK" => {
                self.exactly(4, "4")?;
                let event_id = match &self.items[1] {
                    Value::String(s) => ID::from_hex(s).map_err(|err| self.type_error(1, err))?,
                    _ => return Err(self.type_error(1, "expected an event id")),
                };
                let accepted = self.items[2]
                    .as_bool()
                    .ok_or_else(|| self.type_error(2, "expected a boolean"))?;
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message: self.string_at(3)?,
                })
            }
            "EOSE" => {
                self.exactly(2, "2")?;
                Ok(RelayMessage::Eose(self.string_at(1)?))
            }
            "CLOSED" => {
                self.exactly(3, "3")?;
                Ok(RelayMessage::Closed {
                    subscription_id: self.string_at(1)?,
                    message: self.string_at(2)?,
                })
            }
            "NOTICE" => {
                self.exactly(2, "2")?;
                Ok(RelayMessage::Notice(self.string_at(1)?))
            }
            "AUTH" => {
                self.exactly(2, "2")?;
                Ok(RelayMessage::Auth {
                    challenge: self.string_at(1)?,
                })
            }
            "COUNT" => {
                self.exactly(3, "3")?;
                let subscription_id = self.string_at(1)?;
                if !self.items[2].is_object() {
                    return Err(self.type_error(2, "expected a count object"));
                }
                let count = CountResponse::deserialize(&self.items[2])
                    .map_err(|err| self.type_error(2, err))?;
                Ok(RelayMessage::Count {
                    subscription_id,
                    count,
                })
            }
            _ => Err(DecodeError::UnknownType(self.label.clone())),
        }
    }

    /// which side sent this, for the labels both sides use
    fn is_from_relay(&self) -> bool {
        match self.label.as_str() {
            "EVENT" => self.items.len() != 2,
            "AUTH" => self.items.get(1).is_some_and(Value::is_string),
            "COUNT" => {
                self.items.len() == 3
                    && self.items[2]
                        .as_object()
                        .is_some_and(|obj| obj.contains_key("count"))
            }
            "OK" | "EOSE" | "CLOSED" | "NOTICE" => true,
            _ => false,
        }
    }
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self> {
        Frame::parse(text)?.client()
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "EVENT",
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Count { .. } => "COUNT",
            ClientMessage::Close(_) => "CLOSE",
            ClientMessage::Auth(_) => "AUTH",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            }
            | ClientMessage::Count {
                subscription_id,
                filters,
            } => {
                let mut items = Vec::with_capacity(filters.len() + 2);
                items.push(json!(self.label()));
                items.push(json!(subscription_id));
                items.extend(filters.iter().map(|f| json!(f)));
                Value::Array(items)
            }
            ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
            ClientMessage::Auth(event) => json!(["AUTH", event]),
        }
    }
}

impl RelayMessage {
    pub fn decode(text: &str) -> Result<Self> {
        Frame::parse(text)?.relay()
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelayMessage::Event { .. } => "EVENT",
            RelayMessage::Ok { .. } => "OK",
            RelayMessage::Eose(_) => "EOSE",
            RelayMessage::Closed { .. } => "CLOSED",
            RelayMessage::Notice(_) => "NOTICE",
            RelayMessage::Auth { .. } => "AUTH",
            RelayMessage::Count { .. } => "COUNT",
        }
    }

    pub fn ok(event_id: ID, accepted: bool, message: impl Into<String>) -> Self {
        RelayMessage::Ok {
            event_id,
            accepted,
            message: message.into(),
        }
    }

    pub fn closed(subscription_id: impl Into<String>, message: impl Into<String>) -> Self {
        RelayMessage::Closed {
            subscription_id: subscription_id.into(),
            message: message.into(),
        }
    }

    /// the parsed message of an OK or CLOSED
    pub fn reason(&self) -> Option<ReasonMessage> {
        match self {
            RelayMessage::Ok { message, .. } | RelayMessage::Closed { message, .. } => {
                Some(ReasonMessage::parse(message))
            }
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id.to_hex(), accepted, message]),
            RelayMessage::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            RelayMessage::Notice(message) => json!(["NOTICE", message]),
            RelayMessage::Auth { challenge } => json!(["AUTH", challenge]),
            RelayMessage::Count {
                subscription_id,
                count,
            } => json!(["COUNT", subscription_id, count]),
        }
    }
}

impl Envelope {
    /// decode a message without knowing which side sent it
    pub fn decode(text: &str) -> Result<Self> {
        let frame = Frame::parse(text)?;
        if frame.label == "EVENT" && !(2..=3).contains(&frame.items.len()) {
            return Err(frame.arity_error("2 or 3"));
        }

        if frame.is_from_relay() {
            frame.relay().map(Envelope::Relay)
        } else {
            frame.client().map(Envelope::Client)
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Envelope::Client(message) => message.encode(),
            Envelope::Relay(message) => message.encode(),
        }
    }

    /// get the label for this envelope type
    pub fn label(&self) -> &'static str {
        match self {
            Envelope::Client(message) => message.label(),
            Envelope::Relay(message) => message.label(),
        }
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Envelope {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        Envelope::decode(s)
    }
}

impl From<ClientMessage> for Envelope {
    fn from(message: ClientMessage) -> Self {
        Envelope::Client(message)
    }
}

impl From<RelayMessage> for Envelope {
    fn from(message: RelayMessage) -> Self {
        Envelope::Relay(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MachineReadablePrefix;
    use crate::{EventTemplate, Kind, SecretKey, Tags, Timestamp};

    fn event() -> Event {
        EventTemplate::new(Kind::TEXT, "hello")
            .tags(Tags::new().with(["e", "abc"]))
            .finalize(&SecretKey::generate())
    }

    fn client_messages() -> Vec<ClientMessage> {
        vec![
            ClientMessage::Event(event()),
            ClientMessage::Req {
                subscription_id: "sub1".to_string(),
                filters: vec![
                    Filter::new().kinds([Kind::TEXT]).limit(10),
                    Filter::new().tag("e", ["abc"]).since(Timestamp(5)),
                    Filter::new().tag("", ["v"]),
                ],
            },
            ClientMessage::Count {
                subscription_id: "c".to_string(),
                filters: vec![Filter::new()],
            },
            ClientMessage::Close("sub1".to_string()),
            ClientMessage::Auth(event()),
        ]
    }

    fn relay_messages() -> Vec<RelayMessage> {
        vec![
            RelayMessage::Event {
                subscription_id: "sub1".to_string(),
                event: event(),
            },
            RelayMessage::ok(event().id, true, ""),
            RelayMessage::ok(event().id, false, "duplicate: already have it"),
            RelayMessage::Eose("sub1".to_string()),
            RelayMessage::closed("sub1", "auth-required: log in"),
            RelayMessage::Notice("hello".to_string()),
            RelayMessage::Auth {
                challenge: "abc".to_string(),
            },
            RelayMessage::Count {
                subscription_id: "c".to_string(),
                count: CountResponse {
                    count: 42,
                    approximate: Some(true),
                },
            },
            RelayMessage::Count {
                subscription_id: "c".to_string(),
                count: CountResponse {
                    count: 0,
                    approximate: None,
                },
            },
        ]
    }

    #[test]
    fn test_client_roundtrip() {
        for message in client_messages() {
            let text = message.encode();
            assert_eq!(ClientMessage::decode(&text).unwrap(), message, "{text}");
            assert_eq!(
                Envelope::decode(&text).unwrap(),
                Envelope::Client(message),
                "{text}"
            );
        }
    }

    #[test]
    fn test_relay_roundtrip() {
        for message in relay_messages() {
            let text = message.encode();
            assert_eq!(RelayMessage::decode(&text).unwrap(), message, "{text}");
            assert_eq!(
                Envelope::decode(&text).unwrap(),
                Envelope::Relay(message),
                "{text}"
            );
        }
    }

    #[test]
    fn test_encoded_text() {
        assert_eq!(RelayMessage::Eose("s".to_string()).encode(), r#"["EOSE","s"]"#);
        assert_eq!(
            ClientMessage::Close("s".to_string()).to_string(),
            r#"["CLOSE","s"]"#
        );
        let count = RelayMessage::Count {
            subscription_id: "s".to_string(),
            count: CountResponse {
                count: 3,
                approximate: None,
            },
        };
        assert_eq!(count.encode(), r#"["COUNT","s",{"count":3}]"#);
        assert_eq!(
            ClientMessage::Req {
                subscription_id: "s".to_string(),
                filters: vec![Filter::new().kinds([Kind(1)])],
            }
            .encode(),
            r#"["REQ","s",{"kinds":[1]}]"#
        );
    }

    #[test]
    fn test_arity_errors() {
        let cases = [
            r#"["CLOSE"]"#,
            r#"["CLOSE","a","b"]"#,
            r#"["REQ","sub"]"#,
            r#"["EOSE"]"#,
            r#"["NOTICE","a","b"]"#,
            r#"["OK","x",true]"#,
            r#"["EVENT"]"#,
            r#"["EVENT","a",{},{}]"#,
            r#"[]"#,
        ];
        for text in cases {
            assert!(
                matches!(Envelope::decode(text), Err(DecodeError::ArityMismatch { .. })),
                "{text}"
            );
        }
        match ClientMessage::decode(r#"["REQ","sub"]"#) {
            Err(DecodeError::ArityMismatch { expected, actual, .. }) => {
                assert_eq!(expected, "at least 3");
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_type_errors() {
        let cases = [
            (r#"["REQ",1,{}]"#, 1),
            (r#"["REQ","s",{},"nope"]"#, 3),
            (r#"["REQ","s",{"kinds":"x"}]"#, 2),
            (r#"["CLOSE",{}]"#, 1),
            (r#"["EOSE",null]"#, 1),
            (r#"["OK","zz",true,""]"#, 1),
            (r#"["CLOSED","s",false]"#, 2),
            (r#"["EVENT",{"kind":1}]"#, 1),
            (r#"{"EVENT":1}"#, 0),
        ];
        for (text, expected) in cases {
            match Envelope::decode(text) {
                Err(DecodeError::TypeMismatch { position, .. }) => {
                    assert_eq!(position, expected, "{text}")
                }
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_and_misdirected() {
        assert!(matches!(
            Envelope::decode(r#"["HELLO","x"]"#),
            Err(DecodeError::UnknownType(label)) if label == "HELLO"
        ));
        assert!(matches!(
            Envelope::decode(r#"[1,"x"]"#),
            Err(DecodeError::UnknownType(_))
        ));
        assert!(matches!(
            ClientMessage::decode(r#"["EOSE","x"]"#),
            Err(DecodeError::UnknownType(_))
        ));
        assert!(matches!(
            RelayMessage::decode(r#"["REQ","x",{}]"#),
            Err(DecodeError::UnknownType(_))
        ));
        assert!(matches!(Envelope::decode("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_reason_accessor() {
        let closed = RelayMessage::closed("s", "auth-required: log in");
        assert_eq!(
            closed.reason().unwrap().prefix(),
            Some(MachineReadablePrefix::AuthRequired)
        );
        assert!(RelayMessage::Notice("x".to_string()).reason().is_none());
    }
}
