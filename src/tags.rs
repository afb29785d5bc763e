use crate::{Kind, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// a single tag (array of strings, first element is the name)
pub type Tag = Vec<String>;

/// collection of tags
///
/// storage is always "array of arrays of strings"; the positional meaning of the
/// well-known tags is exposed through the typed iterators below.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tags(pub Vec<Tag>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// append a tag built from any list of strings
    pub fn with<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.push(tag.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// get the first "d" tag value or empty string
    pub fn get_d(&self) -> String {
        self.find("d").map(|tag| tag[1].clone()).unwrap_or_default()
    }

    /// find the first tag with the given key that has at least one value
    pub fn find(&self, key: &str) -> Option<&Tag> {
        self.0.iter().find(|tag| tag.len() >= 2 && tag[0] == key)
    }

    /// find all tags with the given key that have at least one value
    pub fn find_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.0
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == key)
    }

    /// find tag with specific key and value
    pub fn find_with_value(&self, key: &str, value: &str) -> Option<&Tag> {
        self.0
            .iter()
            .find(|tag| tag.len() >= 2 && tag[0] == key && tag[1] == value)
    }

    /// find the last tag with the given key
    pub fn find_last(&self, key: &str) -> Option<&Tag> {
        self.0.iter().rev().find(|tag| tag.len() >= 2 && tag[0] == key)
    }

    /// value of the first tag with the given key
    pub fn first_value(&self, key: &str) -> Option<&str> {
        self.find(key).map(|tag| tag[1].as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    /// `e` tags: [name, eventId, relayUrl?, marker?]
    pub fn event_refs(&self) -> impl Iterator<Item = EventRef<'_>> {
        self.find_all("e").map(|tag| EventRef {
            id: tag[1].as_str(),
            relay: optional(tag, 2),
            marker: tag.get(3).and_then(|m| m.parse().ok()),
        })
    }

    /// `p` tags: [name, pubkey, relayUrl?]
    pub fn pubkey_refs(&self) -> impl Iterator<Item = PubKeyRef<'_>> {
        self.find_all("p").map(|tag| PubKeyRef {
            pubkey: tag[1].as_str(),
            relay: optional(tag, 2),
        })
    }

    /// `a` tags: [name, "<kind>:<pubkey>:<d>", relayUrl?], skipping malformed specifiers
    pub fn address_refs(&self) -> impl Iterator<Item = AddressRef<'_>> {
        self.find_all("a").filter_map(|tag| {
            let mut parts = tag[1].splitn(3, ':');
            let kind = parts.next()?.parse::<u16>().ok()?;
            let pubkey = parts.next()?;
            let identifier = parts.next()?;
            Some(AddressRef {
                kind: Kind(kind),
                pubkey,
                identifier,
                relay: optional(tag, 2),
            })
        })
    }

    /// `t` tags
    pub fn hashtags(&self) -> impl Iterator<Item = &str> {
        self.find_all("t").map(|tag| tag[1].as_str())
    }

    /// `r` tags: either a plain reference or [name, relayUrl, "read"|"write"]
    pub fn references(&self) -> impl Iterator<Item = Reference<'_>> {
        self.find_all("r").map(|tag| Reference {
            url: tag[1].as_str(),
            mode: tag.get(2).and_then(|m| m.parse().ok()),
        })
    }

    /// `i` tags: [name, "<platform>:<identity>", proof]
    pub fn identities(&self) -> impl Iterator<Item = IdentityRef<'_>> {
        self.find_all("i").filter_map(|tag| {
            let (platform, identity) = tag[1].split_once(':')?;
            Some(IdentityRef {
                platform,
                identity,
                proof: optional(tag, 2),
            })
        })
    }

    /// `L` tags
    pub fn label_namespaces(&self) -> impl Iterator<Item = &str> {
        self.find_all("L").map(|tag| tag[1].as_str())
    }

    /// `l` tags: [name, label, namespace, annotation-json?]
    pub fn labels(&self) -> impl Iterator<Item = Label<'_>> {
        self.find_all("l").map(|tag| Label {
            value: tag[1].as_str(),
            namespace: optional(tag, 2),
            annotation: tag.get(3).and_then(|a| serde_json::from_str(a).ok()),
        })
    }

    /// NIP-42 `relay` tag
    pub fn relay(&self) -> Option<&str> {
        self.first_value("relay")
    }

    /// NIP-42 `challenge` tag
    pub fn challenge(&self) -> Option<&str> {
        self.first_value("challenge")
    }

    /// NIP-40 `expiration` tag
    pub fn expiration(&self) -> Option<Timestamp> {
        self.first_value("expiration")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Timestamp)
    }

    /// NIP-13 `nonce` tag target difficulty
    pub fn pow_target(&self) -> Option<u32> {
        self.find("nonce")
            .and_then(|tag| tag.get(2))
            .and_then(|d| d.parse().ok())
    }
}

fn optional(tag: &Tag, position: usize) -> Option<&str> {
    tag.get(position).map(String::as_str).filter(|s| !s.is_empty())
}

impl IntoIterator for Tags {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{json}"),
            Err(err) => write!(f, "Tags({err})"),
        }
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(tags: Vec<Tag>) -> Self {
        Self(tags)
    }
}

impl From<Tags> for Vec<Tag> {
    fn from(tags: Tags) -> Self {
        tags.0
    }
}

/// marker in the 4th position of an `e` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMarker {
    Reply,
    Root,
    Mention,
}

impl EventMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventMarker::Reply => "reply",
            EventMarker::Root => "root",
            EventMarker::Mention => "mention",
        }
    }
}

impl FromStr for EventMarker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reply" => Ok(EventMarker::Reply),
            "root" => Ok(EventMarker::Root),
            "mention" => Ok(EventMarker::Mention),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef<'a> {
    pub id: &'a str,
    pub relay: Option<&'a str>,
    pub marker: Option<EventMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKeyRef<'a> {
    pub pubkey: &'a str,
    pub relay: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRef<'a> {
    pub kind: Kind,
    pub pubkey: &'a str,
    pub identifier: &'a str,
    pub relay: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Read,
    Write,
}

impl FromStr for RelayMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(RelayMode::Read),
            "write" => Ok(RelayMode::Write),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    pub url: &'a str,
    pub mode: Option<RelayMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRef<'a> {
    pub platform: &'a str,
    pub identity: &'a str,
    pub proof: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label<'a> {
    pub value: &'a str,
    pub namespace: Option<&'a str>,
    pub annotation: Option<LabelAnnotation>,
}

/// JSON annotation carried in the 4th position of an `l` tag
///
/// known fields are typed, anything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&[&str]]) -> Tags {
        Tags(
            raw.iter()
                .map(|t| t.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_find_helpers() {
        let t = tags(&[&["e", "A"], &["p", "P1"], &["e", "B"], &["d", "slug"], &["e"]]);

        assert_eq!(t.find("e").unwrap()[1], "A");
        assert_eq!(t.find_last("e").unwrap()[1], "B");
        assert_eq!(t.find_all("e").count(), 2);
        assert!(t.find_with_value("p", "P1").is_some());
        assert!(t.find_with_value("p", "P2").is_none());
        assert_eq!(t.get_d(), "slug");
        assert_eq!(Tags::new().get_d(), "");
    }

    #[test]
    fn test_event_refs_with_markers() {
        let t = tags(&[
            &["e", "root-id", "wss://relay.example", "root"],
            &["e", "reply-id", "", "reply"],
            &["e", "plain-id"],
            &["e", "odd-id", "", "whatever"],
        ]);

        let refs: Vec<_> = t.event_refs().collect();
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0].marker, Some(EventMarker::Root));
        assert_eq!(refs[0].relay, Some("wss://relay.example"));
        assert_eq!(refs[1].relay, None);
        assert_eq!(refs[1].marker, Some(EventMarker::Reply));
        assert_eq!(refs[2].marker, None);
        assert_eq!(refs[3].marker, None);
    }

    #[test]
    fn test_address_refs_skip_malformed() {
        let t = tags(&[
            &["a", "30023:abcd:my-article", "wss://r"],
            &["a", "not-a-kind:abcd:x"],
            &["a", "30023:abcd"],
            &["a", "10000:abcd:"],
        ]);

        let refs: Vec<_> = t.address_refs().collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, Kind::LONG_FORM_CONTENT);
        assert_eq!(refs[0].identifier, "my-article");
        assert_eq!(refs[0].relay, Some("wss://r"));
        assert_eq!(refs[1].identifier, "");
    }

    #[test]
    fn test_labels_with_annotation() {
        let t = tags(&[
            &["L", "ugc"],
            &["l", "spam", "ugc", r#"{"quality":0.2,"context":["x"],"source":"bot"}"#],
            &["l", "art"],
        ]);

        assert_eq!(t.label_namespaces().collect::<Vec<_>>(), vec!["ugc"]);
        let labels: Vec<_> = t.labels().collect();
        let annotation = labels[0].annotation.as_ref().unwrap();
        assert_eq!(annotation.quality, Some(0.2));
        assert_eq!(annotation.context.as_deref(), Some(&["x".to_string()][..]));
        assert_eq!(annotation.extra.get("source"), Some(&Value::from("bot")));
        assert_eq!(labels[1].namespace, None);
        assert!(labels[1].annotation.is_none());
    }

    #[test]
    fn test_misc_positional_tags() {
        let t = tags(&[
            &["r", "wss://relay.one", "write"],
            &["r", "https://example.com"],
            &["i", "github:someone", "gist-id"],
            &["t", "nostr"],
            &["relay", "wss://relay.one"],
            &["challenge", "abc"],
            &["expiration", "1700000000"],
            &["nonce", "776797", "20"],
        ]);

        let refs: Vec<_> = t.references().collect();
        assert_eq!(refs[0].mode, Some(RelayMode::Write));
        assert_eq!(refs[1].mode, None);
        let ids: Vec<_> = t.identities().collect();
        assert_eq!(ids[0].platform, "github");
        assert_eq!(ids[0].identity, "someone");
        assert_eq!(t.hashtags().collect::<Vec<_>>(), vec!["nostr"]);
        assert_eq!(t.relay(), Some("wss://relay.one"));
        assert_eq!(t.challenge(), Some("abc"));
        assert_eq!(t.expiration(), Some(Timestamp(1700000000)));
        assert_eq!(t.pow_target(), Some(20));
    }
}
