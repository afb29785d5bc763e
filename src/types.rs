use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IDError {
    #[error("invalid hex encoding")]
    InvalidHex(#[from] lowercase_hex::FromHexError),
    #[error("invalid ID length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("invalid hex encoding")]
    InvalidHex(#[from] lowercase_hex::FromHexError),
    #[error("invalid signature length: expected 64 bytes, got {0}")]
    InvalidLength(usize),
}

/// A 32-byte event ID
///
/// Ordering is byte-wise, which is the same as comparing the lowercase hex forms.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ID(pub [u8; 32]);

impl ID {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, IDError> {
        if hex_str.len() != 64 {
            return Err(IDError::InvalidLength(hex_str.len() / 2));
        }
        let mut bytes = [0u8; 32];
        lowercase_hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        lowercase_hex::encode(self.0)
    }

    /// check if the hex form of this id starts with `prefix`
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }

    /// number of leading zero bits (NIP-13 difficulty)
    pub fn difficulty(&self) -> u32 {
        let mut bits = 0;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }
}

impl Serialize for ID {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ID::from_hex(&s).map_err(Error::custom)
    }
}

impl std::str::FromStr for ID {
    type Err = IDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<id:{}>", self.to_hex())
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<id={}>", self.to_hex())
    }
}

/// A 64-byte signature
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Create a new signature from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the bytes of the signature
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Create signature from hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, SignatureError> {
        if hex_str.len() != 128 {
            return Err(SignatureError::InvalidLength(hex_str.len() / 2));
        }
        let mut bytes = [0u8; 64];
        lowercase_hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        lowercase_hex::encode(self.0)
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(Error::custom)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<sig:{}>", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<sig={}>", self.to_hex())
    }
}

/// map of tag names to values, used for tag queries and tag indexes
pub type TagMap = std::collections::BTreeMap<String, Vec<String>>;

/// event kind type
#[derive(Copy, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Kind(pub u16);

impl Kind {
    pub const METADATA: Kind = Kind(0);
    pub const TEXT: Kind = Kind(1);
    pub const RECOMMEND_RELAY: Kind = Kind(2);
    pub const CONTACTS: Kind = Kind(3);
    pub const ENCRYPTED_DIRECT_MESSAGE: Kind = Kind(4);
    pub const EVENT_DELETION: Kind = Kind(5);
    pub const REPOST: Kind = Kind(6);
    pub const REACTION: Kind = Kind(7);
    pub const BADGE_AWARD: Kind = Kind(8);
    pub const GENERIC_REPOST: Kind = Kind(16);
    pub const CHANNEL_CREATION: Kind = Kind(40);
    pub const CHANNEL_METADATA: Kind = Kind(41);
    pub const CHANNEL_MESSAGE: Kind = Kind(42);
    pub const CHANNEL_HIDE_MESSAGE: Kind = Kind(43);
    pub const CHANNEL_MUTE_USER: Kind = Kind(44);
    pub const OPEN_TIMESTAMPS: Kind = Kind(1040);
    pub const FILE_METADATA: Kind = Kind(1063);
    pub const LIVE_CHAT_MESSAGE: Kind = Kind(1311);
    pub const REPORTING: Kind = Kind(1984);
    pub const LABEL: Kind = Kind(1985);
    pub const COMMUNITY_POST_APPROVAL: Kind = Kind(4550);
    pub const JOB_FEEDBACK: Kind = Kind(7000);
    pub const ZAP_GOAL: Kind = Kind(9041);
    pub const ZAP_REQUEST: Kind = Kind(9734);
    pub const ZAP: Kind = Kind(9735);
    pub const HIGHLIGHTS: Kind = Kind(9802);
    pub const MUTE_LIST: Kind = Kind(10000);
    pub const PIN_LIST: Kind = Kind(10001);
    pub const RELAY_LIST_METADATA: Kind = Kind(10002);
    pub const WALLET_INFO: Kind = Kind(13194);
    pub const CLIENT_AUTHENTICATION: Kind = Kind(22242);
    pub const WALLET_REQUEST: Kind = Kind(23194);
    pub const WALLET_RESPONSE: Kind = Kind(23195);
    pub const NOSTR_CONNECT: Kind = Kind(24133);
    pub const HTTP_AUTH: Kind = Kind(27235);
    pub const CATEGORIZED_PEOPLE_LIST: Kind = Kind(30000);
    pub const LONG_FORM_CONTENT: Kind = Kind(30023);
    pub const APPLICATION_SPECIFIC_DATA: Kind = Kind(30078);
    pub const LIVE_EVENT: Kind = Kind(30311);
    pub const HANDLER_INFORMATION: Kind = Kind(31990);
    pub const COMMUNITY_DEFINITION: Kind = Kind(34550);

    /// check if this kind is regular (1-9999, excluding 0 and 3)
    pub fn is_regular(&self) -> bool {
        self.0 < 10000 && self.0 != 0 && self.0 != 3
    }

    /// check if this kind is replaceable (0, 3, or 10000-19999)
    pub fn is_replaceable(&self) -> bool {
        self.0 == 0 || self.0 == 3 || (10000..20000).contains(&self.0)
    }

    /// check if this kind is ephemeral (20000-29999)
    pub fn is_ephemeral(&self) -> bool {
        (20000..30000).contains(&self.0)
    }

    /// check if this kind is addressable (30000-39999)
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_roundtrip() {
        let hex = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36";
        let id = ID::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert!(id.has_prefix("5c83"));
        assert!(!id.has_prefix("5c84"));
        assert!(matches!(ID::from_hex("abcd"), Err(IDError::InvalidLength(2))));
    }

    #[test]
    fn test_id_order_matches_hex_order() {
        let a = ID::from_hex(&"0a".repeat(32)).unwrap();
        let b = ID::from_hex(&"a0".repeat(32)).unwrap();
        assert!(a < b);
        assert!(a.to_hex() < b.to_hex());
    }

    #[test]
    fn test_id_difficulty() {
        let mut bytes = [0xffu8; 32];
        assert_eq!(ID(bytes).difficulty(), 0);
        bytes[0] = 0;
        bytes[1] = 0x0f;
        assert_eq!(ID(bytes).difficulty(), 12);
        assert_eq!(ID([0; 32]).difficulty(), 256);
    }

    #[test]
    fn test_kind_classes() {
        assert!(Kind::TEXT.is_regular());
        assert!(Kind::METADATA.is_replaceable());
        assert!(Kind::CONTACTS.is_replaceable());
        assert!(Kind::CLIENT_AUTHENTICATION.is_ephemeral());
        assert!(Kind::LONG_FORM_CONTENT.is_addressable());
        assert!(!Kind::LONG_FORM_CONTENT.is_replaceable());
    }

    #[test]
    fn test_kind_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Kind(30023)).unwrap(), "30023");
        assert_eq!(serde_json::from_str::<Kind>("7").unwrap(), Kind::REACTION);
        assert!(serde_json::from_str::<Kind>("70000").is_err());
        assert!(serde_json::from_str::<Kind>("-1").is_err());
    }
}
