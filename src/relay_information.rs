use crate::{normalize_url, Kind, PubKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum RelayInformationError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL normalization error")]
    Normalize(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, RelayInformationError>;

/// relay information document (NIP-11)
///
/// only ever read; fetching it over HTTP is left to the embedding application.
/// fields this crate does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayInformationDocument {
    #[serde(skip)]
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PubKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_nips: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation: Option<Limitation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retention: Vec<Retention>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relay_countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub language_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posting_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<Fees>,
    #[serde(default)]
    pub icon: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// server limitations, every one optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_filters: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_subid_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_prefix: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_writes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_lower_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_upper_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<usize>,
}

/// a single kind or an inclusive `[start, end]` range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KindRange {
    Single(Kind),
    Range(Kind, Kind),
}

impl KindRange {
    pub fn contains(&self, kind: Kind) -> bool {
        match *self {
            KindRange::Single(k) => k == kind,
            KindRange::Range(start, end) => start <= kind && kind <= end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<KindRange>>,
    /// seconds; absent or null means no time bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admission: Vec<FeeAmount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscription: Vec<FeeAmount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publication: Vec<FeeAmount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAmount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<Kind>>,
}

impl RelayInformationDocument {
    /// parse a document served for the relay at `url`
    pub fn from_json(url: &str, json: &str) -> Result<Self> {
        let normalized_url = normalize_url(url)?;
        let mut info: RelayInformationDocument = serde_json::from_str(json)?;

        info.url = normalized_url.to_string();
        if info.name.is_empty() {
            info.name = normalized_url.host_str().unwrap_or_default().to_string();
        }

        if info.icon.is_empty() {
            let mut icon = normalized_url.clone();
            icon.set_path("/favicon.ico");
            info.icon = format!("http{}", &icon.as_str()[2..]);
        }

        Ok(info)
    }

    pub fn supports(&self, nip: u32) -> bool {
        self.supported_nips.contains(&nip)
    }

    pub fn limitation(&self) -> Limitation {
        self.limitation.clone().unwrap_or_default()
    }

    /// the retention policy governing `kind`: the first entry listing it, or
    /// failing that the first entry that lists no kinds at all
    pub fn retention_for(&self, kind: Kind) -> Option<&Retention> {
        self.retention
            .iter()
            .find(|r| {
                r.kinds
                    .as_ref()
                    .is_some_and(|kinds| kinds.iter().any(|k| k.contains(kind)))
            })
            .or_else(|| self.retention.iter().find(|r| r.kinds.is_none()))
    }
}
