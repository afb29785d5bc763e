use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// normalize a URL and replace http://, https:// schemes with ws://, wss://
pub fn normalize_url(url_str: &str) -> Result<Url, url::ParseError> {
    let url_str = match url_str.split_once("://") {
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("wss") || scheme.eq_ignore_ascii_case("ws") => {
            url_str.to_string()
        }
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("http") => {
            format!("ws{}", &url_str[4..])
        }
        _ => {
            if url_str.starts_with("localhost")
                || url_str.contains(".localhost")
                || url_str.starts_with("127.0.0.1")
            {
                format!("ws://{}", url_str)
            } else {
                format!("wss://{}", url_str)
            }
        }
    };
    let mut url = Url::parse(&url_str)?;

    // normalize host to lowercase
    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        let _ = url.set_host(Some(&host));
    }

    // remove trailing slash from path
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&path);

    Ok(url)
}

/// the standardized prefixes of OK and CLOSED reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineReadablePrefix {
    Duplicate,
    Pow,
    Blocked,
    RateLimited,
    Invalid,
    Error,
    AuthRequired,
    Restricted,
}

impl MachineReadablePrefix {
    pub const ALL: [MachineReadablePrefix; 8] = [
        MachineReadablePrefix::Duplicate,
        MachineReadablePrefix::Pow,
        MachineReadablePrefix::Blocked,
        MachineReadablePrefix::RateLimited,
        MachineReadablePrefix::Invalid,
        MachineReadablePrefix::Error,
        MachineReadablePrefix::AuthRequired,
        MachineReadablePrefix::Restricted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineReadablePrefix::Duplicate => "duplicate",
            MachineReadablePrefix::Pow => "pow",
            MachineReadablePrefix::Blocked => "blocked",
            MachineReadablePrefix::RateLimited => "rate-limited",
            MachineReadablePrefix::Invalid => "invalid",
            MachineReadablePrefix::Error => "error",
            MachineReadablePrefix::AuthRequired => "auth-required",
            MachineReadablePrefix::Restricted => "restricted",
        }
    }

    /// attach a detail, `"<prefix>: <detail>"`
    pub fn with(&self, detail: &str) -> String {
        format!("{}: {}", self.as_str(), detail)
    }
}

impl fmt::Display for MachineReadablePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineReadablePrefix {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or(())
    }
}

/// the message of an OK or CLOSED, split into its prefix when it has a known one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonMessage {
    Prefixed {
        prefix: MachineReadablePrefix,
        detail: String,
    },
    Opaque(String),
}

impl ReasonMessage {
    pub fn parse(message: &str) -> Self {
        if let Some((head, rest)) = message.split_once(':') {
            if let Ok(prefix) = head.parse() {
                return ReasonMessage::Prefixed {
                    prefix,
                    detail: rest.trim_start().to_string(),
                };
            }
        }
        ReasonMessage::Opaque(message.to_string())
    }

    pub fn prefix(&self) -> Option<MachineReadablePrefix> {
        match self {
            ReasonMessage::Prefixed { prefix, .. } => Some(*prefix),
            ReasonMessage::Opaque(_) => None,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ReasonMessage::Prefixed { detail, .. } => detail,
            ReasonMessage::Opaque(message) => message,
        }
    }
}

impl fmt::Display for ReasonMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonMessage::Prefixed { prefix, detail } => write!(f, "{}: {}", prefix, detail),
            ReasonMessage::Opaque(message) => f.write_str(message),
        }
    }
}

/// normalize OK message with prefix
pub fn normalize_ok_message(reason: &str, prefix: MachineReadablePrefix) -> String {
    if let Some(colon_pos) = reason.find(": ") {
        let before_colon = &reason[..colon_pos];
        if !before_colon.contains(' ') {
            return reason.to_string();
        }
    }
    prefix.with(reason)
}
