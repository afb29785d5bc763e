use serde_json::Value;
use url::Url;

use crate::ID;

/// Check if string is lowercase hex
pub fn is_lower_hex(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// check if a URL is a valid relay URL (ws:// or wss://)
pub fn is_valid_relay_url(url_str: &str) -> bool {
    match Url::parse(url_str) {
        Ok(url) => matches!(url.scheme(), "ws" | "wss"),
        Err(_) => false,
    }
}

/// the id claimed by an EVENT message, even when the event itself is unusable
pub fn extract_event_id(json_str: &str) -> Option<ID> {
    let value: Value = serde_json::from_str(json_str).ok()?;
    let items = value.as_array()?;
    if items.first()?.as_str()? != "EVENT" {
        return None;
    }
    let id = items.last()?.get("id")?.as_str()?;
    if is_lower_hex(id) {
        ID::from_hex(id).ok()
    } else {
        None
    }
}
