use crate::helpers::is_lower_hex;
use crate::normalize::MachineReadablePrefix;
use crate::relay_information::Limitation;
use crate::tag_index::TagIndex;
use crate::{Event, Kind, TagMap, Timestamp};
use std::cmp::Reverse;
use thiserror::Error;

/// subscription ids longer than this are refused when the relay declares no cap
pub const DEFAULT_MAX_SUBID_LENGTH: usize = 64;

/// a subscription filter
///
/// every present constraint must hold (AND), any value inside a constraint may
/// satisfy it (OR). a constraint given as an empty list can never be satisfied.
/// `tags` is keyed by the tag name without the leading `#`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<Kind>>,
    pub tags: TagMap,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
    pub search: Option<String>,
}

/// full-text matching for the `search` field, supplied by whoever has an index
pub trait SearchMatcher: Send + Sync {
    fn matches(&self, query: &str, event: &Event) -> bool;
}

impl<F> SearchMatcher for F
where
    F: Fn(&str, &Event) -> bool + Send + Sync,
{
    fn matches(&self, query: &str, event: &Event) -> bool {
        self(query, event)
    }
}

/// a filter or request a relay refuses to serve
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{prefix}: {message}")]
pub struct FilterRejected {
    pub prefix: MachineReadablePrefix,
    pub message: String,
}

impl FilterRejected {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            prefix: MachineReadablePrefix::Invalid,
            message: message.into(),
        }
    }

    fn restricted(message: impl Into<String>) -> Self {
        Self {
            prefix: MachineReadablePrefix::Restricted,
            message: message.into(),
        }
    }
}

impl serde::Serialize for Filter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        use serde::ser::SerializeMap;
        let len = [
            self.ids.is_some(),
            self.authors.is_some(),
            self.kinds.is_some(),
            self.since.is_some(),
            self.until.is_some(),
            self.limit.is_some(),
            self.search.is_some(),
        ]
        .iter()
        .filter(|v| **v)
        .count()
            + self.tags.len();

        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(ref ids) = self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(ref authors) = self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(ref kinds) = self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        if let Some(s) = self.since {
            map.serialize_entry("since", &s)?;
        }
        if let Some(u) = self.until {
            map.serialize_entry("until", &u)?;
        }
        if let Some(l) = self.limit {
            map.serialize_entry("limit", &l)?;
        }
        if let Some(s) = &self.search {
            map.serialize_entry("search", s)?;
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct FilterVisitor;
        impl<'v> serde::de::Visitor<'v> for FilterVisitor {
            type Value = Filter;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "a Nostr filter object")
            }
            fn visit_map<M>(self, mut map: M) -> Result<Filter, M::Error>
            where
                M: serde::de::MapAccess<'v>,
            {
                let mut filter = Filter::default();

                // explicit nulls are treated as absent
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "ids" => filter.ids = map.next_value()?,
                        "authors" => filter.authors = map.next_value()?,
                        "kinds" => filter.kinds = map.next_value()?,
                        "since" => filter.since = map.next_value()?,
                        "until" => filter.until = map.next_value()?,
                        "limit" => filter.limit = map.next_value()?,
                        "search" => filter.search = map.next_value()?,
                        // a bare "#" queries the tag whose name is empty
                        k if k.starts_with('#') => {
                            let values: Vec<String> = map.next_value()?;
                            filter.tags.insert(k[1..].to_string(), values);
                        }
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(filter)
            }
        }
        deserializer.deserialize_map(FilterVisitor)
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// constrain on a tag; `name` is given without the leading `#`
    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.tags.is_empty() {
            return self.matches_fields(event) && self.matches_time(event);
        }
        self.matches_indexed(event, &TagIndex::build(event))
    }

    /// like [`Filter::matches`] with an index that was already built for `event`
    pub fn matches_indexed(&self, event: &Event, index: &TagIndex) -> bool {
        self.matches_fields(event) && self.matches_time(event) && self.matches_tags(index)
    }

    /// everything but `since` and `until`, for events arriving after EOSE
    pub fn matches_except_time(&self, event: &Event) -> bool {
        self.matches_fields(event)
            && (self.tags.is_empty() || self.matches_tags(&TagIndex::build(event)))
    }

    /// [`Filter::matches`] plus the `search` constraint when one is present
    pub fn matches_with_search(&self, event: &Event, search: &dyn SearchMatcher) -> bool {
        if !self.matches(event) {
            return false;
        }
        match &self.search {
            Some(query) => search.matches(query, event),
            None => true,
        }
    }

    fn matches_fields(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.iter().any(|prefix| event.id.has_prefix(prefix)) {
                return false;
            }
        }

        if let Some(ref authors) = self.authors {
            if !authors.iter().any(|prefix| event.pubkey.has_prefix(prefix)) {
                return false;
            }
        }

        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        true
    }

    fn matches_time(&self, event: &Event) -> bool {
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }

        true
    }

    fn matches_tags(&self, index: &TagIndex) -> bool {
        self.tags
            .iter()
            .all(|(name, values)| index.intersects(name, values))
    }

    /// the matching events a relay returns for this filter: newest first,
    /// equal timestamps by ascending id, at most `limit` of them
    pub fn select<'a, I>(&self, events: I) -> Vec<&'a Event>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut selected: Vec<&Event> = events.into_iter().filter(|e| self.matches(e)).collect();
        selected.sort_by_key(|e| (Reverse(e.created_at), e.id));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// check this filter against what a relay declared it is willing to serve
    pub fn validate(&self, limits: &Limitation) -> Result<(), FilterRejected> {
        for (field, prefixes) in [("ids", &self.ids), ("authors", &self.authors)] {
            let Some(prefixes) = prefixes else { continue };
            for prefix in prefixes {
                if prefix.is_empty() || prefix.len() > 64 || !is_lower_hex(prefix) {
                    return Err(FilterRejected::invalid(format!(
                        "{field} must be lowercase hex prefixes"
                    )));
                }
                if let Some(min) = limits.min_prefix {
                    if prefix.len() < min {
                        return Err(FilterRejected::restricted(format!(
                            "{field} prefixes must be at least {min} characters"
                        )));
                    }
                }
            }
        }

        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(FilterRejected::invalid("since is after until"));
            }
        }

        if let (Some(limit), Some(max)) = (self.limit, limits.max_limit) {
            if limit > max {
                return Err(FilterRejected::restricted(format!(
                    "limit {limit} exceeds maximum of {max}"
                )));
            }
        }

        Ok(())
    }
}

/// OR across filters; no filters match nothing
pub fn matches_any(event: &Event, filters: &[Filter]) -> bool {
    if filters.iter().all(|f| f.tags.is_empty()) {
        return filters.iter().any(|f| f.matches(event));
    }
    let index = TagIndex::build(event);
    filters.iter().any(|f| f.matches_indexed(event, &index))
}

/// check a whole REQ/COUNT before any of it is served
pub fn validate_request(
    sub_id: &str,
    filters: &[Filter],
    limits: &Limitation,
) -> Result<(), FilterRejected> {
    if sub_id.is_empty() {
        return Err(FilterRejected::invalid("subscription id must not be empty"));
    }

    let max_subid = limits.max_subid_length.unwrap_or(DEFAULT_MAX_SUBID_LENGTH);
    if sub_id.chars().count() > max_subid {
        return Err(FilterRejected::invalid(format!(
            "subscription id longer than {max_subid} characters"
        )));
    }

    if filters.is_empty() {
        return Err(FilterRejected::invalid("at least one filter is required"));
    }

    if let Some(max) = limits.max_filters {
        if filters.len() > max {
            return Err(FilterRejected::restricted(format!(
                "too many filters, maximum is {max}"
            )));
        }
    }

    filters.iter().try_for_each(|filter| filter.validate(limits))
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "Filter"),
        }
    }
}
