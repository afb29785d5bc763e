use crate::{Event, TagMap, Tags};

/// tag name -> the second element of every tag with that name, in order
///
/// derived from an event's tags and thrown away after matching. tags without a
/// value are skipped, positions past the second are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex(TagMap);

impl TagIndex {
    pub fn build(event: &Event) -> Self {
        Self::from_tags(&event.tags)
    }

    pub fn from_tags(tags: &Tags) -> Self {
        let mut map = TagMap::new();
        for tag in tags.iter().filter(|tag| tag.len() >= 2) {
            map.entry(tag[0].clone()).or_default().push(tag[1].clone());
        }
        Self(map)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// whether any value indexed under `name` is among `wanted`
    pub fn intersects(&self, name: &str, wanted: &[String]) -> bool {
        self.values(name).iter().any(|value| wanted.contains(value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_map(self) -> TagMap {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_preserves_order_and_duplicates() {
        let tags = Tags::new()
            .with(["e", "A", "wss://r", "root"])
            .with(["p", "P"])
            .with(["e", "B"])
            .with(["e", "A"])
            .with(["x"]);

        let index = TagIndex::from_tags(&tags);
        assert_eq!(index.values("e"), ["A", "B", "A"]);
        assert_eq!(index.values("p"), ["P"]);
        assert!(index.values("x").is_empty());
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["e", "p"]);
    }

    #[test]
    fn test_intersects() {
        let index = TagIndex::from_tags(&Tags::new().with(["t", "nostr"]).with(["t", "rust"]));

        assert!(index.intersects("t", &["rust".to_string(), "go".to_string()]));
        assert!(!index.intersects("t", &["go".to_string()]));
        assert!(!index.intersects("t", &[]));
        assert!(!index.intersects("e", &["nostr".to_string()]));
    }
}
