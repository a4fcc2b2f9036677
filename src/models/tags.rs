//! OSM tag filters used to select which features are retrieved.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Accepted values for a single tag key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTagValues", into = "RawTagValues")]
pub enum TagValues {
    /// The tag only has to be present (`{"building": true}`)
    Any,
    /// The tag value must be one of these
    Values(BTreeSet<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTagValues {
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawTagValues> for TagValues {
    type Error = String;

    fn try_from(raw: RawTagValues) -> Result<Self, Self::Error> {
        match raw {
            RawTagValues::Flag(true) => Ok(TagValues::Any),
            RawTagValues::Flag(false) => Err("a tag filter value of `false` matches nothing".into()),
            RawTagValues::One(v) => Ok(TagValues::Values(BTreeSet::from([v]))),
            RawTagValues::Many(vs) if vs.is_empty() => {
                Err("a tag filter needs at least one value".into())
            }
            RawTagValues::Many(vs) => Ok(TagValues::Values(vs.into_iter().collect())),
        }
    }
}

impl From<TagValues> for RawTagValues {
    fn from(values: TagValues) -> Self {
        match values {
            TagValues::Any => RawTagValues::Flag(true),
            TagValues::Values(vs) => RawTagValues::Many(vs.into_iter().collect()),
        }
    }
}

impl TagValues {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            TagValues::Any => true,
            TagValues::Values(vs) => vs.contains(value),
        }
    }
}

/// Mapping of tag key → accepted values.
///
/// A feature matches when any one of the keys matches (union, like an
/// Overpass query with one statement per key).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilter(BTreeMap<String, TagValues>);

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default restaurant-style amenities
    pub fn gastronomy() -> Self {
        let mut filter = Self::new();
        filter.insert_values(
            "amenity",
            ["restaurant", "cafe", "fast_food", "bar", "pub", "ice_cream"],
        );
        filter
    }

    pub fn insert_any(&mut self, key: impl Into<String>) {
        self.0.insert(key.into(), TagValues::Any);
    }

    pub fn insert_values<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let new_values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        match self.0.get_mut(&key) {
            Some(TagValues::Any) => {}
            Some(TagValues::Values(existing)) => existing.extend(new_values),
            None => {
                self.0.insert(key, TagValues::Values(new_values));
            }
        }
    }

    /// Parse a `key=v1,v2` (or bare `key`) command line filter into this map
    pub fn insert_expr(&mut self, expr: &str) -> Result<(), String> {
        match expr.split_once('=') {
            None => {
                let key = expr.trim();
                if key.is_empty() {
                    return Err("empty tag filter".to_string());
                }
                self.insert_any(key);
            }
            Some((key, values)) => {
                let key = key.trim();
                let values: Vec<&str> = values
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .collect();
                if key.is_empty() || values.is_empty() {
                    return Err(format!("invalid tag filter '{}'", expr));
                }
                self.insert_values(key, values);
            }
        }
        Ok(())
    }

    /// Check a feature's tags, looked up through `get`
    pub fn matches<'a, F>(&self, get: F) -> bool
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        self.0
            .iter()
            .any(|(key, values)| get(key).map(|v| values.matches(v)).unwrap_or(false))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValues)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_deserialize_mixed_forms() {
        let filter: TagFilter = serde_json::from_str(
            r#"{"amenity": ["restaurant", "cafe"], "building": true, "shop": "bakery"}"#,
        )
        .unwrap();

        let tags = HashMap::from([("shop", "bakery")]);
        assert!(filter.matches(|k| tags.get(k).copied()));

        let tags = HashMap::from([("building", "yes")]);
        assert!(filter.matches(|k| tags.get(k).copied()));

        let tags = HashMap::from([("amenity", "bank")]);
        assert!(!filter.matches(|k| tags.get(k).copied()));
    }

    #[test]
    fn test_false_flag_rejected() {
        let parsed: Result<TagFilter, _> = serde_json::from_str(r#"{"building": false}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_insert_expr() {
        let mut filter = TagFilter::new();
        filter.insert_expr("amenity=cafe, bar").unwrap();
        filter.insert_expr("amenity=pub").unwrap();
        filter.insert_expr("leisure").unwrap();

        let values: Vec<_> = filter.iter().collect();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0].1,
            &TagValues::Values(BTreeSet::from(["bar".into(), "cafe".into(), "pub".into()]))
        );
        assert_eq!(values[1].1, &TagValues::Any);
        assert!(filter.insert_expr("=x").is_err());
    }
}
