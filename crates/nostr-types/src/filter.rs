use crate::event::{EventId, NostrEvent, PubKey};
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// A single REQ filter (spec.md §3). Tag filters (`#e`, `#p`, …) arrive as
/// top-level `#<tagname>` keys on the wire and are collected into `tags`
/// keyed by the bare tag name (without the `#`); `Serialize`/`Deserialize`
/// are implemented by hand below since serde's derive has no way to capture
/// an open-ended set of top-level keys into one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NostrFilter {
    pub ids: Option<Vec<EventId>>,
    pub authors: Option<Vec<PubKey>>,
    pub kinds: Option<Vec<i32>>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub tags: HashMap<String, Vec<String>>,
}

impl Serialize for NostrFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        if let Some(since) = &self.since {
            map.serialize_entry("since", since)?;
        }
        if let Some(until) = &self.until {
            map.serialize_entry("until", until)?;
        }
        if let Some(limit) = &self.limit {
            map.serialize_entry("limit", limit)?;
        }
        for (tag_name, values) in &self.tags {
            map.serialize_entry(&format!("#{tag_name}"), values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NostrFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| DeError::custom("filter must be a JSON object"))?;

        let mut filter = NostrFilter::default();
        for (key, field_value) in object {
            match key.as_str() {
                "ids" => {
                    filter.ids = Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                "authors" => {
                    filter.authors =
                        Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                "kinds" => {
                    filter.kinds = Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                "since" => {
                    filter.since = Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                "until" => {
                    filter.until = Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                "limit" => {
                    filter.limit = Some(serde_json::from_value(field_value.clone()).map_err(DeError::custom)?)
                }
                _ if key.len() > 1 && key.starts_with('#') => {
                    let values: Vec<String> =
                        serde_json::from_value(field_value.clone()).map_err(DeError::custom)?;
                    filter.tags.insert(key[1..].to_string(), values);
                }
                // Unrecognized top-level keys are ignored rather than rejected,
                // so a future field addition on the wire doesn't break old relays.
                _ => {}
            }
        }
        Ok(filter)
    }
}

impl NostrFilter {
    /// An event matches a filter iff every specified field is satisfied
    /// (spec.md §3: conjunction within one filter).
    pub fn matches(&self, event: &NostrEvent) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
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
        for (tag_name, wanted_values) in &self.tags {
            let has_match = event.tags.iter().any(|t| {
                t.first().map(String::as_str) == Some(tag_name.as_str())
                    && t.len() > 1
                    && wanted_values.iter().any(|v| v == &t[1])
            });
            if !has_match {
                return false;
            }
        }
        true
    }

    /// Validates the bounds spec.md §4.12 places on a REQ filter:
    /// `0 <= limit <= 5000`, `since >= 0`, `until >= 0`, `since <= until`.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(limit) = self.limit {
            if limit > 5000 {
                return Err("limit too large (max 5000)".to_string());
            }
        }
        if let Some(since) = self.since {
            if since < 0 {
                return Err("since must be non-negative".to_string());
            }
        }
        if let Some(until) = self.until {
            if until < 0 {
                return Err("until must be non-negative".to_string());
            }
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err("since must be <= until".to_string());
            }
        }
        Ok(())
    }

    /// An event matches a REQ (a set of filters) iff it matches at least one
    /// filter (spec.md §3: union across filters).
    pub fn any_matches(filters: &[NostrFilter], event: &NostrEvent) -> bool {
        filters.iter().any(|f| f.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Signature};

    fn event(id: &str, pubkey: &str, created_at: i64, kind: i32, tags: Vec<Vec<String>>) -> NostrEvent {
        NostrEvent {
            id: EventId::from_hex(id).unwrap(),
            pubkey: PubKey::from_hex(pubkey).unwrap(),
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: Signature([0u8; 64]),
        }
    }

    const ID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn empty_filter_matches_everything() {
        let e = event(ID_A, "22222222222222222222222222222222222222222222222222222222222222", 1, 1, vec![]);
        assert!(NostrFilter::default().matches(&e));
    }

    #[test]
    fn kinds_filter_excludes_non_matching_kind() {
        let e = event(ID_A, "22222222222222222222222222222222222222222222222222222222222222", 1, 1, vec![]);
        let f = NostrFilter {
            kinds: Some(vec![2]),
            ..Default::default()
        };
        assert!(!f.matches(&e));
    }

    #[test]
    fn since_until_bounds_are_inclusive() {
        let e = event(ID_A, "22222222222222222222222222222222222222222222222222222222222222", 100, 1, vec![]);
        let f = NostrFilter {
            since: Some(100),
            until: Some(100),
            ..Default::default()
        };
        assert!(f.matches(&e));
    }

    #[test]
    fn tag_filter_requires_matching_value() {
        let tags = vec![vec!["e".to_string(), "deadbeef".to_string()]];
        let e = event(ID_A, "22222222222222222222222222222222222222222222222222222222222222", 1, 1, tags);
        let mut wanted = HashMap::new();
        wanted.insert("e".to_string(), vec!["deadbeef".to_string()]);
        let f = NostrFilter {
            tags: wanted,
            ..Default::default()
        };
        assert!(f.matches(&e));

        let mut wanted_miss = HashMap::new();
        wanted_miss.insert("e".to_string(), vec!["cafebabe".to_string()]);
        let f_miss = NostrFilter {
            tags: wanted_miss,
            ..Default::default()
        };
        assert!(!f_miss.matches(&e));
    }

    #[test]
    fn union_across_filters_matches_if_any_matches() {
        let e = event(ID_A, "22222222222222222222222222222222222222222222222222222222222222", 1, 5, vec![]);
        let filters = vec![
            NostrFilter {
                kinds: Some(vec![1]),
                ..Default::default()
            },
            NostrFilter {
                kinds: Some(vec![5]),
                ..Default::default()
            },
        ];
        assert!(NostrFilter::any_matches(&filters, &e));
    }

    #[test]
    fn validate_rejects_limit_above_5000() {
        let f = NostrFilter {
            limit: Some(10_000),
            ..Default::default()
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn validate_rejects_since_after_until() {
        let f = NostrFilter {
            since: Some(10),
            until: Some(5),
            ..Default::default()
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn deserializes_hash_tag_keys_from_wire_json() {
        let e = event(
            ID_A,
            "22222222222222222222222222222222222222222222222222222222222222",
            1,
            1,
            vec![vec!["e".to_string(), "deadbeef".to_string()]],
        );
        let other = event(
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "22222222222222222222222222222222222222222222222222222222222222",
            1,
            1,
            vec![vec!["e".to_string(), "cafebabe".to_string()]],
        );

        let filter: NostrFilter =
            serde_json::from_str(r#"{"kinds":[1],"#e":["deadbeef"]}"#).unwrap();
        assert_eq!(filter.kinds, Some(vec![1]));
        assert_eq!(filter.tags.get("e"), Some(&vec!["deadbeef".to_string()]));
        assert!(filter.matches(&e));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn serialize_round_trips_hash_tag_keys() {
        let mut tags = HashMap::new();
        tags.insert("p".to_string(), vec!["abc".to_string()]);
        let filter = NostrFilter {
            kinds: Some(vec![1]),
            tags,
            ..Default::default()
        };

        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            value.get("#p").and_then(|v| v.as_array()),
            Some(&vec![serde_json::json!("abc")])
        );
        assert!(value.get("tags").is_none());

        let round_tripped: NostrFilter = serde_json::from_value(value).unwrap();
        assert_eq!(round_tripped.tags, filter.tags);
    }
}
