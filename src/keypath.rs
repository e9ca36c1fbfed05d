//! Field-key paths
//!
//! A field key is a dot-delimited path (`a.b.c`). The first segment is the
//! *main key*: the unit loaders, inputs and rule declarations are indexed
//! by. Later segments walk into the loaded value; a numeric segment
//! indexes an array, a `*` segment stands for "every element here" and is
//! only legal on rule paths.

use serde_json::Value;

/// A parsed field-key segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object field access: `.field`
    Field(String),
    /// Array index access: `.0`
    Index(usize),
    /// Collection expansion: `.*` (rule paths only)
    Wildcard,
}

/// The first segment of a key
pub fn main_key(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

/// Proper prefixes of a key, shortest first: `a.b.c` -> `["a", "a.b"]`
pub fn ancestors(key: &str) -> Vec<String> {
    let segs: Vec<&str> = key.split('.').collect();
    (1..segs.len()).map(|i| segs[..i].join(".")).collect()
}

/// Whether any segment of the key is a wildcard
pub fn has_wildcard(key: &str) -> bool {
    parse(key)
        .iter()
        .any(|seg| matches!(seg, Segment::Wildcard))
}

/// Parse a key into typed segments
pub fn parse(key: &str) -> Vec<Segment> {
    key.split('.')
        .map(|seg| {
            if seg == "*" {
                Segment::Wildcard
            } else if let Ok(index) = seg.parse::<usize>() {
                Segment::Index(index)
            } else {
                Segment::Field(seg.to_string())
            }
        })
        .collect()
}

/// Step from a value into one typed segment. Index segments also match
/// numeric object keys.
pub fn child<'v>(value: &'v Value, seg: &Segment) -> Option<&'v Value> {
    match (value, seg) {
        (Value::Object(map), Segment::Field(name)) => map.get(name),
        (Value::Object(map), Segment::Index(index)) => map.get(&index.to_string()),
        (Value::Array(items), Segment::Index(index)) => items.get(*index),
        _ => None,
    }
}

/// Walk a dotted key down a value tree
pub fn get_in<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    let mut current = value;
    for seg in parse(key) {
        current = child(current, &seg)?;
    }
    Some(current)
}

/// Whether the full path exists in the value tree
pub fn has_in(value: &Value, key: &str) -> bool {
    get_in(value, key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn main_key_is_first_segment() {
        assert_eq!(main_key("result.a.b"), "result");
        assert_eq!(main_key("result"), "result");
    }

    #[test]
    fn ancestors_shortest_first() {
        assert_eq!(ancestors("a.b.c"), vec!["a".to_string(), "a.b".to_string()]);
        assert!(ancestors("a").is_empty());
    }

    #[test]
    fn parse_typed_segments() {
        assert_eq!(
            parse("items.0.*"),
            vec![
                Segment::Field("items".to_string()),
                Segment::Index(0),
                Segment::Wildcard,
            ]
        );
    }

    #[test]
    fn wildcard_detection() {
        assert!(has_wildcard("result.*"));
        assert!(has_wildcard("result.*.name"));
        assert!(!has_wildcard("result.star"));
    }

    #[test]
    fn get_in_walks_objects() {
        let value = json!({"a": {"b": "value"}});
        assert_eq!(get_in(&value, "a.b"), Some(&json!("value")));
        assert_eq!(get_in(&value, "a.c"), None);
    }

    #[test]
    fn get_in_indexes_arrays() {
        let value = json!({"items": ["first", "second"]});
        assert_eq!(get_in(&value, "items.1"), Some(&json!("second")));
        assert_eq!(get_in(&value, "items.2"), None);
    }

    #[test]
    fn get_in_rejects_wildcard_segments() {
        let value = json!({"a": {"b": 1}});
        assert!(get_in(&value, "a.*").is_none());
    }

    #[test]
    fn get_in_stops_on_scalars() {
        let value = json!({"a": "scalar"});
        assert!(!has_in(&value, "a.b"));
        assert!(has_in(&value, "a"));
    }
}
