//! Ordered JSON field lookup
//!
//! Provider payloads put the same datum under different keys depending on
//! the endpoint and notification type. Callers describe where to look as an
//! explicit list of paths; the first path holding a usable value wins.

use serde_json::Value;

/// A path into a JSON document. Numeric segments index arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldPath(pub &'static [&'static str]);

impl FieldPath {
    /// Text at this path: non-blank strings (trimmed) and numbers only
    pub fn lookup(&self, root: &Value) -> Option<String> {
        let mut current = root;
        for segment in self.0 {
            current = match current {
                Value::Object(map) => map.get(*segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match current {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// First rule yielding a value, with the rule that matched
pub fn first_match(rules: &[FieldPath], root: &Value) -> Option<(FieldPath, String)> {
    rules
        .iter()
        .find_map(|rule| rule.lookup(root).map(|value| (*rule, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_and_indexed() {
        let body = json!({
            "data": { "id": 98765, "reference": "  " },
            "errors": [{ "message": "msisdn invalid" }]
        });
        assert_eq!(FieldPath(&["data", "id"]).lookup(&body).as_deref(), Some("98765"));
        assert_eq!(FieldPath(&["data", "reference"]).lookup(&body), None);
        assert_eq!(
            FieldPath(&["errors", "0", "message"]).lookup(&body).as_deref(),
            Some("msisdn invalid")
        );
        assert_eq!(FieldPath(&["data", "id", "deeper"]).lookup(&body), None);
    }

    #[test]
    fn test_first_match_order() {
        const RULES: &[FieldPath] = &[FieldPath(&["a"]), FieldPath(&["b"])];
        let (rule, value) = first_match(RULES, &json!({ "a": "", "b": "second" })).unwrap();
        assert_eq!(rule.to_string(), "b");
        assert_eq!(value, "second");
        assert!(first_match(RULES, &json!({ "c": 1 })).is_none());
    }
}
