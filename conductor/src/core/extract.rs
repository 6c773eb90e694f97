//! Extraction of structured output from free-form agent text.

use serde_json::{Map, Value};

/// Return the first JSON object embedded in `text`.
///
/// Scans each `{` in order and attempts to parse one JSON value starting there,
/// ignoring anything after it. Prose, markdown fences and trailing commentary
/// around the object are tolerated.
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_object_inside_code_fence() {
        let text = "Here is the plan:\n```json\n{\"project_name\": \"demo\", \"tasks\": []}\n```\nThanks.";
        let obj = first_json_object(text).expect("object");
        assert_eq!(obj["project_name"], "demo");
    }

    #[test]
    fn skips_unbalanced_brace_before_real_object() {
        let text = "use {braces} carefully {\"a\": {\"b\": 1}} and {\"c\": 2}";
        let obj = first_json_object(text).expect("object");
        assert_eq!(obj["a"]["b"], 1);
        assert!(!obj.contains_key("c"));
    }

    #[test]
    fn returns_none_without_object() {
        assert!(first_json_object("no json here").is_none());
        assert!(first_json_object("[1, 2, 3]").is_none());
        assert!(first_json_object("{broken").is_none());
    }
}
