//! Pull a JSON object out of free-form model output.
//!
//! Models asked for JSON still wrap it in code fences, prefix it with
//! reasoning text, or leave trailing commas. [`extract_object`] tolerates
//! all three.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationError;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```").unwrap());

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Extract and parse the first balanced JSON object in `text`.
pub fn extract_object(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let text = text.trim();
    let text = FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text);

    let start = text.find('{').ok_or(ValidationError::NoJsonObject)?;
    let candidate = balanced_object(&text[start..])
        .ok_or_else(|| ValidationError::MalformedJson("unterminated object".into()))?;
    let cleaned = TRAILING_COMMA.replace_all(candidate, "$1");

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::NotAnObject),
        Err(e) => Err(ValidationError::MalformedJson(e.to_string())),
    }
}

/// Slice of `text` (which starts at `{`) up to the matching `}`. Braces
/// inside string literals do not count.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let map = extract_object(r#"{"is_relevant": true}"#).unwrap();
        assert_eq!(map["is_relevant"], Value::Bool(true));
    }

    #[test]
    fn test_leading_reasoning_and_trailing_text() {
        let text = "Let me think. The post is about a scam.\n{\"a\": 1, \"b\": {\"c\": 2}} hope this helps {\"x\": 0}";
        let map = extract_object(text).unwrap();
        assert_eq!(map["a"], 1);
        assert!(!map.contains_key("x"));
    }

    #[test]
    fn test_code_fence() {
        let text = "Here you go:\n```json\n{\"tags\": [\"a\", \"b\"]}\n```";
        let map = extract_object(text).unwrap();
        assert_eq!(map["tags"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_trailing_commas() {
        let map = extract_object("{\"tags\": [\"a\", \"b\",], \"n\": 1,\n}").unwrap();
        assert_eq!(map["n"], 1);
    }

    #[test]
    fn test_braces_inside_strings() {
        let map = extract_object(r#"{"quote": "they said \"}\" then {left}", "ok": true}"#).unwrap();
        assert_eq!(map["ok"], true);
    }

    #[test]
    fn test_failures() {
        assert!(matches!(extract_object("no json here"), Err(ValidationError::NoJsonObject)));
        assert!(matches!(
            extract_object("{\"a\": 1"),
            Err(ValidationError::MalformedJson(_))
        ));
        assert!(matches!(
            extract_object("{a: 1}"),
            Err(ValidationError::MalformedJson(_))
        ));
    }
}
