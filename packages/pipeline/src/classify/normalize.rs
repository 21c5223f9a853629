//! Repairs applied to model output before strict validation.

use serde_json::{Map, Value};

/// Nullable free-text fields.
const NULLABLE_FIELDS: &[&str] = &["notable_quote", "platform_name"];

/// Strings the model uses to mean "no value".
const NULL_SENTINELS: &[&str] = &["null", "none", "n/a", "na", ""];

/// Values models keep producing for one field that belong to another
/// field's vocabulary, and what to store instead.
const REMAPS: &[(&str, &str, &str)] = &[
    ("friction_type", "unknown", "other"),
    ("trigger_reason", "info_mismatch", "unknown"),
];

/// Normalize `map` in place. `enum_fields` names the fields holding
/// closed-enum strings for the track being validated.
pub fn normalize(map: &mut Map<String, Value>, enum_fields: &[&str]) {
    if let Some(Value::String(s)) = map.get("is_relevant") {
        let truthy = matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1");
        map.insert("is_relevant".into(), Value::Bool(truthy));
    }

    for field in NULLABLE_FIELDS {
        if let Some(Value::String(s)) = map.get(*field) {
            if NULL_SENTINELS.contains(&s.trim().to_lowercase().as_str()) {
                map.insert((*field).into(), Value::Null);
            }
        }
    }

    for field in enum_fields {
        if let Some(Value::String(s)) = map.get_mut(*field) {
            *s = enum_label(s);
        }
    }

    for (field, from, to) in REMAPS {
        if map.get(*field).and_then(Value::as_str) == Some(*from) {
            map.insert((*field).into(), Value::String((*to).into()));
        }
    }

    if let Some(tags) = map.get_mut("tags") {
        let normalized: Option<Vec<Value>> = match tags {
            Value::String(s) => Some(s.split(',').filter_map(tag).collect()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => tag(s),
                        other => tag(&other.to_string()),
                    })
                    .collect(),
            ),
            _ => None,
        };
        if let Some(normalized) = normalized {
            *tags = Value::Array(normalized);
        }
    }
}

fn enum_label(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '-'], "_")
}

fn tag(raw: &str) -> Option<Value> {
    let tag = raw.trim().to_lowercase().replace(' ', "_");
    (!tag.is_empty()).then_some(Value::String(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(value: Value, enum_fields: &[&str]) -> Map<String, Value> {
        let mut map = value.as_object().cloned().unwrap();
        normalize(&mut map, enum_fields);
        map
    }

    #[test]
    fn test_string_booleans() {
        assert_eq!(run(json!({"is_relevant": " Yes "}), &[])["is_relevant"], json!(true));
        assert_eq!(run(json!({"is_relevant": "1"}), &[])["is_relevant"], json!(true));
        assert_eq!(run(json!({"is_relevant": "nope"}), &[])["is_relevant"], json!(false));
        assert_eq!(run(json!({"is_relevant": false}), &[])["is_relevant"], json!(false));
    }

    #[test]
    fn test_sentinels_become_null() {
        let map = run(json!({"notable_quote": "N/A", "platform_name": " none "}), &[]);
        assert_eq!(map["notable_quote"], Value::Null);
        assert_eq!(map["platform_name"], Value::Null);

        let map = run(json!({"platform_name": "ID.me"}), &[]);
        assert_eq!(map["platform_name"], json!("ID.me"));
    }

    #[test]
    fn test_enum_case_and_separators() {
        let map = run(json!({"fraud_type": " Romance Scam", "channel": "in-person"}), &["fraud_type", "channel"]);
        assert_eq!(map["fraud_type"], json!("romance_scam"));
        assert_eq!(map["channel"], json!("in_person"));
    }

    #[test]
    fn test_known_remaps() {
        let fields = ["friction_type", "trigger_reason"];
        let map = run(json!({"friction_type": "Unknown", "trigger_reason": "info mismatch"}), &fields);
        assert_eq!(map["friction_type"], json!("other"));
        assert_eq!(map["trigger_reason"], json!("unknown"));
    }

    #[test]
    fn test_tags() {
        let map = run(json!({"tags": "Gig Worker, account_locked, "}), &[]);
        assert_eq!(map["tags"], json!(["gig_worker", "account_locked"]));

        let map = run(json!({"tags": ["Elderly Victim", null, "", 42]}), &[]);
        assert_eq!(map["tags"], json!(["elderly_victim", "42"]));
    }
}
