//! Strict-mode JSON schemas derived from Rust types.
//!
//! Strict structured output only accepts a subset of JSON Schema: every
//! object must close itself with `additionalProperties: false`, list every
//! property as required, and carry no `$ref` indirection. `schemars` emits
//! none of that on its own, so [`StructuredOutput::strict_schema`] rewrites
//! its output into the accepted shape.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::types::JsonSchemaFormat;

/// Types that can be requested as strict structured output.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Schema for this type in strict-mode form.
    fn strict_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = match &mut root {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("definitions")
            }
            _ => None,
        };

        if let Some(Value::Object(defs)) = definitions {
            resolve_refs(&mut root, &defs);
        }
        seal_objects(&mut root);
        root
    }

    /// `response_format.json_schema` payload named after the type.
    fn response_format() -> JsonSchemaFormat {
        JsonSchemaFormat::strict(<Self as JsonSchema>::schema_name(), Self::strict_schema())
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn resolve_refs(value: &mut Value, defs: &Map<String, Value>) {
    let target = value
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix("#/definitions/"))
        .and_then(|name| defs.get(name))
        .cloned();

    if let Some(def) = target {
        *value = def;
    }

    match value {
        Value::Object(map) => map.values_mut().for_each(|v| resolve_refs(v, defs)),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_refs(v, defs)),
        _ => {}
    }
}

fn seal_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                let required: Vec<Value> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                map.insert("required".into(), Value::Array(required));
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            map.values_mut().for_each(seal_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(seal_objects),
        _ => {}
    }
}
