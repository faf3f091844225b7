//! Helpers over the JSON parameter schema advertised for each tool.

use serde_json::{Map, Value};

/// Names listed under `required` in an object schema, in declaration order.
pub fn required_parameters(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// First required parameter that is absent or `null` in `args`.
pub fn first_missing<'a>(schema: &'a Value, args: &Map<String, Value>) -> Option<&'a str> {
    required_parameters(schema)
        .into_iter()
        .find(|name| args.get(*name).map_or(true, Value::is_null))
}

/// Fetch a string argument, treating non-strings as absent.
pub fn str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Fetch a required string argument or fail with the parameter name.
pub fn require_str<'a>(args: &'a Value, name: &str) -> anyhow::Result<&'a str> {
    str_arg(args, name)
        .ok_or_else(|| anyhow::anyhow!("parameter '{name}' must be a string"))
}

/// Build a minimal object schema from `(name, type, description)` triples.
pub fn object_schema(properties: &[(&str, &str, &str)], required: &[&str]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(name, kind, description)| {
            (
                (*name).to_string(),
                serde_json::json!({ "type": kind, "description": description }),
            )
        })
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}
