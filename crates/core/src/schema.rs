//! Minimal JSON-Schema validation for tool arguments.
//!
//! Covers the subset tool schemas actually use: `type` (single or list),
//! `properties`, `required`, `additionalProperties: false`, `enum`, and
//! `items`. Unknown keywords are ignored.

use serde_json::Value;

/// Validate `value` against `schema`.
///
/// Returns a human-readable description of the first violation found,
/// phrased so the model can correct its arguments.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // `true` / `{}` / anything non-object accepts every value
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => vec![],
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            return Err(format!(
                "{path}: expected {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum")
        && !options.contains(value)
    {
        let rendered: Vec<String> = options.iter().map(Value::to_string).collect();
        return Err(format!("{path}: must be one of [{}]", rendered.join(", ")));
    }

    if let Value::Object(map) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(props) = properties {
            for (key, sub_schema) in props {
                if let Some(sub_value) = map.get(key) {
                    validate_at(sub_value, sub_schema, &format!("{path}.{key}"))?;
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in map.keys() {
                if !properties.is_some_and(|p| p.contains_key(key)) {
                    return Err(format!("{path}: unexpected property '{key}'"));
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
