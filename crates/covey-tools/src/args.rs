// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool argument decoding, schema validation, and type coercion.
//!
//! Arguments arrive as whatever the model produced: a JSON object, a string
//! that may or may not parse, or nothing.  Decoding is lenient (the recovery
//! parser runs on strings); validation is strict (required keys, closed
//! objects, enum literals) but coercing, because models routinely send
//! `"2"` where the schema says `integer`.

use serde_json::{Map, Value};

use covey_runtime::json::parse_json_with_recovery;

pub const ARGS_MUST_BE_OBJECT: &str = "Tool arguments must decode to a JSON object.";

/// Decode raw call arguments into an object.
///
/// - objects pass through,
/// - strings go through the staged recovery parser,
/// - null / missing becomes the empty object,
/// - anything else fails with [`ARGS_MUST_BE_OBJECT`].
pub fn decode_arguments(raw: &Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(text) => {
            if text.trim().is_empty() {
                return Ok(Map::new());
            }
            match parse_json_with_recovery(text) {
                Some(Value::Object(map)) => Ok(map),
                _ => Err(ARGS_MUST_BE_OBJECT.to_string()),
            }
        }
        _ => Err(ARGS_MUST_BE_OBJECT.to_string()),
    }
}

/// Result of validating arguments against an input schema.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
    pub normalized: Map<String, Value>,
}

/// Validate `args` against a JSON-Schema-flavored `schema`, coercing
/// primitive types where the conversion is unambiguous.
pub fn validate_and_coerce(schema: &Value, args: Map<String, Value>) -> ValidationOutcome {
    let mut errors = Vec::new();
    let normalized = validate_object(schema, args, "", &mut errors);
    ValidationOutcome {
        ok: errors.is_empty(),
        errors,
        normalized,
    }
}

fn validate_object(
    schema: &Value,
    mut args: Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) -> Map<String, Value> {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                errors.push(format!("missing required property '{}'", join(path, key)));
            }
        }
    }

    if schema.get("additionalProperties").and_then(Value::as_bool) == Some(false) {
        if let Some(props) = properties {
            let unknown: Vec<String> = args
                .keys()
                .filter(|k| !props.contains_key(*k))
                .cloned()
                .collect();
            for key in unknown {
                errors.push(format!("unknown property '{}'", join(path, &key)));
                args.remove(&key);
            }
        }
    }

    let Some(props) = properties else {
        return args;
    };

    let mut normalized = Map::new();
    for (key, value) in args {
        let Some(prop_schema) = props.get(&key) else {
            normalized.insert(key, value);
            continue;
        };
        let prop_path = join(path, &key);
        let value = coerce_value(prop_schema, value, &prop_path, errors);
        normalized.insert(key, value);
    }
    normalized
}

fn coerce_value(schema: &Value, value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    let declared = schema.get("type").and_then(Value::as_str);

    let value = match declared {
        Some("number") => coerce_number(value, path, errors),
        Some("integer") => coerce_integer(value, path, errors),
        Some("boolean") => coerce_boolean(value, path, errors),
        Some("string") => {
            if value.is_string() {
                value
            } else {
                errors.push(format!("property '{path}' must be a string"));
                value
            }
        }
        Some("array") => coerce_array(schema, value, path, errors),
        Some("object") => coerce_object(schema, value, path, errors),
        _ => value,
    };

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(&value) {
            errors.push(format!(
                "property '{path}' must be one of {}",
                Value::Array(allowed.clone())
            ));
        }
    }
    value
}

fn coerce_number(value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    match value {
        Value::Number(_) => value,
        Value::String(ref s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(value),
            _ => {
                errors.push(format!("property '{path}' must be a number"));
                value
            }
        },
        other => {
            errors.push(format!("property '{path}' must be a number"));
            other
        }
    }
}

fn coerce_integer(value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    match value {
        Value::Number(ref n) => {
            if n.is_i64() || n.is_u64() {
                value
            } else if let Some(f) = n.as_f64() {
                // A float with no fractional part is an unambiguous integer.
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Value::Number((f as i64).into())
                } else {
                    errors.push(format!("property '{path}' must be an integer"));
                    value
                }
            } else {
                value
            }
        }
        Value::String(ref s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Number(i.into()),
            Err(_) => {
                errors.push(format!("property '{path}' must be an integer"));
                value
            }
        },
        other => {
            errors.push(format!("property '{path}' must be an integer"));
            other
        }
    }
}

fn coerce_boolean(value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    match value {
        Value::Bool(_) => value,
        Value::String(ref s) => match s.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                errors.push(format!("property '{path}' must be a boolean"));
                value
            }
        },
        other => {
            errors.push(format!("property '{path}' must be a boolean"));
            other
        }
    }
}

fn coerce_array(schema: &Value, value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    let value = match value {
        Value::Array(_) => value,
        // Last resort: an array serialized as a string.
        Value::String(ref s) => match parse_json_with_recovery(s) {
            Some(parsed @ Value::Array(_)) => parsed,
            _ => {
                errors.push(format!("property '{path}' must be an array"));
                return value;
            }
        },
        other => {
            errors.push(format!("property '{path}' must be an array"));
            return other;
        }
    };

    let Some(item_schema) = schema.get("items") else {
        return value;
    };
    match value {
        Value::Array(items) => {
            let coerced: Vec<Value> = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| coerce_value(item_schema, item, &format!("{path}[{i}]"), errors))
                .collect();
            Value::Array(coerced)
        }
        other => other,
    }
}

fn coerce_object(schema: &Value, value: Value, path: &str, errors: &mut Vec<String>) -> Value {
    let map = match value {
        Value::Object(map) => map,
        // Last resort: an object serialized as a string.
        Value::String(ref s) => match parse_json_with_recovery(s) {
            Some(Value::Object(map)) => map,
            _ => {
                errors.push(format!("property '{path}' must be an object"));
                return value;
            }
        },
        other => {
            errors.push(format!("property '{path}' must be an object"));
            return other;
        }
    };
    Value::Object(validate_object(schema, map, path, errors))
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

// ─── Call signatures ──────────────────────────────────────────────────────────

/// Serialize a value with object keys sorted lexicographically at every
/// depth, so argument objects that differ only in key order produce the
/// same text.
pub fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        stable_stringify(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", inner.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Duplicate-detection signature for one tool call.
pub fn call_signature(tool_id: &str, args: &Map<String, Value>) -> String {
    format!(
        "{tool_id}:{}",
        stable_stringify(&Value::Object(args.clone()))
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "force": {"type": "boolean"},
                "mode": {"type": "string", "enum": ["fast", "slow"]},
                "tags": {"type": "array", "items": {"type": "string"}},
                "nested": {
                    "type": "object",
                    "properties": {"depth": {"type": "integer"}},
                    "required": ["depth"],
                },
            },
            "required": ["text"],
            "additionalProperties": false,
        })
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    // -- decode --

    #[test]
    fn decode_object_passes_through() {
        let raw = json!({"a": 1});
        assert_eq!(decode_arguments(&raw).unwrap()["a"], 1);
    }

    #[test]
    fn decode_null_becomes_empty_object() {
        assert!(decode_arguments(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn decode_string_parses_json() {
        let raw = Value::String(r#"{"a": 1}"#.into());
        assert_eq!(decode_arguments(&raw).unwrap()["a"], 1);
    }

    #[test]
    fn decode_string_with_recovery() {
        let raw = Value::String("call: {\"a\": \"x\ny\"}".into());
        let map = decode_arguments(&raw).unwrap();
        assert_eq!(map["a"], "x\ny");
    }

    #[test]
    fn decode_empty_string_becomes_empty_object() {
        assert!(decode_arguments(&Value::String("  ".into())).unwrap().is_empty());
    }

    #[test]
    fn decode_array_is_rejected_with_exact_message() {
        let err = decode_arguments(&json!([1, 2])).unwrap_err();
        assert_eq!(err, ARGS_MUST_BE_OBJECT);
    }

    #[test]
    fn decode_garbage_string_is_rejected() {
        let err = decode_arguments(&Value::String("not json at all".into())).unwrap_err();
        assert_eq!(err, ARGS_MUST_BE_OBJECT);
    }

    // -- validation --

    #[test]
    fn missing_required_property_fails() {
        let out = validate_and_coerce(&schema(), obj(json!({"count": 1})));
        assert!(!out.ok);
        assert!(out.errors.iter().any(|e| e.contains("'text'")));
    }

    #[test]
    fn unknown_property_rejected_when_closed() {
        let out = validate_and_coerce(&schema(), obj(json!({"text": "x", "bogus": 1})));
        assert!(!out.ok);
        assert!(out.errors.iter().any(|e| e.contains("unknown property 'bogus'")));
    }

    #[test]
    fn open_schema_keeps_unknown_properties() {
        let open = json!({"type": "object", "properties": {}});
        let out = validate_and_coerce(&open, obj(json!({"extra": 5})));
        assert!(out.ok);
        assert_eq!(out.normalized["extra"], 5);
    }

    #[test]
    fn string_to_integer_coercion() {
        let out = validate_and_coerce(&schema(), obj(json!({"text": "x", "count": "42"})));
        assert!(out.ok, "errors: {:?}", out.errors);
        assert_eq!(out.normalized["count"], 42);
    }

    #[test]
    fn float_with_zero_fraction_coerces_to_integer() {
        let out = validate_and_coerce(&schema(), obj(json!({"text": "x", "count": 3.0})));
        assert!(out.ok);
        assert_eq!(out.normalized["count"], 3);
    }

    #[test]
    fn string_to_number_and_boolean_coercion() {
        let out = validate_and_coerce(
            &schema(),
            obj(json!({"text": "x", "ratio": "0.5", "force": "true"})),
        );
        assert!(out.ok, "errors: {:?}", out.errors);
        assert_eq!(out.normalized["ratio"], 0.5);
        assert_eq!(out.normalized["force"], true);
    }

    #[test]
    fn ambiguous_boolean_string_fails() {
        let out = validate_and_coerce(&schema(), obj(json!({"text": "x", "force": "yes"})));
        assert!(!out.ok);
    }

    #[test]
    fn enum_requires_exact_literal() {
        let ok = validate_and_coerce(&schema(), obj(json!({"text": "x", "mode": "fast"})));
        assert!(ok.ok);
        let bad = validate_and_coerce(&schema(), obj(json!({"text": "x", "mode": "FAST"})));
        assert!(!bad.ok);
    }

    #[test]
    fn array_from_string_last_resort() {
        let out = validate_and_coerce(
            &schema(),
            obj(json!({"text": "x", "tags": "[\"a\", \"b\"]"})),
        );
        assert!(out.ok, "errors: {:?}", out.errors);
        assert_eq!(out.normalized["tags"], json!(["a", "b"]));
    }

    #[test]
    fn nested_object_recursion_checks_required() {
        let out = validate_and_coerce(&schema(), obj(json!({"text": "x", "nested": {}})));
        assert!(!out.ok);
        assert!(out.errors.iter().any(|e| e.contains("nested.depth")));
    }

    #[test]
    fn nested_object_coerces_inner_types() {
        let out = validate_and_coerce(
            &schema(),
            obj(json!({"text": "x", "nested": {"depth": "7"}})),
        );
        assert!(out.ok, "errors: {:?}", out.errors);
        assert_eq!(out.normalized["nested"]["depth"], 7);
    }

    // -- signatures --

    #[test]
    fn stable_stringify_sorts_keys_at_all_depths() {
        let a = json!({"b": 1, "a": {"z": 2, "y": 3}});
        let b = json!({"a": {"y": 3, "z": 2}, "b": 1});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn stable_stringify_preserves_array_order() {
        let a = json!({"k": [1, 2]});
        let b = json!({"k": [2, 1]});
        assert_ne!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn call_signature_is_key_order_insensitive() {
        let a = obj(json!({"x": 1, "y": 2}));
        let b = obj(json!({"y": 2, "x": 1}));
        assert_eq!(call_signature("tool", &a), call_signature("tool", &b));
    }

    #[test]
    fn call_signature_distinguishes_tools_and_args() {
        let args = obj(json!({"x": 1}));
        assert_ne!(call_signature("a", &args), call_signature("b", &args));
        let other = obj(json!({"x": 2}));
        assert_ne!(call_signature("a", &args), call_signature("a", &other));
    }
}
