// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Best-effort recovery of tool calls from `tool_use_failed` payloads.
//!
//! Some providers reject a malformed native tool call but hand back the raw
//! generation in a `failed_generation` field.  Three shapes show up in the
//! wild, tried in order:
//!
//! 1. `<function=NAME {"arg": …}>` / `<function=NAME>{…}</function>` wrappers
//!    (Hermes-style function tags),
//! 2. a JSON object with `tool` / `name` / `function.name` naming the tool
//!    and `arguments` / `args` / `input` carrying the arguments,
//! 3. the same object buried in prose (handled by the recovery parser's
//!    balanced-object extraction).
//!
//! When nothing decodes, the adapter's last resort is retrying the chat call
//! once with tools stripped — that lives in the adapter, not here.

use serde_json::Value;

use covey_runtime::json::parse_json_with_recovery;

use crate::types::ToolCallRequest;

/// Try to decode tool calls out of a `failed_generation` string.
/// Returns an empty vec when no shape matches.
pub fn recover_tool_calls(failed_generation: &str) -> Vec<ToolCallRequest> {
    if let Some(calls) = parse_function_tags(failed_generation) {
        return calls;
    }
    if let Some(call) = parse_object_form(failed_generation) {
        return vec![call];
    }
    Vec::new()
}

/// Shape 1: `<function=NAME …>` wrappers.  Multiple wrappers may appear in
/// one generation; each becomes its own call.
fn parse_function_tags(text: &str) -> Option<Vec<ToolCallRequest>> {
    let tag = regex::Regex::new(r"<function=([A-Za-z_][A-Za-z0-9_\-.]*)").expect("static regex");
    let mut calls = Vec::new();
    for (i, caps) in tag.captures_iter(text).enumerate() {
        let name = caps[1].to_string();
        let rest = &text[caps.get(0).expect("whole match").end()..];
        // Arguments are whatever JSON object follows the tag, if any.
        let arguments = parse_json_with_recovery(rest)
            .filter(Value::is_object)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());
        calls.push(ToolCallRequest {
            id: format!("recovered_call_{}", i + 1),
            name,
            arguments,
        });
    }
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Shapes 2 + 3: a JSON object naming the tool.  Balanced-object extraction
/// inside the recovery parser covers the prose-wrapped case.
fn parse_object_form(text: &str) -> Option<ToolCallRequest> {
    let value = parse_json_with_recovery(text)?;
    let obj = value.as_object()?;

    let name = obj
        .get("tool")
        .and_then(Value::as_str)
        .or_else(|| obj.get("name").and_then(Value::as_str))
        .or_else(|| {
            obj.get("function")
                .and_then(Value::as_object)
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
        })?
        .to_string();

    let args = obj
        .get("arguments")
        .or_else(|| obj.get("args"))
        .or_else(|| obj.get("input"))
        .or_else(|| {
            obj.get("function")
                .and_then(Value::as_object)
                .and_then(|f| f.get("arguments"))
        });

    let arguments = match args {
        Some(v @ Value::Object(_)) => v.to_string(),
        // Arguments serialized as a string: keep the text if it decodes to
        // an object, otherwise fall back to empty.
        Some(Value::String(s)) => parse_json_with_recovery(s)
            .filter(Value::is_object)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string()),
        _ => "{}".to_string(),
    };

    Some(ToolCallRequest {
        id: "recovered_call_1".to_string(),
        name,
        arguments,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
