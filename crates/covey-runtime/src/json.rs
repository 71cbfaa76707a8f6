// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON parsing with staged recovery.
//!
//! Model output is JSON-shaped more often than it is JSON.  The same three
//! failure modes show up everywhere model text has to be decoded — tool
//! arguments, director decisions, provider error payloads:
//!
//! 1. raw control characters inside string literals (unescaped newlines),
//! 2. invalid escape sequences (`\c`, `\(`) that are not legal JSON,
//! 3. prose wrapped around an otherwise valid object.
//!
//! [`parse_json_with_recovery`] runs the stages in order: direct parse,
//! escape repair, balanced-object extraction, then escape repair on the
//! extracted object.

use serde_json::{Map, Value};

/// Parse `text` as JSON, applying the staged recovery pipeline on failure.
pub fn parse_json_with_recovery(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let repaired = repair_string_escapes(text);
    if let Ok(v) = serde_json::from_str(&repaired) {
        return Some(v);
    }
    let extracted = extract_first_json_object(text)?;
    if let Ok(v) = serde_json::from_str(extracted) {
        return Some(v);
    }
    let repaired = repair_string_escapes(extracted);
    serde_json::from_str(&repaired).ok()
}

/// Like [`parse_json_with_recovery`] but only accepts a top-level object.
pub fn parse_object_with_recovery(text: &str) -> Option<Map<String, Value>> {
    match parse_json_with_recovery(text)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Return the first balanced `{…}` object in `text`, tracking quoted strings
/// and escape sequences so braces inside string literals do not count.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair string-literal content that breaks the JSON grammar:
/// raw control characters become their escape sequences, and invalid escape
/// sequences (anything but `"\/bfnrtu` after a backslash) get the backslash
/// doubled so the character survives as literal text.
fn repair_string_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = false;
                out.push('"');
            }
            '\\' => match chars.next() {
                Some(next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    out.push('\\');
                    out.push(next);
                }
                Some(next) => {
                    out.push('\\');
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_parse_passes_through() {
        let v = parse_json_with_recovery(r#"{"a": 1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn raw_newline_inside_string_is_repaired() {
        let v = parse_json_with_recovery("{\"text\": \"line one\nline two\"}").unwrap();
        assert_eq!(v["text"], "line one\nline two");
    }

    #[test]
    fn invalid_escape_is_repaired() {
        let v = parse_json_with_recovery(r#"{"path": "C:\code"}"#).unwrap();
        assert_eq!(v["path"], "C:\\code");
    }

    #[test]
    fn object_embedded_in_prose_is_extracted() {
        let text = "Here is the decision:\n{\"status\": \"continue\"}\nThanks!";
        let v = parse_json_with_recovery(text).unwrap();
        assert_eq!(v["status"], "continue");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let text = r#"noise {"cmd": "echo {not a brace}"} trailing"#;
        let extracted = extract_first_json_object(text).unwrap();
        assert_eq!(extracted, r#"{"cmd": "echo {not a brace}"}"#);
    }

    #[test]
    fn nested_objects_extract_the_outer_one() {
        let text = r#"x {"a": {"b": 2}} y"#;
        assert_eq!(extract_first_json_object(text), Some(r#"{"a": {"b": 2}}"#));
    }

    #[test]
    fn extraction_followed_by_escape_repair() {
        let text = "reply: {\"msg\": \"first\nsecond\"} done";
        let v = parse_json_with_recovery(text).unwrap();
        assert_eq!(v["msg"], "first\nsecond");
    }

    #[test]
    fn unbalanced_object_yields_none() {
        assert!(parse_json_with_recovery(r#"{"a": 1"#).is_none());
    }

    #[test]
    fn non_object_rejected_by_object_variant() {
        assert!(parse_object_with_recovery("[1, 2, 3]").is_none());
        assert!(parse_object_with_recovery(r#"{"k": true}"#).is_some());
    }

    #[test]
    fn no_object_at_all_yields_none() {
        assert!(extract_first_json_object("just some text").is_none());
    }
}
