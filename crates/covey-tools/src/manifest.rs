// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider-tool manifest: the bridge between canonical tool ids and the
//! names a provider will accept.
//!
//! Provider APIs constrain function names to `^[A-Za-z_][A-Za-z0-9_]{0,63}$`.
//! Internal tool ids do not (MCP tools are namespaced `mcp:server/tool`), so
//! every declaration gets a sanitized name and the manifest keeps the
//! bidirectional mapping for resolving calls back to tools.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::tool::Tool;

const MAX_PROVIDER_NAME_LEN: usize = 64;
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// A provider-facing tool declaration.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sanitize a raw tool name into the provider-accepted alphabet.
///
/// Idempotent: sanitizing an already-sanitized name returns it unchanged.
pub fn sanitize_provider_tool_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            // Collapse runs of underscores produced by replacement.
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        cleaned.push(mapped);
    }
    let cleaned = cleaned.trim_matches('_');
    let mut name = if cleaned.is_empty() {
        "tool".to_string()
    } else if cleaned
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
    {
        cleaned.to_string()
    } else {
        format!("tool_{cleaned}")
    };
    name.truncate(MAX_PROVIDER_NAME_LEN);
    name
}

/// The manifest for one agent turn: declarations plus id↔name maps.
#[derive(Debug, Default)]
pub struct ProviderToolManifest {
    declarations: Vec<ToolDeclaration>,
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
    /// `(id, name)` pairs for the fallback lookup when the map misses.
    known_tools: Vec<(String, String)>,
}

impl ProviderToolManifest {
    /// Build declarations for `tools`, assigning collision-free provider
    /// names.  A tool for which no valid unique name can be produced within
    /// the attempt budget is dropped with a warning.
    pub fn build(tools: &[Arc<dyn Tool>]) -> Self {
        let mut manifest = Self::default();
        for tool in tools {
            manifest
                .known_tools
                .push((tool.id().to_string(), tool.name().to_string()));

            let base = sanitize_provider_tool_name(tool.name());
            let Some(name) = manifest.unique_name(&base) else {
                warn!(
                    tool_id = %tool.id(),
                    "could not derive a unique provider tool name; dropping tool"
                );
                continue;
            };

            manifest.name_to_id.insert(name.clone(), tool.id().to_string());
            manifest.id_to_name.insert(tool.id().to_string(), name.clone());
            manifest.declarations.push(ToolDeclaration {
                name,
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            });
        }
        manifest
    }

    fn unique_name(&self, base: &str) -> Option<String> {
        if !self.name_to_id.contains_key(base) {
            return Some(base.to_string());
        }
        for attempt in 2..MAX_NAME_ATTEMPTS {
            let suffix = format!("_{attempt}");
            let keep = MAX_PROVIDER_NAME_LEN.saturating_sub(suffix.len());
            let candidate = format!("{}{suffix}", &base[..base.len().min(keep)]);
            if !self.name_to_id.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Provider name assigned to `tool_id`, when the tool survived the build.
    pub fn provider_name_for(&self, tool_id: &str) -> Option<&str> {
        self.id_to_name.get(tool_id).map(String::as_str)
    }

    /// Resolve a provider-reported function name back to a canonical tool
    /// id.  Falls back to matching the raw string against tool ids and
    /// names, which covers providers that echo the original name despite
    /// the sanitized declaration.
    pub fn resolve_tool_id(&self, provider_name: &str) -> Option<String> {
        if let Some(id) = self.name_to_id.get(provider_name) {
            return Some(id.clone());
        }
        self.known_tools
            .iter()
            .find(|(id, name)| id == provider_name || name == provider_name)
            .map(|(id, _)| id.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::tool::ToolResult;
    use async_trait::async_trait;
    use serde_json::json;

    struct NamedTool {
        id: String,
        name: String,
    }

    impl NamedTool {
        fn new(id: &str, name: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                id: id.into(),
                name: name.into(),
            })
        }
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> ToolResult {
            ToolResult::ok("ok")
        }
    }

    // -- sanitization --

    #[test]
    fn valid_names_pass_through() {
        assert_eq!(sanitize_provider_tool_name("web_search"), "web_search");
        assert_eq!(sanitize_provider_tool_name("Tool2"), "Tool2");
    }

    #[test]
    fn disallowed_chars_become_underscores() {
        assert_eq!(
            sanitize_provider_tool_name("mcp:files/read"),
            "mcp_files_read"
        );
    }

    #[test]
    fn runs_of_disallowed_chars_collapse() {
        assert_eq!(sanitize_provider_tool_name("a--/--b"), "a_b");
    }

    #[test]
    fn leading_and_trailing_underscores_stripped() {
        assert_eq!(sanitize_provider_tool_name("__core__"), "core");
    }

    #[test]
    fn leading_digit_gets_tool_prefix() {
        assert_eq!(sanitize_provider_tool_name("2fast"), "tool_2fast");
    }

    #[test]
    fn all_symbols_becomes_tool() {
        assert_eq!(sanitize_provider_tool_name("///"), "tool");
        assert_eq!(sanitize_provider_tool_name(""), "tool");
    }

    #[test]
    fn long_names_truncate_to_64() {
        let long = "x".repeat(100);
        assert_eq!(sanitize_provider_tool_name(&long).len(), 64);
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["mcp:files/read", "2fast", "///", "__core__", "normal_name"] {
            let once = sanitize_provider_tool_name(raw);
            let twice = sanitize_provider_tool_name(&once);
            assert_eq!(once, twice, "sanitize must be idempotent for {raw:?}");
        }
    }

    // -- manifest build --

    #[test]
    fn builds_declarations_with_mapping() {
        let tools = vec![NamedTool::new("mcp:fs/read", "mcp:fs/read")];
        let m = ProviderToolManifest::build(&tools);
        assert_eq!(m.declarations().len(), 1);
        assert_eq!(m.declarations()[0].name, "mcp_fs_read");
        assert_eq!(m.resolve_tool_id("mcp_fs_read").as_deref(), Some("mcp:fs/read"));
        assert_eq!(m.provider_name_for("mcp:fs/read"), Some("mcp_fs_read"));
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let tools = vec![
            NamedTool::new("a", "mcp:x/run"),
            NamedTool::new("b", "mcp-x-run"),
            NamedTool::new("c", "mcp x run"),
        ];
        let m = ProviderToolManifest::build(&tools);
        let names: Vec<&str> = m.declarations().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["mcp_x_run", "mcp_x_run_2", "mcp_x_run_3"]);
        assert_eq!(m.resolve_tool_id("mcp_x_run_2").as_deref(), Some("b"));
    }

    #[test]
    fn suffix_respects_length_cap() {
        let long_a = "y".repeat(70);
        let tools = vec![
            NamedTool::new("a", &long_a),
            NamedTool::new("b", &format!("{long_a}z")),
        ];
        let m = ProviderToolManifest::build(&tools);
        for d in m.declarations() {
            assert!(d.name.len() <= 64, "{} exceeds 64 chars", d.name);
        }
        assert_ne!(m.declarations()[0].name, m.declarations()[1].name);
    }

    #[test]
    fn resolve_falls_back_to_raw_id_match() {
        let tools = vec![NamedTool::new("mcp:fs/read", "reader")];
        let m = ProviderToolManifest::build(&tools);
        // Provider echoed the internal id instead of the declared name.
        assert_eq!(
            m.resolve_tool_id("mcp:fs/read").as_deref(),
            Some("mcp:fs/read")
        );
        // Or the unsanitized display name.
        assert_eq!(m.resolve_tool_id("reader").as_deref(), Some("mcp:fs/read"));
    }

    #[test]
    fn resolve_unknown_yields_none() {
        let m = ProviderToolManifest::build(&[]);
        assert!(m.resolve_tool_id("ghost").is_none());
    }
}
