// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tracing::warn;

pub const WEB_SEARCH_TOOL_ID: &str = "web_search";
pub const SHELL_EXECUTE_TOOL_ID: &str = "shell_execute";
/// Wildcard grant: access to every tool whose id begins with [`MCP_TOOL_ID_PREFIX`].
pub const MCP_ALL_TOOL_ID: &str = "mcp_all";
pub const SUBAGENTS_TOOL_ID: &str = "subagents";

pub const MCP_TOOL_ID_PREFIX: &str = "mcp:";

/// The closed set of canonical agent-facing tool ids.
pub const CANONICAL_TOOL_IDS: &[&str] = &[
    WEB_SEARCH_TOOL_ID,
    SHELL_EXECUTE_TOOL_ID,
    MCP_ALL_TOOL_ID,
    SUBAGENTS_TOOL_ID,
];

/// Map legacy tool ids from older agent configs onto their canonical
/// replacements.
fn collapse_alias(id: &str) -> &str {
    match id {
        "fs_read" | "fs_write" | "fs_list" | "read_file" | "write_file" | "list_directory" => {
            MCP_ALL_TOOL_ID
        }
        "execute_command" => SHELL_EXECUTE_TOOL_ID,
        "search_internet" => WEB_SEARCH_TOOL_ID,
        other => other,
    }
}

/// Normalize an agent-facing tool id list: lowercase and trim, collapse
/// legacy aliases, drop ids outside the canonical set (with a warning), and
/// de-duplicate while preserving first-occurrence order.
///
/// Normalizing an already-canonical list is a no-op.
pub fn normalize_tool_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for raw in ids {
        let id = raw.trim().to_ascii_lowercase();
        if id.is_empty() {
            continue;
        }
        let id = collapse_alias(&id);
        if !CANONICAL_TOOL_IDS.contains(&id) {
            warn!(tool_id = %id, "dropping unknown tool id from agent config");
            continue;
        }
        if !out.iter().any(|existing| existing.as_str() == id) {
            out.push(id.to_string());
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lowercases_and_trims() {
        assert_eq!(
            normalize_tool_ids(&ids(&["  Web_Search ", "SHELL_EXECUTE"])),
            vec!["web_search", "shell_execute"]
        );
    }

    #[test]
    fn legacy_fs_aliases_collapse_to_mcp_all() {
        for legacy in ["fs_read", "fs_write", "fs_list", "read_file", "write_file", "list_directory"] {
            assert_eq!(normalize_tool_ids(&ids(&[legacy])), vec!["mcp_all"]);
        }
    }

    #[test]
    fn execute_command_and_search_internet_aliases() {
        assert_eq!(
            normalize_tool_ids(&ids(&["execute_command", "search_internet"])),
            vec!["shell_execute", "web_search"]
        );
    }

    #[test]
    fn unknown_ids_are_dropped() {
        assert_eq!(
            normalize_tool_ids(&ids(&["teleport", "web_search"])),
            vec!["web_search"]
        );
    }

    #[test]
    fn duplicates_removed_order_preserved() {
        assert_eq!(
            normalize_tool_ids(&ids(&["subagents", "web_search", "subagents", "fs_read", "fs_write"])),
            vec!["subagents", "web_search", "mcp_all"]
        );
    }

    #[test]
    fn canonical_list_is_a_fixed_point() {
        let canonical = ids(&["web_search", "shell_execute", "mcp_all", "subagents"]);
        assert_eq!(normalize_tool_ids(&canonical), canonical);
    }

    #[test]
    fn empty_entries_are_skipped() {
        assert!(normalize_tool_ids(&ids(&["", "   "])).is_empty());
    }
}
