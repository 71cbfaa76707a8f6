// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Execution-expectation inference and postcondition verification.
//!
//! Workers report what they did through the engine's execution summary;
//! the orchestrator cross-checks that against what the instruction *should*
//! have required.  A worker that claims success without a single verified
//! side-effect gets one retry, then blocks the squad.

use std::sync::OnceLock;

use regex::Regex;

use covey_model::ToolExecutionSummary;
use covey_tools::{MCP_ALL_TOOL_ID, SHELL_EXECUTE_TOOL_ID, WEB_SEARCH_TOOL_ID};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionExpectation {
    pub requires_tool_execution: bool,
    pub requires_file_effects: bool,
    pub requires_shell_effects: bool,
}

fn file_intent() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(write|create|save|edit|update|generate|produce|author|draft)\b[\s\S]{0,80}?\b(file|files|document|report|script|code|readme|config|notes?|markdown|\.md|\.rs|\.py|\.txt|\.json|\.yaml)\b",
        )
        .expect("static regex")
    })
}

fn shell_intent() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(run|execute|build|compile|test|install|invoke|launch|benchmark)\b")
            .expect("static regex")
    })
}

fn research_intent() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(read|search|look\s?up|research|fetch|browse|inspect|review|find)\b")
            .expect("static regex")
    })
}

fn has_tool(tools: &[String], id: &str) -> bool {
    tools.iter().any(|t| t == id)
}

/// Infer what a worker's execution summary must show for `instruction` to
/// count as actually done, given the tools the worker holds.
pub fn infer_expectation(instruction: &str, worker_tools: &[String]) -> ExecutionExpectation {
    let can_write_files = has_tool(worker_tools, MCP_ALL_TOOL_ID);
    let can_shell = has_tool(worker_tools, SHELL_EXECUTE_TOOL_ID);
    let can_research = has_tool(worker_tools, WEB_SEARCH_TOOL_ID) || can_write_files;

    let requires_file_effects = can_write_files && file_intent().is_match(instruction);
    let requires_shell_effects = can_shell && shell_intent().is_match(instruction);
    let requires_tool_execution = requires_file_effects
        || requires_shell_effects
        || (can_research && research_intent().is_match(instruction));

    ExecutionExpectation {
        requires_tool_execution,
        requires_file_effects,
        requires_shell_effects,
    }
}

/// Check a worker's summary against the expectation.  `Err` carries the
/// human-readable reason used in the validation-failed retry prompt.
pub fn verify_execution(
    expectation: ExecutionExpectation,
    summary: &ToolExecutionSummary,
) -> Result<(), String> {
    if expectation.requires_tool_execution && (summary.attempted == 0 || summary.succeeded == 0) {
        return Err(format!(
            "the instruction requires actual tool execution, but the worker attempted {} \
             tool calls with {} successes",
            summary.attempted, summary.succeeded
        ));
    }
    if expectation.requires_file_effects && summary.verified_file_effects == 0 {
        return Err("the instruction requires verified file side-effects, but none were \
             reported"
            .to_string());
    }
    if expectation.requires_shell_effects && summary.verified_shell_effects == 0 {
        return Err("the instruction requires verified shell execution, but none was \
             reported"
            .to_string());
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
