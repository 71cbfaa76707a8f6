// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Director decisions: the JSON contract between the orchestrator loop and
//! the director model, with forgiving extraction and fail-closed defaults.

use serde_json::Value;

use covey_runtime::json::parse_object_with_recovery;

pub const INVALID_DECISION_SUMMARY: &str = "Orchestrator decision schema was invalid.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorStatus {
    Continue,
    Complete,
    NeedsUserInput,
    Blocked,
}

/// One decision from the director model.
///
/// Invariants enforced downstream: `Continue` requires a target and an
/// instruction; `Complete` requires a user-facing response; the director is
/// never its own target.
#[derive(Debug, Clone)]
pub struct DirectorDecision {
    pub status: DirectorStatus,
    pub summary: String,
    pub target_agent_id: Option<String>,
    pub instruction: Option<String>,
    pub response_to_user: Option<String>,
    pub user_question: Option<String>,
    pub blocker_reason: Option<String>,
}

impl DirectorDecision {
    fn blocked(summary: impl Into<String>) -> Self {
        Self {
            status: DirectorStatus::Blocked,
            summary: summary.into(),
            target_agent_id: None,
            instruction: None,
            response_to_user: None,
            user_question: None,
            blocker_reason: None,
        }
    }
}

/// Extract a decision from raw director output.
///
/// Strips markdown fences, JSON-parses with recovery, and normalizes the
/// fields.  Anything that does not normalize to a valid decision fails
/// closed as `Blocked` so the squad loop never acts on garbage.
pub fn extract_decision(text: &str) -> DirectorDecision {
    let stripped = strip_markdown_fences(text);
    let Some(object) = parse_object_with_recovery(&stripped) else {
        return DirectorDecision::blocked(INVALID_DECISION_SUMMARY);
    };

    let status = match object
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("continue") => DirectorStatus::Continue,
        Some("complete") => DirectorStatus::Complete,
        Some("needs_user_input") => DirectorStatus::NeedsUserInput,
        Some("blocked") => DirectorStatus::Blocked,
        _ => return DirectorDecision::blocked(INVALID_DECISION_SUMMARY),
    };

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(summary) = summary else {
        return DirectorDecision::blocked(INVALID_DECISION_SUMMARY);
    };

    let optional = |key: &str| -> Option<String> {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    DirectorDecision {
        status,
        summary: summary.to_string(),
        target_agent_id: optional("targetAgentId").or_else(|| optional("target_agent_id")),
        instruction: optional("instruction"),
        response_to_user: optional("responseToUser").or_else(|| optional("response_to_user")),
        user_question: optional("userQuestion").or_else(|| optional("user_question")),
        blocker_reason: optional("blockerReason").or_else(|| optional("blocker_reason")),
    }
}

/// Remove a surrounding ``` / ```json fence pair when present.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = trimmed
        .trim_start_matches("```")
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim_start();
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
        .to_string()
}

/// The strict response contract embedded in the director prompt.
pub(crate) fn decision_schema_instructions() -> &'static str {
    "Respond with EXACTLY one JSON object and nothing else:\n\
     {\n\
     \x20 \"status\": \"continue\" | \"complete\" | \"needs_user_input\" | \"blocked\",\n\
     \x20 \"summary\": \"one sentence describing this decision\",\n\
     \x20 \"targetAgentId\": \"worker id (required when status is continue)\",\n\
     \x20 \"instruction\": \"task for the worker (required when status is continue)\",\n\
     \x20 \"responseToUser\": \"final answer (required when status is complete)\",\n\
     \x20 \"userQuestion\": \"question for the user (when status is needs_user_input)\",\n\
     \x20 \"blockerReason\": \"why the squad is stuck (when status is blocked)\"\n\
     }\n\
     Never target yourself; only listed worker ids are valid."
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_decision_passes_through() {
        let d = extract_decision(
            r#"{"status": "continue", "summary": "go", "targetAgentId": "w1", "instruction": "do x"}"#,
        );
        assert_eq!(d.status, DirectorStatus::Continue);
        assert_eq!(d.summary, "go");
        assert_eq!(d.target_agent_id.as_deref(), Some("w1"));
        assert_eq!(d.instruction.as_deref(), Some("do x"));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"status\":\"continue\",\"summary\":\"go\",\"targetAgentId\":\"w1\",\"instruction\":\"do x\"}\n```";
        let d = extract_decision(text);
        assert_eq!(d.status, DirectorStatus::Continue);
        assert_eq!(d.target_agent_id.as_deref(), Some("w1"));
    }

    #[test]
    fn uppercase_status_is_normalized() {
        let d = extract_decision(r#"{"status": "COMPLETE", "summary": "done", "responseToUser": "all finished"}"#);
        assert_eq!(d.status, DirectorStatus::Complete);
        assert_eq!(d.response_to_user.as_deref(), Some("all finished"));
    }

    #[test]
    fn snake_case_keys_are_accepted() {
        let d = extract_decision(
            r#"{"status": "continue", "summary": "s", "target_agent_id": "w2", "instruction": "i"}"#,
        );
        assert_eq!(d.target_agent_id.as_deref(), Some("w2"));
    }

    #[test]
    fn prose_around_the_object_is_tolerated() {
        let d = extract_decision(
            "Here is my decision:\n{\"status\": \"blocked\", \"summary\": \"stuck\", \"blockerReason\": \"no access\"}",
        );
        assert_eq!(d.status, DirectorStatus::Blocked);
        assert_eq!(d.blocker_reason.as_deref(), Some("no access"));
    }

    #[test]
    fn unknown_status_fails_closed() {
        let d = extract_decision(r#"{"status": "partying", "summary": "s"}"#);
        assert_eq!(d.status, DirectorStatus::Blocked);
        assert_eq!(d.summary, INVALID_DECISION_SUMMARY);
    }

    #[test]
    fn missing_summary_fails_closed() {
        let d = extract_decision(r#"{"status": "continue"}"#);
        assert_eq!(d.status, DirectorStatus::Blocked);
        assert_eq!(d.summary, INVALID_DECISION_SUMMARY);
    }

    #[test]
    fn non_json_fails_closed() {
        let d = extract_decision("I think we should continue with w1");
        assert_eq!(d.status, DirectorStatus::Blocked);
        assert_eq!(d.summary, INVALID_DECISION_SUMMARY);
    }

    #[test]
    fn empty_optional_strings_become_none() {
        let d = extract_decision(
            r#"{"status": "continue", "summary": "s", "targetAgentId": "  ", "instruction": "i"}"#,
        );
        assert!(d.target_agent_id.is_none());
    }

    #[test]
    fn non_string_optionals_are_dropped() {
        let d = extract_decision(
            r#"{"status": "continue", "summary": "s", "targetAgentId": 42, "instruction": "i"}"#,
        );
        assert!(d.target_agent_id.is_none());
    }
}
