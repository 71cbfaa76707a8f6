// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use covey_config::ReasoningEffort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A native tool invocation requested by the model.
///
/// `arguments` is a JSON object serialized as text — it is decoded and
/// validated by the tool layer, never trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Aggregate of what the tool loop did during one agent turn.  Attached to
/// the final assistant message so callers can verify side-effects without
/// replaying the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionSummary {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub malformed: u32,
    pub verified_file_effects: u32,
    pub verified_shell_effects: u32,
}

/// One item of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Tool name on tool-role messages; display name elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Correlates a tool-role message with the assistant tool call it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_execution: Option<ToolExecutionSummary>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
            tool_execution: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut m = Self::base(Role::Assistant, content);
        m.tool_calls = tool_calls;
        m
    }

    /// A tool-role result message answering the call `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m.name = Some(tool_name.into());
        m
    }
}

/// A provider-facing tool declaration from the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToolDecl {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// Structured-output request forwarded to providers that support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        strict: bool,
    },
}

/// Per-call options for [`crate::ChatProvider::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub tools: Vec<ProviderToolDecl>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub total_tokens: u32,
}

/// Result of one provider chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

impl ChatOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            usage: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_get_unique_ids() {
        let a = Message::user("one");
        let b = Message::user("two");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let m = Message::tool_result("call-1", "echo", "hi");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(m.name.as_deref(), Some("echo"));
        assert_eq!(m.content, "hi");
    }

    #[test]
    fn assistant_with_tool_calls_keeps_order() {
        let calls = vec![
            ToolCallRequest {
                id: "c1".into(),
                name: "a".into(),
                arguments: "{}".into(),
            },
            ToolCallRequest {
                id: "c2".into(),
                name: "b".into(),
                arguments: "{}".into(),
            },
        ];
        let m = Message::assistant_with_tool_calls("", calls);
        assert_eq!(m.tool_calls[0].id, "c1");
        assert_eq!(m.tool_calls[1].id, "c2");
    }

    #[test]
    fn empty_optionals_are_omitted_from_serialization() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("tool_execution"));
    }

    #[test]
    fn message_serde_round_trip() {
        let mut m = Message::assistant_with_tool_calls(
            "calling",
            vec![ToolCallRequest {
                id: "c9".into(),
                name: "shell_execute".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            }],
        );
        m.tool_execution = Some(ToolExecutionSummary {
            attempted: 1,
            succeeded: 1,
            ..Default::default()
        });
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_execution.unwrap().attempted, 1);
    }
}
