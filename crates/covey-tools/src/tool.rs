// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;

/// What kind of side-effect an artifact records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Shell,
    Web,
    Other,
}

/// A structured side-effect record returned by a tool.
///
/// Artifacts are how the squad orchestrator verifies that a worker actually
/// did something: a file artifact with a write-like operation counts toward
/// `verified_file_effects`, a shell artifact with an execute-like operation
/// toward `verified_shell_effects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    pub fn file(label: impl Into<String>, operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::File,
            label: label.into(),
            operation: Some(operation.into()),
            path: Some(path.into()),
            metadata: None,
        }
    }

    pub fn shell(label: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Shell,
            label: label.into(),
            operation: Some(operation.into()),
            path: None,
            metadata: None,
        }
    }

    pub fn web(label: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Web,
            label: label.into(),
            operation: None,
            path: None,
            metadata: None,
        }
    }
}

/// A named postcondition check evaluated by the tool itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    pub ok: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Check {
    pub fn pass(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            description: description.into(),
            details: None,
        }
    }

    pub fn fail(
        id: impl Into<String>,
        description: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ok: false,
            description: description.into(),
            details: Some(details.into()),
        }
    }
}

/// The uniform result of executing a tool.
///
/// `ok == false` always carries a non-empty `error` — the constructors
/// enforce it so the invariant cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<Check>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            error: None,
            artifacts: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let mut error: String = error.into();
        if error.is_empty() {
            error = "tool failed without an error message".to_string();
        }
        Self {
            ok: false,
            output: None,
            error: Some(error),
            artifacts: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn any_check_failed(&self) -> bool {
        self.checks.iter().any(|c| !c.ok)
    }

    /// The text fed back to the model as the tool-role message.
    pub fn content_for_model(&self) -> String {
        if self.ok {
            self.output.clone().unwrap_or_default()
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("tool failed")
            )
        }
    }
}

/// An invocable external capability with a JSON-schema input contract.
///
/// Tools are registered once at startup and dispatched dynamically; state a
/// tool needs (HTTP clients, timeouts) lives in the implementing struct.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical internal identifier.
    fn id(&self) -> &str;

    /// Provider-facing identifier, subject to manifest sanitization.
    /// Defaults to the canonical id.
    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) describing the arguments.
    fn input_schema(&self) -> Value;

    /// Privileged tools can mutate the host and are gated by the agent's
    /// access mode.
    fn privileged(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
