// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use covey_config::AccessMode;
use covey_runtime::hooks::HookBus;

use crate::subagent::SubAgentHandle;

/// A secret available for placeholder substitution in tool arguments.
///
/// The placeholder (e.g. `{{secret:github_token}}`) is replaced verbatim
/// with the value before execution.  Values never reach the durable store;
/// the redaction hook masks them on the way back out.
#[derive(Debug, Clone)]
pub struct SecretValue {
    pub placeholder: String,
    pub value: String,
}

/// Ambient environment passed into every tool execution.
///
/// Constructed per run and passed down by value; sub-agent operations are
/// reached through a handle so tools stay decoupled from the coordinator.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub provider_id: String,
    pub squad_id: Option<String>,
    pub squad_name: Option<String>,
    pub tool_access_mode: AccessMode,
    /// Explicit user grant for privileged tools under `AskAlways`.
    pub tool_access_granted: bool,
    /// Isolated working directory for this agent's file artifacts.
    pub agent_workspace_root: PathBuf,
    pub subagents: Option<Arc<dyn SubAgentHandle>>,
    pub hooks: Option<Arc<HookBus>>,
    pub secret_values: Vec<SecretValue>,
}

impl ExecutionContext {
    /// Minimal context for tests and one-off tool invocations.
    pub fn for_agent(
        run_id: impl Into<String>,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            provider_id: provider_id.into(),
            squad_id: None,
            squad_name: None,
            tool_access_mode: AccessMode::AskAlways,
            tool_access_granted: false,
            agent_workspace_root: PathBuf::from("."),
            subagents: None,
            hooks: None,
            secret_values: Vec::new(),
        }
    }

    /// Replace secret placeholders in every string inside `value`, walking
    /// objects and arrays recursively.  Replacement is verbatim text
    /// substitution — no escaping, no pattern syntax.
    pub fn substitute_secrets(&self, value: &mut Value) {
        if self.secret_values.is_empty() {
            return;
        }
        substitute(value, &self.secret_values);
    }
}

fn substitute(value: &mut Value, secrets: &[SecretValue]) {
    match value {
        Value::String(s) => {
            for secret in secrets {
                if s.contains(&secret.placeholder) {
                    *s = s.replace(&secret.placeholder, &secret.value);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, secrets);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute(v, secrets);
            }
        }
        _ => {}
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
