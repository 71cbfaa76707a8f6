// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::canonical::SUBAGENTS_TOOL_ID;
use crate::context::ExecutionContext;
use crate::subagent::SpawnRequest;
use crate::tool::{Tool, ToolResult};

/// Built-in tool exposing the sub-agent coordinator to the model.
///
/// The tool is a thin shim: all policy (depth limits, per-parent caps,
/// retention) lives behind the [`crate::SubAgentHandle`] on the execution
/// context, so the same operations are available programmatically.
pub struct SubAgentsTool;

#[async_trait]
impl Tool for SubAgentsTool {
    fn id(&self) -> &str {
        SUBAGENTS_TOOL_ID
    }

    fn description(&self) -> &str {
        "Manage recursive sub-agent runs. Actions: 'spawn' queues a child \
         agent on a focused task (optionally waiting for completion), \
         'await' waits for a run to finish, 'list' shows this agent's runs, \
         'cancel' stops a queued or running run. Nesting depth is bounded."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["spawn", "await", "list", "cancel"],
                    "description": "The operation to perform."
                },
                "task": {
                    "type": "string",
                    "description": "Focused task description (spawn only)."
                },
                "agent_id": {
                    "type": "string",
                    "description": "Target agent id; defaults to a clone of the caller (spawn only)."
                },
                "run_id": {
                    "type": "string",
                    "description": "Run to await or cancel."
                },
                "wait": {
                    "type": "boolean",
                    "description": "Block until the spawned run finishes (spawn only)."
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Wait deadline in milliseconds."
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> ToolResult {
        let Some(handle) = &ctx.subagents else {
            return ToolResult::fail("sub-agent runtime is not available in this context");
        };
        let action = args.get("action").and_then(Value::as_str).unwrap_or("");
        let timeout_ms = args.get("timeout_ms").and_then(Value::as_u64);

        match action {
            "spawn" => {
                let Some(task) = args.get("task").and_then(Value::as_str) else {
                    return ToolResult::fail("'task' is required for action 'spawn'");
                };
                let request = SpawnRequest {
                    agent_id: args
                        .get("agent_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    task: task.to_string(),
                    provider: None,
                    model: None,
                    await_completion: args
                        .get("wait")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    timeout_ms,
                };
                let run = handle.spawn(request).await;
                render_state(&run)
            }
            "await" => {
                let Some(run_id) = args.get("run_id").and_then(Value::as_str) else {
                    return ToolResult::fail("'run_id' is required for action 'await'");
                };
                match handle.await_run(run_id, timeout_ms).await {
                    Some(run) => render_state(&run),
                    None => ToolResult::fail(format!("unknown run id '{run_id}'")),
                }
            }
            "list" => {
                let runs = handle.list_runs().await;
                match serde_json::to_string_pretty(&runs) {
                    Ok(text) => ToolResult::ok(text),
                    Err(e) => ToolResult::fail(format!("failed to serialize run list: {e}")),
                }
            }
            "cancel" => {
                let Some(run_id) = args.get("run_id").and_then(Value::as_str) else {
                    return ToolResult::fail("'run_id' is required for action 'cancel'");
                };
                match handle.cancel_run(run_id).await {
                    Some(run) => render_state(&run),
                    None => ToolResult::fail(format!("unknown run id '{run_id}'")),
                }
            }
            other => ToolResult::fail(format!("unknown action '{other}'")),
        }
    }
}

fn render_state(run: &crate::subagent::SubAgentRunState) -> ToolResult {
    match serde_json::to_string_pretty(run) {
        Ok(text) => {
            // A rejected or failed run is still useful output for the model,
            // but it must read as a failure so the loop counts it.
            if run.status == crate::subagent::RunStatus::Failed {
                ToolResult::fail(
                    run.error
                        .clone()
                        .unwrap_or_else(|| "sub-agent run failed".to_string()),
                )
            } else {
                ToolResult::ok(text)
            }
        }
        Err(e) => ToolResult::fail(format!("failed to serialize run state: {e}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
