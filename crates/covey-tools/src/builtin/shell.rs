// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::canonical::SHELL_EXECUTE_TOOL_ID;
use crate::context::ExecutionContext;
use crate::tool::{Artifact, Check, Tool, ToolResult};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Built-in privileged tool that runs a shell command.
pub struct ShellExecuteTool {
    pub timeout_secs: u64,
}

impl Default for ShellExecuteTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellExecuteTool {
    fn id(&self) -> &str {
        SHELL_EXECUTE_TOOL_ID
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. \
         'command' is required and can be any bash one-liner. \
         Output is capped at ~20 KB. Prefer non-interactive commands; \
         avoid commands that require a TTY."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (defaults to the agent workspace)."
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)."
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> ToolResult {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'command' argument");
        };
        let workdir = args
            .get("workdir")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| ctx.agent_workspace_root.to_string_lossy().into_owned());
        let timeout_secs = args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, workdir = %workdir, "executing shell command");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workdir)
            // The subprocess must never reach the hosting terminal.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = std::time::Instant::now();
        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolResult::fail(format!("failed to spawn command: {e}"))
                    .with_artifact(Artifact::shell(command, "execute"));
            }
            Err(_) => {
                return ToolResult::fail(format!(
                    "command timed out after {timeout_secs}s: {command}"
                ))
                .with_artifact(Artifact::shell(command, "execute"))
                .with_check(Check::fail(
                    "command_exit",
                    "command exited within the timeout",
                    format!("no exit status after {timeout_secs}s"),
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        if combined.len() > OUTPUT_LIMIT_BYTES {
            let omitted = combined.len() - OUTPUT_LIMIT_BYTES;
            combined.truncate(OUTPUT_LIMIT_BYTES);
            combined.push_str(&format!("\n[... {omitted} bytes omitted ...]"));
        }

        let exit_ok = output.status.success();
        let exit_code = output.status.code().unwrap_or(-1);
        let artifact = Artifact::shell(command, "execute");
        let check = if exit_ok {
            Check::pass("command_exit", "command exited with status 0")
        } else {
            Check::fail(
                "command_exit",
                "command exited with status 0",
                format!("exit code {exit_code}"),
            )
        };

        debug!(exit_code, elapsed_ms = started.elapsed().as_millis() as u64, "shell command finished");

        if exit_ok {
            ToolResult::ok(combined).with_artifact(artifact).with_check(check)
        } else {
            ToolResult::fail(format!(
                "command exited with code {exit_code}\n{combined}"
            ))
            .with_artifact(artifact)
            .with_check(check)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::for_agent("r", "a", "A", "mock");
        ctx.agent_workspace_root = std::env::temp_dir();
        ctx
    }

    #[tokio::test]
    async fn echo_succeeds_with_exit_check() {
        let tool = ShellExecuteTool::default();
        let result = tool.execute(json!({"command": "echo hello"}), &ctx()).await;
        assert!(result.ok);
        assert!(result.output.unwrap().contains("hello"));
        assert_eq!(result.checks[0].id, "command_exit");
        assert!(result.checks[0].ok);
        assert_eq!(result.artifacts[0].operation.as_deref(), Some("execute"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_failed_check() {
        let tool = ShellExecuteTool::default();
        let result = tool.execute(json!({"command": "exit 3"}), &ctx()).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("exit"));
        assert!(!result.checks[0].ok);
    }

    #[tokio::test]
    async fn missing_command_fails() {
        let tool = ShellExecuteTool::default();
        let result = tool.execute(json!({}), &ctx()).await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn timeout_reports_failure() {
        let tool = ShellExecuteTool { timeout_secs: 1 };
        let result = tool.execute(json!({"command": "sleep 5"}), &ctx()).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn tool_is_privileged() {
        assert!(ShellExecuteTool::default().privileged());
        assert_eq!(ShellExecuteTool::default().id(), "shell_execute");
    }
}
