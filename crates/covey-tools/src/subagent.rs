// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-facing contract for recursive sub-agent runs.
//!
//! The coordinator itself lives in its own crate; tools only see this
//! handle through the [`crate::ExecutionContext`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal runs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Durable state of one sub-agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentRunState {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    pub agent_id: String,
    pub agent_name: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubAgentRunState {
    /// A failed run that never entered the queue (policy rejection: depth
    /// limit, self-spawn, per-parent cap, oversized task).
    pub fn rejected(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        task: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: None,
            status: RunStatus::Failed,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            task: task.into(),
            created_at: now,
            started_at: None,
            finished_at: Some(now),
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A request to spawn a sub-agent run.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    /// Target agent id; `None` spawns a child of the calling agent's config.
    pub agent_id: Option<String>,
    pub task: String,
    /// Provider/model overrides for the child.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Suspend the caller until the run is terminal (or the timeout fires).
    pub await_completion: bool,
    pub timeout_ms: Option<u64>,
}

/// Sub-agent operations exposed to tools through the execution context.
#[async_trait]
pub trait SubAgentHandle: Send + Sync {
    /// Enqueue a child run.  Policy rejections come back as synthetic
    /// `failed` runs, never as errors.
    async fn spawn(&self, request: SpawnRequest) -> SubAgentRunState;

    /// Wait until the run is terminal or `timeout_ms` elapses; resolves with
    /// the current (possibly non-terminal) state on timeout.  `None` when
    /// the run id is unknown.
    async fn await_run(&self, run_id: &str, timeout_ms: Option<u64>) -> Option<SubAgentRunState>;

    /// Snapshot of this parent's runs, newest first, bounded by the
    /// configured listing cap.
    async fn list_runs(&self) -> Vec<SubAgentRunState>;

    /// Cooperative cancellation; `None` when the run id is unknown.
    async fn cancel_run(&self, run_id: &str) -> Option<SubAgentRunState>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
