// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use covey_config::AgentConfig;
use covey_tools::{SpawnRequest, SubAgentHandle, SubAgentRunState};

use crate::coordinator::{EnqueueRequest, LaunchInfo, SubAgentCoordinator};

/// Per-run view of the coordinator, carrying the caller's identity and
/// nesting depth.  One instance is built for every agent run; children get
/// a fresh instance at `depth + 1`.
pub struct SubAgentRuntime {
    coordinator: Arc<SubAgentCoordinator>,
    agents: Arc<HashMap<String, AgentConfig>>,
    /// Nesting depth of the *calling* agent (root = 0).
    depth: usize,
    current_run_id: String,
    current_agent_id: String,
    current_agent_name: String,
}

impl SubAgentRuntime {
    pub fn new(
        coordinator: Arc<SubAgentCoordinator>,
        agents: Arc<HashMap<String, AgentConfig>>,
        depth: usize,
        current_run_id: impl Into<String>,
        current_agent_id: impl Into<String>,
        current_agent_name: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            agents,
            depth,
            current_run_id: current_run_id.into(),
            current_agent_id: current_agent_id.into(),
            current_agent_name: current_agent_name.into(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[async_trait]
impl SubAgentHandle for SubAgentRuntime {
    async fn spawn(&self, request: SpawnRequest) -> SubAgentRunState {
        let max_depth = self.coordinator.limits().max_depth;
        if self.depth >= max_depth {
            return SubAgentRunState::rejected(
                self.current_agent_id.clone(),
                self.current_agent_name.clone(),
                request.task,
                format!("Sub-agent depth limit reached ({max_depth})."),
            );
        }

        let target_id = request
            .agent_id
            .clone()
            .unwrap_or_else(|| self.current_agent_id.clone());
        if target_id == self.current_agent_id {
            return SubAgentRunState::rejected(
                target_id,
                self.current_agent_name.clone(),
                request.task,
                "Spawning the current agent as its own sub-agent is blocked by runtime policy.",
            );
        }
        let Some(target) = self.agents.get(&target_id) else {
            return SubAgentRunState::rejected(
                target_id.clone(),
                target_id.clone(),
                request.task,
                format!("Unknown agent '{target_id}'."),
            );
        };

        let run = self
            .coordinator
            .enqueue(EnqueueRequest {
                parent_run_id: Some(self.current_run_id.clone()),
                agent_id: target.id.clone(),
                agent_name: target.name.clone(),
                task: request.task,
                launch: LaunchInfo {
                    depth: self.depth + 1,
                    provider_override: request.provider,
                    model_override: request.model,
                    parent_agent_name: self.current_agent_name.clone(),
                },
            })
            .await;

        if request.await_completion && !run.status.is_terminal() {
            if let Some(finished) = self
                .coordinator
                .await_run(&run.run_id, request.timeout_ms)
                .await
            {
                return finished;
            }
        }
        run
    }

    async fn await_run(&self, run_id: &str, timeout_ms: Option<u64>) -> Option<SubAgentRunState> {
        self.coordinator.await_run(run_id, timeout_ms).await
    }

    async fn list_runs(&self) -> Vec<SubAgentRunState> {
        self.coordinator
            .list_runs(Some(&self.current_run_id))
            .await
    }

    async fn cancel_run(&self, run_id: &str) -> Option<SubAgentRunState> {
        self.coordinator.cancel_run(run_id).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
