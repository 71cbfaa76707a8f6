// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::debug;

use covey_config::AgentConfig;
use covey_core::{run_agent_turn, TurnRequest};
use covey_model::{Message, ProviderFactory};
use covey_runtime::hooks::HookBus;
use covey_tools::{ExecutionContext, SubAgentRunState, Tool, ToolRegistry};

use crate::coordinator::{LaunchInfo, RunExecutor, SubAgentCoordinator};
use crate::runtime::SubAgentRuntime;

/// Executes sub-agent runs through the agent turn engine.
///
/// Holds the coordinator weakly: the coordinator owns the executor, and a
/// strong reference back would leak both.  `attach` is called once after
/// both are constructed.
pub struct AgentRunExecutor {
    agents: Arc<HashMap<String, AgentConfig>>,
    providers: Arc<dyn ProviderFactory>,
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookBus>,
    data_root: PathBuf,
    coordinator: RwLock<Weak<SubAgentCoordinator>>,
}

impl AgentRunExecutor {
    pub fn new(
        agents: Arc<HashMap<String, AgentConfig>>,
        providers: Arc<dyn ProviderFactory>,
        registry: Arc<ToolRegistry>,
        hooks: Arc<HookBus>,
        data_root: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents,
            providers,
            registry,
            hooks,
            data_root: data_root.into(),
            coordinator: RwLock::new(Weak::new()),
        })
    }

    /// Wire the executor back to its coordinator so children can spawn
    /// grandchildren.  Also registers `self` as the coordinator's executor.
    pub fn attach(self: &Arc<Self>, coordinator: &Arc<SubAgentCoordinator>) {
        *self
            .coordinator
            .write()
            .expect("coordinator link poisoned") = Arc::downgrade(coordinator);
        coordinator.set_executor(self.clone() as Arc<dyn RunExecutor>);
    }

    /// Isolated on-disk workspace for one agent.
    fn workspace_for(&self, agent_id: &str) -> PathBuf {
        let key: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.data_root.join("agents").join(key).join("workspace")
    }
}

#[async_trait]
impl RunExecutor for AgentRunExecutor {
    async fn execute(&self, run: SubAgentRunState, launch: LaunchInfo) -> anyhow::Result<String> {
        let mut agent = self
            .agents
            .get(&run.agent_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("agent '{}' is not registered", run.agent_id))?;
        if let Some(provider) = launch.provider_override {
            agent.provider = provider;
        }
        if let Some(model) = launch.model_override {
            agent.model = model;
        }

        let workspace = self.workspace_for(&agent.id);
        tokio::fs::create_dir_all(&workspace).await?;

        let provider = self.providers.create(&agent.provider, &agent.model)?;

        let coordinator = self
            .coordinator
            .read()
            .expect("coordinator link poisoned")
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("sub-agent coordinator is gone"))?;
        let child_runtime = SubAgentRuntime::new(
            coordinator,
            self.agents.clone(),
            launch.depth,
            run.run_id.clone(),
            agent.id.clone(),
            agent.name.clone(),
        );

        let mut context = ExecutionContext::for_agent(
            run.run_id.clone(),
            agent.id.clone(),
            agent.name.clone(),
            agent.provider.clone(),
        );
        context.tool_access_mode = agent.access_mode;
        context.agent_workspace_root = workspace;
        context.subagents = Some(Arc::new(child_runtime));
        context.hooks = Some(self.hooks.clone());

        let parent = if launch.parent_agent_name.is_empty() {
            "unknown".to_string()
        } else {
            launch.parent_agent_name
        };
        let prompt = format!(
            "You were spawned by parent agent '{parent}'. Use only the focused task \
             context below; do not assume access to the full parent chat transcript.\n\n\
             Task:\n{}",
            run.task
        );

        debug!(run_id = %run.run_id, agent = %agent.id, depth = launch.depth, "executing sub-agent run");

        let available_tools: Vec<Arc<dyn Tool>> = self.registry.get_all();
        let outcome = run_agent_turn(TurnRequest {
            agent,
            history: vec![Message::user(prompt)],
            provider,
            available_tools,
            context,
            hooks: self.hooks.clone(),
        })
        .await?;

        Ok(outcome.message.content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
