// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use covey_config::{AgentConfig, Config, StoreMode};
use covey_core::{run_agent_turn, TurnRequest};
use covey_model::{
    catalog, ChatProvider, Message, MockChatProvider, OpenAiCompatProvider, ProviderFactory,
};
use covey_runtime::{HookBus, HookMetrics, MemoryCapture};
use covey_squad::{resolve_squad, SquadEngine, SquadStep};
use covey_subagents::{
    AgentRunExecutor, FileRunStore, MemoryRunStore, RunStore, SubAgentCoordinator,
    SubAgentRuntime,
};
use covey_tools::{
    builtin::{ShellExecuteTool, SubAgentsTool, WebSearchTool},
    ExecutionContext, ToolRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = covey_config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::ListModels { provider } => {
            for entry in catalog::static_catalog() {
                if provider.as_deref().is_some_and(|p| p != entry.provider) {
                    continue;
                }
                let mut caps = Vec::new();
                if entry.chat {
                    caps.push("chat");
                }
                if entry.tool_use {
                    caps.push("tools");
                }
                if entry.reasoning {
                    caps.push("reasoning");
                }
                if entry.deprecated {
                    caps.push("deprecated");
                }
                println!(
                    "{:<12} {:<28} ctx={:<8} [{}]",
                    entry.provider,
                    entry.id,
                    entry.context_window,
                    caps.join(", ")
                );
            }
            Ok(())
        }
        Commands::Runs => {
            let host = RuntimeHost::build(&config).await?;
            for run in host.coordinator.list_runs(None).await {
                println!(
                    "{}  {:<9}  agent={:<16} {}",
                    run.created_at.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:?}", run.status).to_lowercase(),
                    run.agent_id,
                    run.error.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Run {
            agent,
            grant_access,
            prompt,
        } => {
            let host = RuntimeHost::build(&config).await?;
            host.run_single(agent, &prompt.join(" "), *grant_access).await
        }
        Commands::Squad {
            squad,
            grant_access,
            goal,
        } => {
            let host = RuntimeHost::build(&config).await?;
            host.run_squad(squad, &goal.join(" "), *grant_access).await
        }
    }
}

fn init_logging(verbose: bool) {
    if !verbose && std::env::var("RUST_LOG").is_err() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Provider factory backed by the config file: known providers get their
/// hosted OpenAI-compatible endpoints, `mock` stays offline, and any
/// provider can override `base_url` for local servers and proxies.
struct ConfigProviderFactory {
    config: Config,
    api_keys: HashMap<String, String>,
}

impl ConfigProviderFactory {
    fn base_url(&self, provider: &str) -> Option<String> {
        if let Some(pk) = self.config.providers.get(provider) {
            if let Some(url) = &pk.base_url {
                return Some(url.clone());
            }
        }
        let url = match provider {
            "openai" => "https://api.openai.com/v1",
            "anthropic" => "https://api.anthropic.com/v1",
            "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
            "groq" => "https://api.groq.com/openai/v1",
            "openrouter" => "https://openrouter.ai/api/v1",
            "mistral" => "https://api.mistral.ai/v1",
            "deepseek" => "https://api.deepseek.com/v1",
            _ => return None,
        };
        Some(url.to_string())
    }
}

impl ProviderFactory for ConfigProviderFactory {
    fn create(&self, provider: &str, model: &str) -> anyhow::Result<Arc<dyn ChatProvider>> {
        if provider == "mock" {
            return Ok(Arc::new(MockChatProvider));
        }
        let base_url = self
            .base_url(provider)
            .with_context(|| format!("provider '{provider}' has no endpoint; set providers.{provider}.base_url"))?;
        Ok(Arc::new(OpenAiCompatProvider::new(
            provider.to_string(),
            model.to_string(),
            self.api_keys.get(provider).cloned(),
            &base_url,
        )))
    }
}

/// Everything the CLI wires together once per invocation.
struct RuntimeHost {
    config: Config,
    agents: Arc<HashMap<String, AgentConfig>>,
    providers: Arc<dyn ProviderFactory>,
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookBus>,
    coordinator: Arc<SubAgentCoordinator>,
}

impl RuntimeHost {
    async fn build(config: &Config) -> anyhow::Result<Self> {
        let config = config.clone();
        let data_root = config.data_root();
        let api_keys = covey_config::resolve_api_keys(&config);
        let agents = Arc::new(config.agent_registry());

        let providers: Arc<dyn ProviderFactory> = Arc::new(ConfigProviderFactory {
            config: config.clone(),
            api_keys,
        });

        let mut registry = ToolRegistry::new();
        registry.register(ShellExecuteTool {
            timeout_secs: config.tools.shell_timeout_secs,
        });
        let search_key = config
            .tools
            .web_search
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        registry.register(WebSearchTool::new(
            config.tools.web_search.endpoint.clone(),
            search_key,
        ));
        registry.register(SubAgentsTool);
        let registry = Arc::new(registry);

        let hooks = Arc::new(HookBus::new());
        hooks.subscribe(Arc::new(HookMetrics::new()));
        hooks.subscribe(Arc::new(MemoryCapture::new(data_root.join("memory"))));

        let store: Arc<dyn RunStore> = match config.subagents.store_mode {
            StoreMode::Memory => Arc::new(MemoryRunStore::new()),
            StoreMode::File => {
                let path = config
                    .subagents
                    .store_path
                    .clone()
                    .unwrap_or_else(|| data_root.join("subagents").join("runs.json"));
                Arc::new(FileRunStore::new(path))
            }
        };
        let coordinator = SubAgentCoordinator::new(config.subagents.clone(), store).await;
        let executor = AgentRunExecutor::new(
            agents.clone(),
            providers.clone(),
            registry.clone(),
            hooks.clone(),
            data_root,
        );
        executor.attach(&coordinator);

        Ok(Self {
            config,
            agents,
            providers,
            registry,
            hooks,
            coordinator,
        })
    }

    async fn run_single(
        &self,
        agent_id: &str,
        prompt: &str,
        grant_access: bool,
    ) -> anyhow::Result<()> {
        let agent = self
            .config
            .agent(agent_id)
            .cloned()
            .with_context(|| format!("agent '{agent_id}' is not configured"))?;
        let provider = self.providers.create(&agent.provider, &agent.model)?;

        let run_id = uuid_like();
        let workspace = self.workspace_for(&agent.id);
        tokio::fs::create_dir_all(&workspace).await.ok();

        let runtime = SubAgentRuntime::new(
            self.coordinator.clone(),
            self.agents.clone(),
            0,
            run_id.clone(),
            agent.id.clone(),
            agent.name.clone(),
        );

        let mut context = ExecutionContext::for_agent(
            run_id,
            agent.id.clone(),
            agent.name.clone(),
            agent.provider.clone(),
        );
        context.tool_access_mode = agent.access_mode;
        context.tool_access_granted = grant_access;
        context.agent_workspace_root = workspace;
        context.subagents = Some(Arc::new(runtime));
        context.hooks = Some(self.hooks.clone());

        let outcome = run_agent_turn(TurnRequest {
            agent,
            history: vec![Message::user(prompt)],
            provider,
            available_tools: self.registry.get_all(),
            context,
            hooks: self.hooks.clone(),
        })
        .await?;

        println!("{}", outcome.message.content);
        if let Some(summary) = outcome.message.tool_execution {
            eprintln!(
                "[tools: attempted={} succeeded={} failed={} malformed={} file_effects={} shell_effects={}]",
                summary.attempted,
                summary.succeeded,
                summary.failed,
                summary.malformed,
                summary.verified_file_effects,
                summary.verified_shell_effects,
            );
        }
        Ok(())
    }

    async fn run_squad(
        &self,
        squad_id: &str,
        goal: &str,
        grant_access: bool,
    ) -> anyhow::Result<()> {
        let config = self
            .config
            .squad(squad_id)
            .cloned()
            .with_context(|| format!("squad '{squad_id}' is not configured"))?;
        let api_keys = covey_config::resolve_api_keys(&self.config);
        let runtime = resolve_squad(config, &self.agents, &api_keys)?;

        let engine = SquadEngine {
            runtime,
            providers: self.providers.clone(),
            available_tools: self.registry.get_all(),
            hooks: self.hooks.clone(),
            grant_tool_access: grant_access,
        };

        let on_step = |step: &SquadStep, _all: &[SquadStep]| {
            eprintln!(
                "[{}] {} ← {}",
                step.iteration, step.worker_name, step.instruction
            );
        };
        let outcome = engine.run(goal, Some(&on_step)).await?;
        println!("{}", outcome.response);
        eprintln!("[squad finished: {:?}, {} steps]", outcome.status, outcome.steps.len());
        Ok(())
    }

    fn workspace_for(&self, agent_id: &str) -> PathBuf {
        self.config
            .data_root()
            .join("agents")
            .join(agent_id)
            .join("workspace")
    }
}

fn uuid_like() -> String {
    uuid::Uuid::new_v4().to_string()
}
