// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-provider credentials and endpoint overrides, keyed by provider id
    /// ("openai" | "anthropic" | "google" | "groq" | "openrouter" | "mock" | …).
    #[serde(default)]
    pub providers: HashMap<String, ProviderKeyConfig>,
    /// Agents available to the runtime, looked up by `AgentConfig::id`.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Squad definitions, looked up by `SquadConfig::id`.
    #[serde(default)]
    pub squads: Vec<SquadConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub subagents: SubAgentLimits,
    /// Root directory for run stores, agent workspaces, and memory files.
    /// Defaults to `./data` relative to the working directory.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
}

impl Config {
    /// Agent lookup table keyed by id.  Later duplicates win, matching the
    /// tool registry's overwrite semantics.
    pub fn agent_registry(&self) -> HashMap<String, AgentConfig> {
        self.agents
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect()
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn squad(&self, id: &str) -> Option<&SquadConfig> {
        self.squads.iter().find(|s| s.id == id)
    }

    pub fn data_root(&self) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeyConfig {
    /// Explicit API key; prefer `api_key_env` in config files to avoid
    /// secrets in version-controlled files.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at load time).
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local proxies or LiteLLM.
    pub base_url: Option<String>,
}

/// Reasoning budget requested from providers that support it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Wire-format string, or `None` when no reasoning budget is requested.
    pub fn as_wire_str(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Low => Some("low"),
            Self::Medium => Some("medium"),
            Self::High => Some("high"),
        }
    }
}

/// Whether privileged tools run freely or require an explicit grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Privileged tools fail with a permission check unless the caller set
    /// `tool_access_granted` on the execution context.
    #[default]
    AskAlways,
    /// Privileged tools run without prompting.
    FullAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Short role description embedded in squad rosters and worker prompts.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Provider id resolved against the model catalog at run time.
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    /// Canonical tool ids granted to this agent.  Normalized (lowercased,
    /// legacy aliases collapsed, unknown ids dropped) before use.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "agent".into(),
            name: "Agent".into(),
            role: String::new(),
            system_prompt: String::new(),
            provider: "mock".into(),
            model: "mock-model".into(),
            reasoning_effort: ReasoningEffort::None,
            tools: Vec::new(),
            access_mode: AccessMode::AskAlways,
            voice_id: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadConfig {
    pub id: String,
    pub name: String,
    pub goal: String,
    #[serde(default)]
    pub context: String,
    /// Member agent ids.  Deduplicated and filtered against the agent
    /// registry when the squad runtime is resolved.
    pub members: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_orchestrator_name")]
    pub name: String,
    /// Provider override for the director model.  When absent the squad
    /// runtime falls back to a worker's provider with a known API key.
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

fn default_orchestrator_name() -> String {
    "Director".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: default_orchestrator_name(),
            provider: None,
            model: None,
            style: String::new(),
            voice_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Task-focused: concise worker reports, no narrative pacing.
    #[default]
    MasterLog,
    /// Narrative pacing rules for game-master style squads.
    LiveCampaign,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTurnPolicy {
    /// The director decides when to hand control back to the user.
    #[default]
    OnDemand,
    /// Control returns to the user after every worker turn.
    EveryRound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default)]
    pub mode: InteractionMode,
    #[serde(default)]
    pub user_turn_policy: UserTurnPolicy,
    #[serde(default = "default_true")]
    pub show_master_log: bool,
    #[serde(default = "default_true")]
    pub show_agent_messages_in_chat: bool,
    #[serde(default)]
    pub include_director_messages_in_chat: bool,
    #[serde(default)]
    pub auto_play_character_voices: bool,
    #[serde(default)]
    pub typewriter_character_messages: bool,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            mode: InteractionMode::MasterLog,
            user_turn_policy: UserTurnPolicy::OnDemand,
            show_master_log: true,
            show_agent_messages_in_chat: true,
            include_director_messages_in_chat: false,
            auto_play_character_voices: false,
            typewriter_character_messages: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default timeout for `shell_execute` commands.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    #[serde(default)]
    pub web_search: WebSearchConfig,
}

fn default_shell_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            web_search: WebSearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Search endpoint; queried with `?q=<query>`.
    pub endpoint: Option<String>,
    /// Environment variable holding the search API key.
    pub api_key_env: Option<String>,
}

/// Backing store for the sub-agent run queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    File,
    Memory,
}

/// Bounds for the recursive sub-agent coordinator.
///
/// Every field has a `SUBAGENT_*` environment override so deployments can be
/// tuned without a config file — see [`SubAgentLimits::with_env_overrides`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentLimits {
    #[serde(default = "d_max_depth")]
    pub max_depth: usize,
    #[serde(default = "d_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "d_max_active_per_parent")]
    pub max_active_runs_per_parent: usize,
    #[serde(default = "d_default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "d_max_task_chars")]
    pub max_task_chars: usize,
    #[serde(default = "d_max_run_output_chars")]
    pub max_run_output_chars: usize,
    #[serde(default = "d_retention_ms")]
    pub finished_run_retention_ms: u64,
    #[serde(default = "d_max_listed_runs")]
    pub max_listed_runs: usize,
    #[serde(default)]
    pub store_mode: StoreMode,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn d_max_depth() -> usize {
    3
}
fn d_max_concurrency() -> usize {
    3
}
fn d_max_active_per_parent() -> usize {
    12
}
fn d_default_timeout_ms() -> u64 {
    120_000
}
fn d_max_timeout_ms() -> u64 {
    600_000
}
fn d_max_task_chars() -> usize {
    12_000
}
fn d_max_run_output_chars() -> usize {
    80_000
}
fn d_retention_ms() -> u64 {
    86_400_000
}
fn d_max_listed_runs() -> usize {
    100
}

impl Default for SubAgentLimits {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            max_concurrency: d_max_concurrency(),
            max_active_runs_per_parent: d_max_active_per_parent(),
            default_timeout_ms: d_default_timeout_ms(),
            max_timeout_ms: d_max_timeout_ms(),
            max_task_chars: d_max_task_chars(),
            max_run_output_chars: d_max_run_output_chars(),
            finished_run_retention_ms: d_retention_ms(),
            max_listed_runs: d_max_listed_runs(),
            store_mode: StoreMode::File,
            store_path: None,
        }
    }
}

impl SubAgentLimits {
    /// Apply `SUBAGENT_*` environment overrides on top of the configured
    /// values.  Unparsable values are ignored with a warning rather than
    /// failing the load.
    pub fn with_env_overrides(mut self) -> Self {
        fn read<T: std::str::FromStr>(name: &str, into: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                match raw.parse::<T>() {
                    Ok(v) => *into = v,
                    Err(_) => {
                        tracing::warn!(var = name, value = %raw, "ignoring unparsable env override")
                    }
                }
            }
        }
        read("SUBAGENT_MAX_DEPTH", &mut self.max_depth);
        read("SUBAGENT_MAX_CONCURRENCY", &mut self.max_concurrency);
        read(
            "SUBAGENT_MAX_ACTIVE_RUNS_PER_PARENT",
            &mut self.max_active_runs_per_parent,
        );
        read("SUBAGENT_DEFAULT_TIMEOUT_MS", &mut self.default_timeout_ms);
        read("SUBAGENT_MAX_TIMEOUT_MS", &mut self.max_timeout_ms);
        read("SUBAGENT_MAX_TASK_CHARS", &mut self.max_task_chars);
        read("SUBAGENT_MAX_OUTPUT_CHARS", &mut self.max_run_output_chars);
        read(
            "SUBAGENT_RUN_RETENTION_MS",
            &mut self.finished_run_retention_ms,
        );
        read("SUBAGENT_MAX_LISTED_RUNS", &mut self.max_listed_runs);
        if let Ok(mode) = std::env::var("SUBAGENT_STORE_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "file" => self.store_mode = StoreMode::File,
                "memory" => self.store_mode = StoreMode::Memory,
                other => {
                    tracing::warn!(value = other, "ignoring unknown SUBAGENT_STORE_MODE")
                }
            }
        }
        if let Ok(path) = std::env::var("SUBAGENT_STORE_PATH") {
            if !path.is_empty() {
                self.store_path = Some(PathBuf::from(path));
            }
        }
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
