// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration schema and loader for the covey runtime.

mod loader;
mod schema;

pub use loader::{default_config_path, load, resolve_api_keys};
pub use schema::{
    AccessMode, AgentConfig, Config, InteractionConfig, InteractionMode, OrchestratorConfig,
    ProviderKeyConfig, ReasoningEffort, SquadConfig, StoreMode, SubAgentLimits, ToolsConfig,
    UserTurnPolicy, WebSearchConfig,
};
