// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use anyhow::bail;
use tracing::warn;

use covey_config::{AgentConfig, SquadConfig};

/// A squad configuration resolved against the agent registry and the set of
/// available API keys, ready to run.
#[derive(Debug, Clone)]
pub struct SquadRuntime {
    pub config: SquadConfig,
    pub workers: Vec<AgentConfig>,
    pub director_provider: String,
    pub director_model: String,
    /// Relative folder where squad artifacts land: `Squads/<slug>`.
    pub workspace: String,
}

/// Filesystem-safe slug: lowercase alphanumerics with single dashes.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "squad".to_string()
    } else {
        out
    }
}

/// Normalize a squad config and resolve its runtime dependencies.
///
/// Members are deduplicated and filtered against the agent registry (with a
/// warning per dropped id); at least one worker must survive.  The director
/// provider/model preference order: explicitly configured, then any
/// worker's provider with a known API key, then the first worker outright.
pub fn resolve_squad(
    config: SquadConfig,
    agents: &HashMap<String, AgentConfig>,
    api_keys: &HashMap<String, String>,
) -> anyhow::Result<SquadRuntime> {
    let mut seen = Vec::new();
    let mut workers = Vec::new();
    for member in &config.members {
        let id = member.trim();
        if id.is_empty() || seen.iter().any(|s: &String| s == id) {
            continue;
        }
        seen.push(id.to_string());
        match agents.get(id) {
            Some(agent) => workers.push(agent.clone()),
            None => warn!(member = id, squad = %config.id, "dropping unresolvable squad member"),
        }
    }
    if workers.is_empty() {
        bail!("squad '{}' has no resolvable members", config.id);
    }

    let (director_provider, director_model) = match &config.orchestrator.provider {
        Some(provider) => {
            let model = config
                .orchestrator
                .model
                .clone()
                .or_else(|| {
                    workers
                        .iter()
                        .find(|w| &w.provider == provider)
                        .map(|w| w.model.clone())
                })
                .unwrap_or_else(|| workers[0].model.clone());
            (provider.clone(), model)
        }
        None => workers
            .iter()
            .find(|w| api_keys.contains_key(&w.provider))
            .map(|w| (w.provider.clone(), w.model.clone()))
            .unwrap_or_else(|| (workers[0].provider.clone(), workers[0].model.clone())),
    };

    let workspace = format!("Squads/{}", slug(&config.name));
    Ok(SquadRuntime {
        config,
        workers,
        director_provider,
        director_model,
        workspace,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
