// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::schema::Config;

/// Default config file location: `~/.config/covey/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("covey").join("config.yaml"))
}

/// Load configuration from `path`, or from the default location when `None`.
///
/// A missing file is not an error — the built-in defaults are returned so
/// that the runtime works out of the box with the mock provider.  Sub-agent
/// limits always receive their `SUBAGENT_*` environment overrides.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let resolved = match path {
        Some(p) => Some(expand(p)),
        None => default_config_path(),
    };

    let mut config = match resolved {
        Some(ref p) if p.exists() => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading config file {}", p.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing config file {}", p.display()))?
        }
        Some(ref p) => {
            debug!(path = %p.display(), "config file not found; using defaults");
            Config::default()
        }
        None => Config::default(),
    };

    config.subagents = config.subagents.with_env_overrides();
    Ok(config)
}

/// Resolve the API key for each configured provider.
///
/// `api_key` in the config file wins; otherwise `api_key_env` is read from
/// the process environment.  Providers with neither are omitted from the map
/// so callers can distinguish "no key" from "empty key".
pub fn resolve_api_keys(config: &Config) -> HashMap<String, String> {
    let mut keys = HashMap::new();
    for (provider, pk) in &config.providers {
        let key = pk.api_key.clone().or_else(|| {
            pk.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        });
        match key {
            Some(k) if !k.is_empty() => {
                keys.insert(provider.clone(), k);
            }
            _ => debug!(provider = %provider, "no API key resolved"),
        }
    }
    keys
}

fn expand(p: &Path) -> PathBuf {
    let s = p.to_string_lossy();
    PathBuf::from(shellexpand::tilde(s.as_ref()).into_owned())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
