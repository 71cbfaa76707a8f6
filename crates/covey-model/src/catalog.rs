// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog and capability matrix.
//!
//! The bundled `models.yaml` answers four questions per provider/model pair:
//! is it deprecated (and what replaces it), can it chat at all, does it
//! support native tool calling, and does it accept a reasoning budget.
//! Models missing from the catalog get conservative heuristics so unknown
//! fine-tunes and proxies still work.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-sonnet-4-5").
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub provider: String,
    /// Total context window in tokens (input + output).
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// Whether this is a chat model at all (filters STT/TTS/embedding/
    /// moderation/guard models out of agent use).
    #[serde(default)]
    pub chat: bool,
    /// Whether the model supports native tool calling.
    #[serde(default)]
    pub tool_use: bool,
    /// Whether the model accepts a reasoning-effort parameter.
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub deprecated: bool,
    /// Replacement model id used when `deprecated` is set.
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// All entries from the bundled static catalog.
pub fn static_catalog() -> &'static [ModelCatalogEntry] {
    static CATALOG: OnceLock<Vec<ModelCatalogEntry>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let yaml = include_str!("../models.yaml");
        let file: CatalogFile =
            serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
        file.models
    })
}

/// Look up a single model by provider and id (or display name).
pub fn lookup(provider: &str, model: &str) -> Option<&'static ModelCatalogEntry> {
    static_catalog()
        .iter()
        .find(|e| e.provider == provider && (e.id == model || e.name == model))
}

/// Providers known to return native tool calls through their chat API.
const NATIVE_TOOL_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "google",
    "groq",
    "openrouter",
    "mistral",
    "deepseek",
    "mock",
];

pub fn provider_supports_native_tools(provider: &str) -> bool {
    NATIVE_TOOL_PROVIDERS.contains(&provider)
}

/// Replacement model id when the pair is known-deprecated.
pub fn deprecation_fallback(provider: &str, model: &str) -> Option<&'static str> {
    let entry = lookup(provider, model)?;
    if entry.deprecated {
        entry.fallback.as_deref()
    } else {
        None
    }
}

/// Id substrings that mark non-chat model families.  Applied only when the
/// model is absent from the catalog.
const NON_CHAT_MARKERS: &[&str] = &[
    "whisper",
    "tts",
    "embed",
    "moderation",
    "guard",
    "audio",
    "rerank",
];

/// Whether the model can participate in a chat completion at all.
pub fn is_chat_capable(provider: &str, model: &str) -> bool {
    if let Some(entry) = lookup(provider, model) {
        return entry.chat;
    }
    let lower = model.to_ascii_lowercase();
    !NON_CHAT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether the provider/model pair supports native tool calling.
///
/// Unknown models on a tool-capable provider get the benefit of the doubt
/// as long as they look chat-capable; the adapter's `tool_use_failed`
/// recovery handles the optimism being wrong.
pub fn supports_tool_use(provider: &str, model: &str) -> bool {
    if !provider_supports_native_tools(provider) {
        return false;
    }
    if let Some(entry) = lookup(provider, model) {
        return entry.tool_use;
    }
    is_chat_capable(provider, model)
}

/// Whether the pair accepts a reasoning-effort parameter.  Unknown models
/// are assumed not to — sending the parameter to a model that rejects it is
/// a hard API error, so the conservative answer wins.
pub fn supports_reasoning_effort(provider: &str, model: &str) -> bool {
    lookup(provider, model).map(|e| e.reasoning).unwrap_or(false)
}

/// Context window for the pair: catalog first, id inference second.
pub fn context_window_for(provider: &str, model: &str) -> Option<u32> {
    if let Some(entry) = lookup(provider, model) {
        if entry.context_window > 0 {
            return Some(entry.context_window);
        }
    }
    infer_context_window(model)
}

/// Infer a context window from the model id alone.
///
/// Two patterns are recognized: `<N>k` (e.g. "mistral-32k-instruct" →
/// 32 000) and a raw 4–6 digit integer in `[4096, 1_000_000]` (e.g.
/// "llama-3-8b-262144").  Anything else is unknown.
pub fn infer_context_window(model: &str) -> Option<u32> {
    let lower = model.to_ascii_lowercase();

    let k_pattern = regex::Regex::new(r"(\d{1,4})k\b").expect("static regex");
    if let Some(caps) = k_pattern.captures(&lower) {
        if let Ok(n) = caps[1].parse::<u32>() {
            let window = n.saturating_mul(1000);
            if (4096..=1_000_000).contains(&window) {
                return Some(window);
            }
        }
    }

    let raw_pattern = regex::Regex::new(r"(?:^|[^\d])(\d{4,6})(?:[^\d]|$)").expect("static regex");
    if let Some(caps) = raw_pattern.captures(&lower) {
        if let Ok(n) = caps[1].parse::<u32>() {
            if (4096..=1_000_000).contains(&n) {
                return Some(n);
            }
        }
    }
    None
}

/// How long a provider keeps a prompt prefix in its cache (milliseconds).
/// Used by the context manager to prune tool results that can no longer be
/// served from cache anyway.
pub fn cache_ttl_ms(provider: &str) -> u64 {
    match provider {
        "openai" | "anthropic" | "google" => 300_000,
        "groq" => 180_000,
        _ => 240_000,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
