// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{ChatOptions, ChatOutcome, Message};

/// Errors surfaced by provider adapters.
///
/// Engine policy: `ToolUseFailed` is recovered in the adapter where
/// possible; everything else propagates to the caller, which converts fatal
/// configuration problems into synthesized assistant messages rather than
/// letting them escape the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("native tool call failed; best-effort payload: {failed_generation}")]
    ToolUseFailed { failed_generation: String },
    #[error("schema-violating provider response: {0}")]
    Schema(String),
    #[error("{0}")]
    Other(String),
}

/// Uniform view of one provider + model combination.
///
/// Capability questions (tool use, reasoning, context window) are answered
/// by the catalog, not the adapter — adapters only speak the wire format.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id: "openai" | "anthropic" | "google" | "groq" | "mock" | …
    fn provider_id(&self) -> &str;

    /// Model id forwarded to the provider API.
    fn model_id(&self) -> &str;

    /// Whether this provider can return native tool calls.
    ///
    /// Default reads the catalog's provider-level capability; adapters for
    /// providers absent from the catalog should override.
    fn supports_native_tool_calling(&self) -> bool {
        crate::catalog::provider_supports_native_tools(self.provider_id())
    }

    async fn chat(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError>;
}

/// Creates [`ChatProvider`] instances on demand.
///
/// The squad orchestrator and the sub-agent executor both need to construct
/// providers for arbitrary provider/model pairs at run time; routing that
/// through a factory keeps them testable with scripted mocks.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, provider: &str, model: &str) -> anyhow::Result<Arc<dyn ChatProvider>>;
}
