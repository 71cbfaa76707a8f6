// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider client layer: a capability-aware, uniform view of every LLM
//! provider the runtime can talk to.

pub mod catalog;
mod mock;
mod openai_compat;
pub mod provider;
mod recovery;
mod types;

pub use mock::{MockChatProvider, ScriptedChatProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ChatProvider, ProviderError, ProviderFactory};
pub use recovery::recover_tool_calls;
pub use types::{
    ChatOptions, ChatOutcome, Message, ProviderToolDecl, ResponseFormat, Role, ToolCallRequest,
    ToolChoice, ToolExecutionSummary, Usage,
};
