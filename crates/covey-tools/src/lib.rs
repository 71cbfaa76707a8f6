// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool abstraction: registry, canonical tool ids, the provider-tool
//! manifest, argument validation, and the built-in tools.

pub mod args;
pub mod builtin;
mod canonical;
mod context;
mod manifest;
mod registry;
mod subagent;
mod tool;

pub use args::{call_signature, decode_arguments, stable_stringify, validate_and_coerce,
    ValidationOutcome};
pub use canonical::{
    normalize_tool_ids, CANONICAL_TOOL_IDS, MCP_ALL_TOOL_ID, MCP_TOOL_ID_PREFIX,
    SHELL_EXECUTE_TOOL_ID, SUBAGENTS_TOOL_ID, WEB_SEARCH_TOOL_ID,
};
pub use context::{ExecutionContext, SecretValue};
pub use manifest::{sanitize_provider_tool_name, ProviderToolManifest, ToolDeclaration};
pub use registry::ToolRegistry;
pub use subagent::{RunStatus, SpawnRequest, SubAgentHandle, SubAgentRunState};
pub use tool::{Artifact, ArtifactKind, Check, Tool, ToolResult};
