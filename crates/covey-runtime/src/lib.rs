// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared runtime plumbing: the hook bus, the JSON recovery parser, and the
//! built-in hook subscribers (secret redaction, metrics, memory capture).
//!
//! This crate has no sibling dependencies so every other crate can use it.

pub mod hooks;
pub mod json;
pub mod memory;
pub mod observe;
pub mod redact;

pub use hooks::{
    HookBus, HookSubscriber, PromptAfterEvent, PromptBeforeEvent, ResponseStreamEvent,
    RunEndEvent, ToolAfterEvent, ToolBeforeEvent,
};
pub use json::{extract_first_json_object, parse_json_with_recovery, parse_object_with_recovery};
pub use memory::MemoryCapture;
pub use observe::{HookMetrics, MetricsSnapshot};
pub use redact::SecretRedactor;
