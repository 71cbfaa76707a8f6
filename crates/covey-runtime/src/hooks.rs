// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process hook bus for runtime lifecycle events.
//!
//! Six topics cover the life of an agent run: prompt assembly
//! (`prompt_before` / `prompt_after`), tool execution (`tool_before` /
//! `tool_after`), response synthesis (`response_stream`), and completion
//! (`run_end`).  Subscribers are called synchronously in registration order;
//! the subscriber list is snapshotted per emission so a subscriber that
//! registers another subscriber never mutates the list mid-fanout.

use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Fired before the system prompt is finalized.  Subscribers may mutate the
/// prompt text and append to the appendix list; the engine merges appendices
/// after all subscribers have run.
pub struct PromptBeforeEvent<'a> {
    pub run_id: &'a str,
    pub agent_id: &'a str,
    pub system_prompt: &'a mut String,
    pub user_prompt: &'a str,
    pub context_message_count: usize,
    pub system_prompt_appendices: &'a mut Vec<String>,
}

/// Fired after appendix merging.  Subscribers may replace the final prompt.
pub struct PromptAfterEvent<'a> {
    pub run_id: &'a str,
    pub agent_id: &'a str,
    pub prompt: &'a mut String,
}

pub struct ToolBeforeEvent<'a> {
    pub run_id: &'a str,
    pub tool_id: &'a str,
    pub tool_name: &'a str,
    pub args: &'a Value,
}

pub struct ToolAfterEvent<'a> {
    pub run_id: &'a str,
    pub tool_id: &'a str,
    /// The tool result serialized to JSON so subscribers stay decoupled from
    /// the tools crate's concrete result type.
    pub result: &'a Value,
    pub ok: bool,
    pub duration_ms: u64,
}

/// Fired once per synthesized response chunk.  Subscribers may rewrite the
/// chunk (the redactor masks secrets here).
pub struct ResponseStreamEvent<'a> {
    pub run_id: &'a str,
    pub chunk: &'a mut String,
    pub chunk_index: usize,
    pub metadata: &'a Value,
}

pub struct RunEndEvent<'a> {
    pub run_id: &'a str,
    pub agent_id: &'a str,
    pub status: &'a str,
    pub duration_ms: u64,
    pub output: &'a mut String,
}

/// A hook bus subscriber.  Every method has a no-op default so subscribers
/// implement only the topics they care about.
pub trait HookSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn prompt_before(&self, _ev: &mut PromptBeforeEvent<'_>) {}
    fn prompt_after(&self, _ev: &mut PromptAfterEvent<'_>) {}
    fn tool_before(&self, _ev: &ToolBeforeEvent<'_>) {}
    fn tool_after(&self, _ev: &ToolAfterEvent<'_>) {}
    fn response_stream(&self, _ev: &mut ResponseStreamEvent<'_>) {}
    fn run_end(&self, _ev: &mut RunEndEvent<'_>) {}
}

/// Process-wide pub/sub registry for [`HookSubscriber`]s.
///
/// Constructed once at startup and passed down by `Arc`; there is
/// deliberately no global default instance so tests and multi-tenant hosts
/// can run isolated buses.
#[derive(Default)]
pub struct HookBus {
    subscribers: RwLock<Vec<Arc<dyn HookSubscriber>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn HookSubscriber>) {
        self.subscribers
            .write()
            .expect("hook registry lock poisoned")
            .push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("hook registry lock poisoned")
            .len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn HookSubscriber>> {
        self.subscribers
            .read()
            .expect("hook registry lock poisoned")
            .clone()
    }

    pub fn emit_prompt_before(&self, ev: &mut PromptBeforeEvent<'_>) {
        for s in self.snapshot() {
            s.prompt_before(ev);
        }
    }

    pub fn emit_prompt_after(&self, ev: &mut PromptAfterEvent<'_>) {
        for s in self.snapshot() {
            s.prompt_after(ev);
        }
    }

    pub fn emit_tool_before(&self, ev: &ToolBeforeEvent<'_>) {
        for s in self.snapshot() {
            s.tool_before(ev);
        }
    }

    pub fn emit_tool_after(&self, ev: &ToolAfterEvent<'_>) {
        for s in self.snapshot() {
            s.tool_after(ev);
        }
    }

    pub fn emit_response_stream(&self, ev: &mut ResponseStreamEvent<'_>) {
        for s in self.snapshot() {
            s.response_stream(ev);
        }
    }

    pub fn emit_run_end(&self, ev: &mut RunEndEvent<'_>) {
        for s in self.snapshot() {
            s.run_end(ev);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
