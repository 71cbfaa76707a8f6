// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};

use crate::hooks::{HookSubscriber, PromptBeforeEvent, RunEndEvent, ToolAfterEvent};

/// Counters and timings collected from the hook bus.
///
/// All fields are relaxed atomics; the numbers feed status displays and
/// logs, not billing.
#[derive(Default)]
pub struct HookMetrics {
    prompts: AtomicU64,
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
    tool_time_ms: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub prompts: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub tool_time_ms: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
}

impl HookMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            prompts: self.prompts.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            tool_time_ms: self.tool_time_ms.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
        }
    }
}

impl HookSubscriber for HookMetrics {
    fn name(&self) -> &str {
        "metrics"
    }

    fn prompt_before(&self, _ev: &mut PromptBeforeEvent<'_>) {
        self.prompts.fetch_add(1, Ordering::Relaxed);
    }

    fn tool_after(&self, ev: &ToolAfterEvent<'_>) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        self.tool_time_ms.fetch_add(ev.duration_ms, Ordering::Relaxed);
        if !ev.ok {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn run_end(&self, ev: &mut RunEndEvent<'_>) {
        if ev.status == "completed" {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookBus;
    use std::sync::Arc;

    #[test]
    fn tool_after_accumulates_calls_and_time() {
        let bus = HookBus::new();
        let metrics = Arc::new(HookMetrics::new());
        bus.subscribe(metrics.clone());

        let result = serde_json::json!({"ok": true});
        for i in 0..3 {
            let ev = crate::hooks::ToolAfterEvent {
                run_id: "r",
                tool_id: "t",
                result: &result,
                ok: i != 2,
                duration_ms: 10,
            };
            bus.emit_tool_after(&ev);
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.tool_calls, 3);
        assert_eq!(snap.tool_errors, 1);
        assert_eq!(snap.tool_time_ms, 30);
    }

    #[test]
    fn run_end_distinguishes_completed_from_failed() {
        let metrics = HookMetrics::new();
        let mut out = String::new();
        let mut ev = crate::hooks::RunEndEvent {
            run_id: "r",
            agent_id: "a",
            status: "completed",
            duration_ms: 1,
            output: &mut out,
        };
        metrics.run_end(&mut ev);
        let mut ev2 = crate::hooks::RunEndEvent {
            run_id: "r2",
            agent_id: "a",
            status: "failed",
            duration_ms: 1,
            output: &mut out,
        };
        metrics.run_end(&mut ev2);
        let snap = metrics.snapshot();
        assert_eq!(snap.runs_completed, 1);
        assert_eq!(snap.runs_failed, 1);
    }
}
