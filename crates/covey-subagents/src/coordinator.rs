// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The bounded FIFO run queue behind every sub-agent spawn.
//!
//! One coordinator instance serves the whole process.  Runs are pure data
//! in the store; waiters live in an auxiliary map keyed by run id, so
//! cancelling a run drops its waiter entry without any graph cleanup.
//! The pump enforces `active <= max_concurrency` under the state lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use covey_config::SubAgentLimits;
use covey_tools::{RunStatus, SubAgentRunState};

use crate::store::RunStore;
use crate::RESTART_RECOVERY_ERROR;

/// Non-persisted launch parameters for a run.  Lost on restart, which is
/// fine: restart recovery fails every non-terminal run anyway.
#[derive(Debug, Clone, Default)]
pub struct LaunchInfo {
    /// Nesting depth of the run itself (parent depth + 1).
    pub depth: usize,
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
    pub parent_agent_name: String,
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub parent_run_id: Option<String>,
    pub agent_id: String,
    pub agent_name: String,
    pub task: String,
    pub launch: LaunchInfo,
}

/// Executes one run to completion.  Registered once at startup; the
/// indirection keeps the coordinator free of engine dependencies.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, run: SubAgentRunState, launch: LaunchInfo) -> anyhow::Result<String>;
}

struct Inner {
    runs: HashMap<String, SubAgentRunState>,
    queue: VecDeque<String>,
    launches: HashMap<String, LaunchInfo>,
    waiters: HashMap<String, watch::Sender<SubAgentRunState>>,
    active: usize,
}

pub struct SubAgentCoordinator {
    limits: SubAgentLimits,
    store: Arc<dyn RunStore>,
    executor: std::sync::RwLock<Option<Arc<dyn RunExecutor>>>,
    inner: Mutex<Inner>,
}

impl SubAgentCoordinator {
    /// Load the store, apply restart recovery and retention, and return a
    /// ready coordinator.  Call [`Self::set_executor`] before enqueuing.
    pub async fn new(limits: SubAgentLimits, store: Arc<dyn RunStore>) -> Arc<Self> {
        let now = Utc::now();
        let retention = chrono::Duration::milliseconds(limits.finished_run_retention_ms as i64);

        let mut runs = HashMap::new();
        for mut run in store.load().await {
            if run.run_id.is_empty() {
                continue;
            }
            if !run.status.is_terminal() {
                run.status = RunStatus::Failed;
                run.error = Some(RESTART_RECOVERY_ERROR.to_string());
                run.finished_at = Some(now);
            }
            let expired = run
                .finished_at
                .map(|t| now.signed_duration_since(t) > retention)
                .unwrap_or(false);
            if expired {
                debug!(run_id = %run.run_id, "garbage-collecting expired run");
                continue;
            }
            runs.insert(run.run_id.clone(), run);
        }

        let coordinator = Arc::new(Self {
            limits,
            store,
            executor: std::sync::RwLock::new(None),
            inner: Mutex::new(Inner {
                runs,
                queue: VecDeque::new(),
                launches: HashMap::new(),
                waiters: HashMap::new(),
                active: 0,
            }),
        });
        coordinator.persist().await;
        coordinator
    }

    pub fn set_executor(&self, executor: Arc<dyn RunExecutor>) {
        *self
            .executor
            .write()
            .expect("executor lock poisoned") = Some(executor);
    }

    pub fn limits(&self) -> &SubAgentLimits {
        &self.limits
    }

    /// Queue a new run.  Policy rejections come back as synthetic failed
    /// runs and never enter the queue.
    pub async fn enqueue(self: &Arc<Self>, request: EnqueueRequest) -> SubAgentRunState {
        if request.task.chars().count() > self.limits.max_task_chars {
            return SubAgentRunState::rejected(
                request.agent_id,
                request.agent_name,
                truncate_chars(&request.task, 200),
                format!(
                    "Sub-agent task exceeds {} characters.",
                    self.limits.max_task_chars
                ),
            );
        }

        let run = {
            let mut inner = self.inner.lock().await;
            let active_for_parent = inner
                .runs
                .values()
                .filter(|r| {
                    r.parent_run_id.as_deref() == request.parent_run_id.as_deref()
                        && !r.status.is_terminal()
                })
                .count();
            if active_for_parent >= self.limits.max_active_runs_per_parent {
                return SubAgentRunState::rejected(
                    request.agent_id,
                    request.agent_name,
                    request.task,
                    format!(
                        "Parent already has {active_for_parent} active sub-agent runs; \
                         wait for some to finish."
                    ),
                );
            }

            let run = SubAgentRunState {
                run_id: uuid::Uuid::new_v4().to_string(),
                parent_run_id: request.parent_run_id.clone(),
                status: RunStatus::Queued,
                agent_id: request.agent_id.clone(),
                agent_name: request.agent_name.clone(),
                task: request.task.clone(),
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                output: None,
                error: None,
            };
            inner.runs.insert(run.run_id.clone(), run.clone());
            inner.queue.push_back(run.run_id.clone());
            inner.launches.insert(run.run_id.clone(), request.launch);
            run
        };
        self.persist().await;
        self.pump();
        run
    }

    /// Wait for a terminal state, resolving with the current state when the
    /// deadline elapses.  `None` for unknown run ids.
    pub async fn await_run(
        &self,
        run_id: &str,
        timeout_ms: Option<u64>,
    ) -> Option<SubAgentRunState> {
        let mut rx = {
            let mut inner = self.inner.lock().await;
            let run = inner.runs.get(run_id)?.clone();
            if run.status.is_terminal() {
                return Some(run);
            }
            inner
                .waiters
                .entry(run_id.to_string())
                .or_insert_with(|| watch::channel(run.clone()).0)
                .subscribe()
        };

        let timeout = Duration::from_millis(
            timeout_ms
                .unwrap_or(self.limits.default_timeout_ms)
                .min(self.limits.max_timeout_ms),
        );
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let state = rx.borrow().clone();
                if state.status.is_terminal() {
                    return Some(state);
                }
            }
        })
        .await;

        match waited {
            Ok(Some(state)) => Some(state),
            _ => self.inner.lock().await.runs.get(run_id).cloned(),
        }
    }

    /// Runs for one parent (or all runs), newest first, bounded by the
    /// listing cap.  Always deep copies.
    pub async fn list_runs(&self, parent_run_id: Option<&str>) -> Vec<SubAgentRunState> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<SubAgentRunState> = inner
            .runs
            .values()
            .filter(|r| {
                parent_run_id.is_none() || r.parent_run_id.as_deref() == parent_run_id
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(self.limits.max_listed_runs);
        runs
    }

    /// Cooperative cancel: queued runs never start; in-flight work finishes
    /// but its output is discarded.
    pub async fn cancel_run(&self, run_id: &str) -> Option<SubAgentRunState> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if !inner.runs.contains_key(run_id) {
                return None;
            }
            inner.queue.retain(|id| id.as_str() != run_id);
            let run = inner.runs.get_mut(run_id)?;
            if !run.status.is_terminal() {
                run.status = RunStatus::Cancelled;
                run.finished_at = Some(Utc::now());
            }
            run.clone()
        };
        self.persist().await;
        self.notify(&snapshot).await;
        Some(snapshot)
    }

    /// Currently executing run count (tests and status displays).
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active
    }

    fn pump(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.pump_inner().await });
    }

    async fn pump_inner(self: Arc<Self>) {
        loop {
            let executor = match self.executor.read() {
                Ok(guard) => guard.clone(),
                Err(_) => return,
            };
            let Some(executor) = executor else {
                warn!("sub-agent run queued with no executor registered");
                return;
            };

            let dispatched = {
                let mut inner = self.inner.lock().await;
                if inner.active >= self.limits.max_concurrency {
                    return;
                }
                let Some(run_id) = inner.queue.pop_front() else {
                    return;
                };
                let launch = inner.launches.get(&run_id).cloned().unwrap_or_default();
                match inner.runs.get_mut(&run_id) {
                    // A run cancelled while queued is skipped entirely.
                    Some(run) if run.status == RunStatus::Queued => {
                        run.status = RunStatus::Running;
                        run.started_at = Some(Utc::now());
                        let result = Some((run.clone(), launch));
                        inner.active += 1;
                        result
                    }
                    _ => None,
                }
            };

            let Some((run, launch)) = dispatched else {
                continue;
            };
            self.persist().await;

            let this = Arc::clone(&self);
            let run_id = run.run_id.clone();
            tokio::spawn(async move {
                let result = executor.execute(run, launch).await;
                this.complete(run_id, result).await;
            });
        }
    }

    async fn complete(self: &Arc<Self>, run_id: String, result: anyhow::Result<String>) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.active = inner.active.saturating_sub(1);
            inner.launches.remove(&run_id);
            let Some(run) = inner.runs.get_mut(&run_id) else {
                return;
            };
            // Output of a run cancelled while in flight is discarded.
            if run.status == RunStatus::Running {
                match result {
                    Ok(output) => {
                        run.status = RunStatus::Completed;
                        run.output = Some(cap_output(
                            output,
                            self.limits.max_run_output_chars,
                        ));
                    }
                    Err(e) => {
                        run.status = RunStatus::Failed;
                        run.error = Some(e.to_string());
                    }
                }
                run.finished_at = Some(Utc::now());
            }
            run.clone()
        };
        self.persist().await;
        self.notify(&snapshot).await;
        // The freed slot may unblock the next queued run.
        self.pump();
    }

    async fn notify(&self, state: &SubAgentRunState) {
        let mut inner = self.inner.lock().await;
        if let Some(sender) = inner.waiters.get(&state.run_id) {
            let _ = sender.send(state.clone());
        }
        if state.status.is_terminal() {
            inner.waiters.remove(&state.run_id);
        }
    }

    async fn persist(&self) {
        let snapshot: Vec<SubAgentRunState> = {
            let inner = self.inner.lock().await;
            let mut runs: Vec<SubAgentRunState> = inner.runs.values().cloned().collect();
            runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            runs
        };
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "failed to persist sub-agent run store");
        }
    }
}

fn cap_output(mut output: String, max_chars: usize) -> String {
    if output.chars().count() <= max_chars {
        return output;
    }
    output = output.chars().take(max_chars).collect();
    output.push_str(&format!(
        "\n\n[truncated: output exceeded {max_chars} chars]"
    ));
    output
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRunStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Executor whose runs block until the test releases permits, recording
    /// the peak number of concurrently running executions.
    struct GateExecutor {
        gate: Semaphore,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GateExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RunExecutor for GateExecutor {
        async fn execute(
            &self,
            run: SubAgentRunState,
            _launch: LaunchInfo,
        ) -> anyhow::Result<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _permit = self.gate.acquire().await?;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("output for {}", run.task))
        }
    }

    /// Executor that finishes immediately.
    struct InstantExecutor;

    #[async_trait]
    impl RunExecutor for InstantExecutor {
        async fn execute(
            &self,
            run: SubAgentRunState,
            _launch: LaunchInfo,
        ) -> anyhow::Result<String> {
            Ok(format!("done: {}", run.task))
        }
    }

    fn limits() -> SubAgentLimits {
        SubAgentLimits {
            max_concurrency: 2,
            ..SubAgentLimits::default()
        }
    }

    fn request(task: &str) -> EnqueueRequest {
        EnqueueRequest {
            parent_run_id: Some("parent-run".into()),
            agent_id: "child".into(),
            agent_name: "Child".into(),
            task: task.into(),
            launch: LaunchInfo::default(),
        }
    }

    #[tokio::test]
    async fn run_completes_with_output() {
        let coordinator =
            SubAgentCoordinator::new(limits(), Arc::new(MemoryRunStore::new())).await;
        coordinator.set_executor(Arc::new(InstantExecutor));

        let run = coordinator.enqueue(request("say hi")).await;
        assert_eq!(run.status, RunStatus::Queued);

        let finished = coordinator
            .await_run(&run.run_id, Some(5_000))
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.output.as_deref(), Some("done: say hi"));
        assert!(finished.started_at.is_some());
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let coordinator =
            SubAgentCoordinator::new(limits(), Arc::new(MemoryRunStore::new())).await;
        let executor = GateExecutor::new();
        coordinator.set_executor(executor.clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(coordinator.enqueue(request(&format!("t{i}"))).await.run_id);
        }
        // Give the pump time to fill both slots.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.active_count().await, 2);

        executor.gate.add_permits(16);
        for id in &ids {
            let run = coordinator.await_run(id, Some(5_000)).await.unwrap();
            assert_eq!(run.status, RunStatus::Completed);
        }
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(coordinator.active_count().await, 0);
    }

    #[tokio::test]
    async fn per_parent_cap_rejects_excess_runs() {
        let l = SubAgentLimits {
            max_active_runs_per_parent: 2,
            max_concurrency: 1,
            ..SubAgentLimits::default()
        };
        let coordinator = SubAgentCoordinator::new(l, Arc::new(MemoryRunStore::new())).await;
        let executor = GateExecutor::new();
        coordinator.set_executor(executor.clone());

        coordinator.enqueue(request("one")).await;
        coordinator.enqueue(request("two")).await;
        let third = coordinator.enqueue(request("three")).await;
        assert_eq!(third.status, RunStatus::Failed);
        assert!(third.error.unwrap().contains("active sub-agent runs"));
        executor.gate.add_permits(8);
    }

    #[tokio::test]
    async fn oversized_task_is_rejected() {
        let l = SubAgentLimits {
            max_task_chars: 10,
            ..SubAgentLimits::default()
        };
        let coordinator = SubAgentCoordinator::new(l, Arc::new(MemoryRunStore::new())).await;
        coordinator.set_executor(Arc::new(InstantExecutor));
        let run = coordinator.enqueue(request("this task is far too long")).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("exceeds 10 characters"));
    }

    #[tokio::test]
    async fn await_times_out_with_current_state() {
        let coordinator =
            SubAgentCoordinator::new(limits(), Arc::new(MemoryRunStore::new())).await;
        let executor = GateExecutor::new();
        coordinator.set_executor(executor.clone());

        let run = coordinator.enqueue(request("slow")).await;
        let state = coordinator.await_run(&run.run_id, Some(100)).await.unwrap();
        assert!(!state.status.is_terminal(), "timeout returns live state");
        executor.gate.add_permits(8);
    }

    #[tokio::test]
    async fn await_unknown_run_is_none() {
        let coordinator =
            SubAgentCoordinator::new(limits(), Arc::new(MemoryRunStore::new())).await;
        assert!(coordinator.await_run("ghost", Some(10)).await.is_none());
    }

    #[tokio::test]
    async fn cancel_queued_run_never_executes() {
        let l = SubAgentLimits {
            max_concurrency: 1,
            ..SubAgentLimits::default()
        };
        let coordinator = SubAgentCoordinator::new(l, Arc::new(MemoryRunStore::new())).await;
        let executor = GateExecutor::new();
        coordinator.set_executor(executor.clone());

        let first = coordinator.enqueue(request("blocker")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = coordinator.enqueue(request("victim")).await;

        let cancelled = coordinator.cancel_run(&second.run_id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        executor.gate.add_permits(8);
        let first_done = coordinator.await_run(&first.run_id, Some(5_000)).await.unwrap();
        assert_eq!(first_done.status, RunStatus::Completed);

        // The cancelled run must still be cancelled, with no output.
        let second_final = coordinator.await_run(&second.run_id, Some(100)).await.unwrap();
        assert_eq!(second_final.status, RunStatus::Cancelled);
        assert!(second_final.output.is_none());
    }

    #[tokio::test]
    async fn restart_recovery_fails_interrupted_and_gcs_expired() {
        let store = Arc::new(MemoryRunStore::new());
        let now = Utc::now();
        let mut running = SubAgentRunState::rejected("a", "A", "interrupted task", "seed");
        running.run_id = "r1".into();
        running.status = RunStatus::Running;
        running.error = None;
        running.finished_at = None;

        let mut expired = SubAgentRunState::rejected("a", "A", "old task", "seed");
        expired.run_id = "r2".into();
        expired.status = RunStatus::Completed;
        expired.error = None;
        expired.finished_at =
            Some(now - chrono::Duration::milliseconds(86_400_000 + 60_000));

        store.save(&[running, expired]).await.unwrap();

        let coordinator = SubAgentCoordinator::new(SubAgentLimits::default(), store).await;
        let runs = coordinator.list_runs(None).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "r1");
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(
            runs[0].error.as_deref(),
            Some("interrupted by process restart")
        );
    }

    #[tokio::test]
    async fn long_output_is_truncated_with_notice() {
        struct BigOutputExecutor;
        #[async_trait]
        impl RunExecutor for BigOutputExecutor {
            async fn execute(
                &self,
                _run: SubAgentRunState,
                _launch: LaunchInfo,
            ) -> anyhow::Result<String> {
                Ok("z".repeat(100))
            }
        }
        let l = SubAgentLimits {
            max_run_output_chars: 50,
            ..SubAgentLimits::default()
        };
        let coordinator = SubAgentCoordinator::new(l, Arc::new(MemoryRunStore::new())).await;
        coordinator.set_executor(Arc::new(BigOutputExecutor));
        let run = coordinator.enqueue(request("big")).await;
        let done = coordinator.await_run(&run.run_id, Some(5_000)).await.unwrap();
        let output = done.output.unwrap();
        assert!(output.contains("[truncated: output exceeded 50 chars]"));
        assert!(output.starts_with(&"z".repeat(50)));
    }

    #[tokio::test]
    async fn list_runs_is_newest_first_and_capped() {
        let l = SubAgentLimits {
            max_listed_runs: 3,
            max_active_runs_per_parent: 100,
            ..SubAgentLimits::default()
        };
        let coordinator = SubAgentCoordinator::new(l, Arc::new(MemoryRunStore::new())).await;
        coordinator.set_executor(Arc::new(InstantExecutor));
        for i in 0..6 {
            let run = coordinator.enqueue(request(&format!("t{i}"))).await;
            coordinator.await_run(&run.run_id, Some(5_000)).await;
        }
        let runs = coordinator.list_runs(Some("parent-run")).await;
        assert_eq!(runs.len(), 3);
        assert!(runs[0].created_at >= runs[1].created_at);
    }
}
