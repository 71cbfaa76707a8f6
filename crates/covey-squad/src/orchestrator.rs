// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The squad loop: ask the director for a decision, dispatch the chosen
//! worker through the agent turn engine, verify its side-effects, repeat.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};

use covey_config::{AccessMode, AgentConfig, InteractionMode, UserTurnPolicy};
use covey_core::{run_agent_turn, TurnRequest};
use covey_model::{ChatOptions, Message, ProviderFactory, ToolExecutionSummary};
use covey_runtime::hooks::HookBus;
use covey_tools::{ExecutionContext, Tool, MCP_ALL_TOOL_ID};

use crate::director::{decision_schema_instructions, extract_decision, DirectorStatus};
use crate::expect::{infer_expectation, verify_execution};
use crate::runtime::SquadRuntime;

const DIRECTOR_TEMPERATURE: f32 = 0.2;
const DIRECTOR_MAX_TOKENS: u32 = 1_200;
/// Worker response text kept in the director transcript.
const STEP_EXCERPT_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquadStatus {
    Completed,
    NeedsUserInput,
    Blocked,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct SquadStep {
    pub iteration: u32,
    pub worker_id: String,
    pub worker_name: String,
    pub instruction: String,
    pub decision_summary: String,
    pub response: String,
    pub summary: ToolExecutionSummary,
    pub verified: bool,
    pub retried: bool,
}

#[derive(Debug, Clone)]
pub struct SquadOutcome {
    pub status: SquadStatus,
    pub response: String,
    pub steps: Vec<SquadStep>,
}

/// Step observer: receives the new step and a snapshot of all completed
/// steps so far.
pub type StepCallback = dyn Fn(&SquadStep, &[SquadStep]) + Send + Sync;

pub struct SquadEngine {
    pub runtime: SquadRuntime,
    pub providers: Arc<dyn ProviderFactory>,
    pub available_tools: Vec<Arc<dyn Tool>>,
    pub hooks: Arc<HookBus>,
    /// Extends privileged-tool access to workers running under `ask_always`.
    pub grant_tool_access: bool,
}

impl SquadEngine {
    pub async fn run(
        &self,
        user_message: &str,
        on_step: Option<&StepCallback>,
    ) -> anyhow::Result<SquadOutcome> {
        let max_iterations = self.runtime.config.max_iterations.max(1);
        let mut steps: Vec<SquadStep> = Vec::new();

        for iteration in 1..=max_iterations {
            let decision_text = self
                .ask_director(user_message, &steps)
                .await
                .context("director call failed")?;
            let decision = extract_decision(&decision_text);
            debug!(iteration, status = ?decision.status, summary = %decision.summary, "director decision");

            match decision.status {
                DirectorStatus::Complete => {
                    return Ok(SquadOutcome {
                        status: SquadStatus::Completed,
                        response: decision.response_to_user.unwrap_or(decision.summary),
                        steps,
                    });
                }
                DirectorStatus::NeedsUserInput => {
                    return Ok(SquadOutcome {
                        status: SquadStatus::NeedsUserInput,
                        response: decision
                            .user_question
                            .unwrap_or_else(|| "The squad needs your input to continue.".into()),
                        steps,
                    });
                }
                DirectorStatus::Blocked => {
                    return Ok(SquadOutcome {
                        status: SquadStatus::Blocked,
                        response: decision.blocker_reason.unwrap_or(decision.summary),
                        steps,
                    });
                }
                DirectorStatus::Continue => {}
            }

            let worker = decision
                .target_agent_id
                .as_deref()
                .and_then(|id| self.runtime.workers.iter().find(|w| w.id == id));
            let (Some(worker), Some(instruction)) = (worker, decision.instruction.clone()) else {
                warn!(
                    target = ?decision.target_agent_id,
                    "director continued without a valid worker and instruction"
                );
                return Ok(SquadOutcome {
                    status: SquadStatus::Blocked,
                    response: "The director selected an unknown worker or gave no \
                               instruction."
                        .to_string(),
                    steps,
                });
            };
            let worker = worker.clone();

            // First attempt.
            let task_prompt = self.worker_prompt(&worker, &instruction);
            let mut history = vec![Message::user(task_prompt)];
            let outcome = self.invoke_worker(&worker, history.clone()).await?;

            let expectation = infer_expectation(&instruction, &worker.tools);
            let mut verified = verify_execution(expectation, &outcome.summary);
            let mut retried = false;
            let mut final_outcome = outcome;

            if let Err(reason) = &verified {
                // One retry with an explicit validation-failed prompt.
                retried = true;
                warn!(worker = %worker.id, reason = %reason, "worker failed execution validation; retrying");
                history.push(final_outcome.message.clone());
                history.push(Message::user(format!(
                    "Validation failed: {reason}. Re-run the instruction and satisfy all \
                     required postconditions via actual tool calls before finalizing \
                     your response."
                )));
                final_outcome = self.invoke_worker(&worker, history).await?;
                verified = verify_execution(expectation, &final_outcome.summary);
            }

            if let Err(reason) = verified {
                return Ok(SquadOutcome {
                    status: SquadStatus::Blocked,
                    response: format!(
                        "{} failed tool execution validation: {reason}",
                        worker.name
                    ),
                    steps,
                });
            }

            let step = SquadStep {
                iteration,
                worker_id: worker.id.clone(),
                worker_name: worker.name.clone(),
                instruction,
                decision_summary: decision.summary,
                response: final_outcome.message.content.clone(),
                summary: final_outcome.summary,
                verified: true,
                retried,
            };
            steps.push(step);
            if let Some(callback) = on_step {
                let step_ref = steps.last().expect("just pushed");
                callback(step_ref, &steps);
            }

            if self.runtime.config.interaction.user_turn_policy == UserTurnPolicy::EveryRound
                && iteration < max_iterations
            {
                let worker_name = &steps.last().expect("just pushed").worker_name;
                return Ok(SquadOutcome {
                    status: SquadStatus::NeedsUserInput,
                    response: format!("{worker_name} completed a turn. What do you do next?"),
                    steps,
                });
            }
        }

        Ok(SquadOutcome {
            status: SquadStatus::MaxIterations,
            response: format!(
                "The squad reached its iteration limit ({max_iterations}) before completion."
            ),
            steps,
        })
    }

    async fn ask_director(
        &self,
        user_message: &str,
        steps: &[SquadStep],
    ) -> anyhow::Result<String> {
        let provider = self
            .providers
            .create(&self.runtime.director_provider, &self.runtime.director_model)?;

        let system = Message::system(self.director_prompt());
        let mut transcript = format!("User request:\n{user_message}\n");
        for step in steps {
            transcript.push_str(&format!(
                "\nIteration {}: {} was instructed: {}\nResult ({} tool calls, {} verified \
                 file effects, {} verified shell effects):\n{}\n",
                step.iteration,
                step.worker_name,
                step.instruction,
                step.summary.attempted,
                step.summary.verified_file_effects,
                step.summary.verified_shell_effects,
                excerpt(&step.response),
            ));
        }
        transcript.push_str("\nWhat is your next decision?");

        let opts = ChatOptions {
            temperature: Some(DIRECTOR_TEMPERATURE),
            max_tokens: Some(DIRECTOR_MAX_TOKENS),
            ..Default::default()
        };
        let outcome = provider
            .chat(&[system, Message::user(transcript)], &opts)
            .await?;
        Ok(outcome.content)
    }

    fn director_prompt(&self) -> String {
        let config = &self.runtime.config;
        let mut prompt = format!(
            "You are {}, the director of squad '{}'.\nSquad goal: {}\n",
            config.orchestrator.name, config.name, config.goal
        );
        if !config.context.trim().is_empty() {
            prompt.push_str(&format!("Context: {}\n", config.context));
        }
        if !config.orchestrator.style.trim().is_empty() {
            prompt.push_str(&format!("Your style: {}\n", config.orchestrator.style));
        }

        prompt.push_str("\nWorkers you can dispatch:\n");
        for worker in &self.runtime.workers {
            prompt.push_str(&format!(
                "- id: {} | name: {} | role: {} | tools: {}\n",
                worker.id,
                worker.name,
                if worker.role.is_empty() { "generalist" } else { worker.role.as_str() },
                if worker.tools.is_empty() {
                    "none".to_string()
                } else {
                    worker.tools.join(", ")
                },
            ));
        }

        match config.interaction.mode {
            InteractionMode::LiveCampaign => prompt.push_str(
                "\nRun this as a live campaign: keep narrative pacing, address the user \
                 in second person, and give each worker a scene-sized task per turn.\n",
            ),
            InteractionMode::MasterLog => prompt.push_str(
                "\nStay task-focused and concise: dispatch the single most useful \
                 worker action per decision, no narration.\n",
            ),
        }
        match config.interaction.user_turn_policy {
            UserTurnPolicy::EveryRound => prompt.push_str(
                "Control returns to the user after every worker turn; plan one turn at \
                 a time.\n",
            ),
            UserTurnPolicy::OnDemand => prompt.push_str(
                "Ask for user input only when genuinely required; otherwise drive the \
                 squad to completion.\n",
            ),
        }

        prompt.push('\n');
        prompt.push_str(decision_schema_instructions());
        prompt
    }

    fn worker_prompt(&self, worker: &AgentConfig, instruction: &str) -> String {
        let config = &self.runtime.config;
        let mut prompt = format!(
            "You are {}, {} in squad '{}'.\nSquad goal: {}\n",
            worker.name,
            if worker.role.is_empty() { "a specialist" } else { worker.role.as_str() },
            config.name,
            config.goal,
        );
        if !config.context.trim().is_empty() {
            prompt.push_str(&format!("Context: {}\n", config.context));
        }
        prompt.push_str(&format!(
            "Place any files you produce under '{}/'.\n",
            self.runtime.workspace
        ));
        if worker.tools.iter().any(|t| t == MCP_ALL_TOOL_ID) {
            prompt.push_str(
                "When producing documents, write them incrementally with your file \
                 tools instead of quoting entire files in chat.\n",
            );
        }
        prompt.push_str(&format!("\nYour instruction:\n{instruction}\n"));
        prompt.push_str(
            "\nComplete the instruction with actual tool calls where needed, then \
             report what you did.",
        );
        prompt
    }

    async fn invoke_worker(
        &self,
        worker: &AgentConfig,
        history: Vec<Message>,
    ) -> anyhow::Result<covey_core::TurnOutcome> {
        let provider = self.providers.create(&worker.provider, &worker.model)?;
        let run_id = uuid::Uuid::new_v4().to_string();

        let mut context = ExecutionContext::for_agent(
            run_id,
            worker.id.clone(),
            worker.name.clone(),
            worker.provider.clone(),
        );
        context.squad_id = Some(self.runtime.config.id.clone());
        context.squad_name = Some(self.runtime.config.name.clone());
        context.tool_access_mode = worker.access_mode;
        context.tool_access_granted =
            self.grant_tool_access || worker.access_mode == AccessMode::FullAccess;
        context.agent_workspace_root = PathBuf::from(&self.runtime.workspace);
        context.hooks = Some(self.hooks.clone());

        run_agent_turn(TurnRequest {
            agent: worker.clone(),
            history,
            provider,
            available_tools: self.available_tools.clone(),
            context,
            hooks: self.hooks.clone(),
        })
        .await
        .with_context(|| format!("worker '{}' turn failed", worker.id))
    }
}

fn excerpt(text: &str) -> String {
    if text.len() <= STEP_EXCERPT_CHARS {
        text.to_string()
    } else {
        let mut end = STEP_EXCERPT_CHARS;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
