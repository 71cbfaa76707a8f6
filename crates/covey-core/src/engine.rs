// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The per-agent tool-use loop.
//!
//! One call to [`run_agent_turn`] answers one user turn: it assembles the
//! prompt under the model's token budget, drives provider calls, validates
//! and executes the tool calls they return, and feeds results back until the
//! model stops calling tools or the budget runs out.  Configuration problems
//! never escape as errors — they come back as synthesized assistant messages
//! so the embedding process keeps running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use covey_config::{AccessMode, AgentConfig, ReasoningEffort};
use covey_model::{
    catalog, ChatOptions, ChatProvider, Message, ProviderToolDecl, ToolChoice,
    ToolExecutionSummary,
};
use covey_runtime::hooks::{
    HookBus, PromptAfterEvent, PromptBeforeEvent, ResponseStreamEvent, RunEndEvent,
    ToolAfterEvent, ToolBeforeEvent,
};
use covey_tools::{
    call_signature, decode_arguments, normalize_tool_ids, validate_and_coerce, Check,
    ExecutionContext, ProviderToolManifest, Tool, ToolResult, MCP_TOOL_ID_PREFIX,
    MCP_ALL_TOOL_ID, SHELL_EXECUTE_TOOL_ID,
};

use crate::context::{
    build_managed_history, history_tokens, message_tokens, prune_expired_tool_results,
    repair_orphan_tool_results,
};
use crate::prompts::system_prompt;

pub const MAX_TOOL_TURNS: usize = 24;
pub const MAX_IDENTICAL_TOOL_CALLS: usize = 2;
pub const RESERVED_RESPONSE_TOKENS: usize = 5_120;
pub const RESERVED_TOOLING_TOKENS: usize = 1_200;
pub const TOOL_MODE_PROMPT_TOKEN_CAP: usize = 5_000;
pub const TOOL_MODE_MAX_RESPONSE_TOKENS: u32 = 1_536;

/// Tool ids that are always privilege-gated, independent of what the tool
/// implementation claims.
const PRIVILEGED_TOOL_IDS: &[&str] = &[SHELL_EXECUTE_TOOL_ID];

/// Runs with a window under this are blocked outright.
const MIN_CONTEXT_WINDOW: u32 = 16_000;
/// Runs with a window under this get a system-prompt warning.
const SMALL_CONTEXT_WARNING_BELOW: u32 = 32_000;
/// Used when neither the catalog nor the model id reveals a window.
const FALLBACK_CONTEXT_WINDOW: u32 = 32_768;

/// Cap applied to the cached last-successful-output fallback.
const FALLBACK_OUTPUT_CAP_CHARS: usize = 6_000;

const RECOVERY_PROMPT: &str = "Tool-call budget is exhausted. Do not call any tools. \
     Provide the final user-facing answer now.";

/// Everything one agent turn needs.
pub struct TurnRequest {
    pub agent: AgentConfig,
    pub history: Vec<Message>,
    pub provider: Arc<dyn ChatProvider>,
    /// Tools the host registered for this run; the engine filters them by
    /// the agent's declared tool grants.
    pub available_tools: Vec<Arc<dyn Tool>>,
    pub context: ExecutionContext,
    pub hooks: Arc<HookBus>,
}

/// The single assistant message produced by a turn, plus bookkeeping.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    pub summary: ToolExecutionSummary,
    pub pruned_tool_results: usize,
}

/// Drive one agent turn to completion.
///
/// Recoverable problems are surfaced into the conversation; configuration
/// problems come back as synthesized assistant error messages.  Only
/// unrecovered provider transport errors propagate as `Err`.
pub async fn run_agent_turn(request: TurnRequest) -> anyhow::Result<TurnOutcome> {
    let started = Instant::now();
    let TurnRequest {
        mut agent,
        history,
        provider,
        available_tools,
        context,
        hooks,
    } = request;

    // ── Prologue: tool filtering and capability gates ─────────────────────────

    let granted = normalize_tool_ids(&agent.tools);
    let tools: Vec<Arc<dyn Tool>> = available_tools
        .into_iter()
        .filter(|t| {
            granted.iter().any(|g| g.as_str() == t.id())
                || (granted.iter().any(|g| g.as_str() == MCP_ALL_TOOL_ID)
                    && t.id().starts_with(MCP_TOOL_ID_PREFIX))
        })
        .collect();
    let tool_mode = !tools.is_empty();

    if let Some(fallback) = catalog::deprecation_fallback(&agent.provider, &agent.model) {
        warn!(
            model = %agent.model,
            fallback = %fallback,
            "agent model is deprecated; rewriting to fallback"
        );
        agent.model = fallback.to_string();
    }

    if !catalog::is_chat_capable(&agent.provider, &agent.model) {
        return Ok(synthesized_error(
            &hooks,
            &context,
            started,
            tool_mode,
            format!(
                "Model '{}' is not a chat-capable model on provider '{}'.",
                agent.model, agent.provider
            ),
        ));
    }

    if tool_mode {
        if !provider.supports_native_tool_calling() {
            return Ok(synthesized_error(
                &hooks,
                &context,
                started,
                tool_mode,
                format!(
                    "Provider '{}' does not support native tool calling for this runtime.",
                    agent.provider
                ),
            ));
        }
        if !catalog::supports_tool_use(&agent.provider, &agent.model) {
            return Ok(synthesized_error(
                &hooks,
                &context,
                started,
                tool_mode,
                format!(
                    "Model '{}' does not support native tool calling.",
                    agent.model
                ),
            ));
        }
    }

    let effort = if catalog::supports_reasoning_effort(&agent.provider, &agent.model) {
        agent.reasoning_effort
    } else {
        ReasoningEffort::None
    };

    let window = catalog::context_window_for(&agent.provider, &agent.model)
        .unwrap_or(FALLBACK_CONTEXT_WINDOW);
    if window < MIN_CONTEXT_WINDOW {
        return Ok(synthesized_error(
            &hooks,
            &context,
            started,
            tool_mode,
            format!(
                "Model '{}' reports a context window of {window} tokens, below the \
                 {MIN_CONTEXT_WINDOW}-token minimum for agent runs.",
                agent.model
            ),
        ));
    }
    let mut warnings = Vec::new();
    if window < SMALL_CONTEXT_WARNING_BELOW {
        warnings.push(format!(
            "Note: the model context window is small ({window} tokens). Keep tool \
             output short; long results will be trimmed aggressively."
        ));
    }

    // ── System prompt assembly through the hook bus ───────────────────────────

    let mut system_text = system_prompt(&agent, &warnings);
    let user_prompt = history
        .iter()
        .rev()
        .find(|m| m.role == covey_model::Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let mut appendices: Vec<String> = Vec::new();
    {
        let mut ev = PromptBeforeEvent {
            run_id: &context.run_id,
            agent_id: &context.agent_id,
            system_prompt: &mut system_text,
            user_prompt: &user_prompt,
            context_message_count: history.len(),
            system_prompt_appendices: &mut appendices,
        };
        hooks.emit_prompt_before(&mut ev);
    }
    for appendix in &appendices {
        system_text.push_str("\n\n");
        system_text.push_str(appendix);
    }
    {
        let mut ev = PromptAfterEvent {
            run_id: &context.run_id,
            agent_id: &context.agent_id,
            prompt: &mut system_text,
        };
        hooks.emit_prompt_after(&mut ev);
    }
    let system = Message::system(system_text);

    // ── Budgets ───────────────────────────────────────────────────────────────

    let mut prompt_budget = (window as usize)
        .saturating_sub(RESERVED_RESPONSE_TOKENS)
        .saturating_sub(RESERVED_TOOLING_TOKENS);
    if tool_mode {
        prompt_budget = prompt_budget.min(TOOL_MODE_PROMPT_TOKEN_CAP);
    }
    let history_budget = prompt_budget
        .saturating_sub(message_tokens(&system))
        .max(256);

    let manifest = ProviderToolManifest::build(&tools);
    let declarations: Vec<ProviderToolDecl> = manifest
        .declarations()
        .iter()
        .map(|d| ProviderToolDecl {
            name: d.name.clone(),
            description: d.description.clone(),
            parameters: d.parameters.clone(),
        })
        .collect();

    // ── Turn loop ─────────────────────────────────────────────────────────────

    let mut conversation = build_managed_history(&history, history_budget);
    let mut summary = ToolExecutionSummary::default();
    let mut signature_runs: HashMap<String, usize> = HashMap::new();
    let mut inserted_at_ms: HashMap<String, u64> = HashMap::new();
    let mut pruned_total = 0usize;
    let mut last_successful_output: Option<String> = None;
    let ttl_ms = catalog::cache_ttl_ms(&agent.provider);

    for turn in 0..MAX_TOOL_TURNS {
        // Re-budget the in-flight conversation so injected tool results are
        // accounted for, then repair and prune before every provider call.
        conversation = build_managed_history(&conversation, history_budget);
        let (repaired, injected) = repair_orphan_tool_results(std::mem::take(&mut conversation));
        conversation = repaired;
        summary.failed += injected as u32;

        if history_tokens(&conversation) > history_budget {
            pruned_total += prune_expired_tool_results(
                &mut conversation,
                &inserted_at_ms,
                now_ms(),
                ttl_ms,
                history_budget,
            );
        }

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(system.clone());
        messages.extend(conversation.iter().cloned());

        let opts = ChatOptions {
            temperature: Some(if tool_mode { 0.2 } else { 0.7 }),
            max_tokens: Some(if tool_mode {
                TOOL_MODE_MAX_RESPONSE_TOKENS
            } else {
                4_096
            }),
            reasoning_effort: Some(effort),
            tools: declarations.clone(),
            tool_choice: tool_mode.then_some(ToolChoice::Auto),
            response_format: None,
        };

        debug!(turn, tokens = history_tokens(&conversation), "provider call");
        let outcome = provider.chat(&messages, &opts).await?;

        if outcome.tool_calls.is_empty() {
            return Ok(finalize(
                &hooks,
                &context,
                started,
                tool_mode,
                outcome.content,
                summary,
                pruned_total,
                "completed",
            ));
        }

        conversation.push(Message::assistant_with_tool_calls(
            outcome.content.clone(),
            outcome.tool_calls.clone(),
        ));

        for call in &outcome.tool_calls {
            let resolved = manifest.resolve_tool_id(&call.name);
            let tool = resolved
                .as_deref()
                .and_then(|id| tools.iter().find(|t| t.id() == id));
            let Some(tool) = tool else {
                summary.malformed += 1;
                summary.failed += 1;
                push_tool_error(
                    &mut conversation,
                    &mut inserted_at_ms,
                    call,
                    format!("Error: Tool '{}' is not available to this agent.", call.name),
                );
                continue;
            };

            let raw = Value::String(call.arguments.clone());
            let args = match decode_arguments(&raw) {
                Ok(map) => map,
                Err(message) => {
                    summary.malformed += 1;
                    summary.failed += 1;
                    push_tool_error(
                        &mut conversation,
                        &mut inserted_at_ms,
                        call,
                        format!("Error: {message}"),
                    );
                    continue;
                }
            };

            let validation = validate_and_coerce(&tool.input_schema(), args);
            if !validation.ok {
                summary.malformed += 1;
                summary.failed += 1;
                push_tool_error(
                    &mut conversation,
                    &mut inserted_at_ms,
                    call,
                    format!(
                        "Error: Invalid arguments for '{}': {}",
                        call.name,
                        validation.errors.join("; ")
                    ),
                );
                continue;
            }

            let mut args_value = Value::Object(validation.normalized);
            context.substitute_secrets(&mut args_value);

            let signature = args_value
                .as_object()
                .map(|map| call_signature(tool.id(), map))
                .unwrap_or_default();
            let executed_before = signature_runs.get(&signature).copied().unwrap_or(0);
            if executed_before >= MAX_IDENTICAL_TOOL_CALLS {
                summary.failed += 1;
                push_tool_error(
                    &mut conversation,
                    &mut inserted_at_ms,
                    call,
                    format!(
                        "Error: Duplicate tool call suppressed: '{}' already ran {executed_before} \
                         times with identical arguments. Vary the arguments or finish the task.",
                        call.name
                    ),
                );
                continue;
            }

            let privileged =
                tool.privileged() || PRIVILEGED_TOOL_IDS.contains(&tool.id());
            if privileged
                && context.tool_access_mode == AccessMode::AskAlways
                && !context.tool_access_granted
            {
                let result = ToolResult::fail(format!(
                    "Permission required to run privileged tool '{}'. Ask the user to \
                     grant tool access for this run.",
                    call.name
                ))
                .with_check(Check::fail(
                    "permission_required",
                    "user approval for privileged tool",
                    "access mode is ask_always and no grant was given",
                ));
                summary.failed += 1;
                push_tool_result(&mut conversation, &mut inserted_at_ms, call, &result);
                continue;
            }

            *signature_runs.entry(signature).or_insert(0) += 1;

            {
                let ev = ToolBeforeEvent {
                    run_id: &context.run_id,
                    tool_id: tool.id(),
                    tool_name: &call.name,
                    args: &args_value,
                };
                hooks.emit_tool_before(&ev);
            }
            let tool_started = Instant::now();
            let result = tool.execute(args_value, &context).await;
            let duration_ms = tool_started.elapsed().as_millis() as u64;
            {
                let result_json =
                    serde_json::to_value(&result).unwrap_or(Value::Null);
                let ev = ToolAfterEvent {
                    run_id: &context.run_id,
                    tool_id: tool.id(),
                    result: &result_json,
                    ok: result.ok,
                    duration_ms,
                };
                hooks.emit_tool_after(&ev);
            }

            summary.attempted += 1;
            if result.ok {
                summary.succeeded += 1;
                if !result.any_check_failed() {
                    count_verified_effects(&mut summary, &result);
                }
                last_successful_output = Some(result.content_for_model());
            } else {
                summary.failed += 1;
            }
            push_tool_result(&mut conversation, &mut inserted_at_ms, call, &result);
        }
    }

    // ── Budget exhaustion: one recovery call, then fallbacks ──────────────────

    let mut recovery_text = RECOVERY_PROMPT.to_string();
    if let Some(output) = &last_successful_output {
        recovery_text.push_str("\n\nLast successful tool result:\n");
        recovery_text.push_str(output);
    }
    conversation.push(Message::user(recovery_text));

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(system.clone());
    messages.extend(build_managed_history(&conversation, history_budget));

    let opts = ChatOptions {
        temperature: Some(0.2),
        max_tokens: Some(4_096),
        reasoning_effort: Some(effort),
        tools: Vec::new(),
        tool_choice: None,
        response_format: None,
    };
    match provider.chat(&messages, &opts).await {
        Ok(outcome) if !outcome.content.is_empty() => Ok(finalize(
            &hooks,
            &context,
            started,
            tool_mode,
            outcome.content,
            summary,
            pruned_total,
            "completed",
        )),
        other => {
            if let Err(e) = other {
                warn!(error = %e, "recovery call failed after tool budget exhaustion");
            }
            let content = match last_successful_output {
                Some(output) => {
                    let mut clipped = output;
                    if clipped.len() > FALLBACK_OUTPUT_CAP_CHARS {
                        clipped.truncate(FALLBACK_OUTPUT_CAP_CHARS);
                        clipped.push_str("\n[... truncated ...]");
                    }
                    format!(
                        "The tool-call budget was exhausted before a final answer was \
                         produced. Last successful tool result:\n{clipped}"
                    )
                }
                None => "The tool-call budget was exhausted before a final answer \
                         was produced, and no tool call succeeded."
                    .to_string(),
            };
            Ok(finalize(
                &hooks,
                &context,
                started,
                tool_mode,
                content,
                summary,
                pruned_total,
                "completed",
            ))
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn count_verified_effects(summary: &mut ToolExecutionSummary, result: &ToolResult) {
    use covey_tools::ArtifactKind;
    for artifact in &result.artifacts {
        let operation = artifact.operation.as_deref().unwrap_or("");
        match artifact.kind {
            ArtifactKind::File
                if matches!(
                    operation,
                    "write" | "append" | "overwrite" | "create" | "update"
                ) =>
            {
                summary.verified_file_effects += 1;
            }
            ArtifactKind::Shell if matches!(operation, "execute" | "run") => {
                summary.verified_shell_effects += 1;
            }
            _ => {}
        }
    }
}

fn push_tool_result(
    conversation: &mut Vec<Message>,
    inserted_at_ms: &mut HashMap<String, u64>,
    call: &covey_model::ToolCallRequest,
    result: &ToolResult,
) {
    conversation.push(Message::tool_result(
        call.id.clone(),
        call.name.clone(),
        result.content_for_model(),
    ));
    inserted_at_ms.insert(call.id.clone(), now_ms());
}

fn push_tool_error(
    conversation: &mut Vec<Message>,
    inserted_at_ms: &mut HashMap<String, u64>,
    call: &covey_model::ToolCallRequest,
    message: String,
) {
    conversation.push(Message::tool_result(call.id.clone(), call.name.clone(), message));
    inserted_at_ms.insert(call.id.clone(), now_ms());
}

/// Terminal configuration failure: a synthesized assistant message with a
/// zeroed execution summary.
fn synthesized_error(
    hooks: &HookBus,
    context: &ExecutionContext,
    started: Instant,
    tool_mode: bool,
    error_text: String,
) -> TurnOutcome {
    warn!(run_id = %context.run_id, error = %error_text, "agent turn blocked");
    finalize(
        hooks,
        context,
        started,
        tool_mode,
        error_text,
        ToolExecutionSummary::default(),
        0,
        "failed",
    )
}

/// Emit the response/run-end hooks and build the final assistant message.
#[allow(clippy::too_many_arguments)]
fn finalize(
    hooks: &HookBus,
    context: &ExecutionContext,
    started: Instant,
    tool_mode: bool,
    content: String,
    summary: ToolExecutionSummary,
    pruned_tool_results: usize,
    status: &str,
) -> TurnOutcome {
    let mut chunk = content;
    let metadata = serde_json::json!({
        "agent_id": context.agent_id,
        "provider_id": context.provider_id,
    });
    {
        let mut ev = ResponseStreamEvent {
            run_id: &context.run_id,
            chunk: &mut chunk,
            chunk_index: 0,
            metadata: &metadata,
        };
        hooks.emit_response_stream(&mut ev);
    }
    let duration_ms = started.elapsed().as_millis() as u64;
    {
        let mut ev = RunEndEvent {
            run_id: &context.run_id,
            agent_id: &context.agent_id,
            status,
            duration_ms,
            output: &mut chunk,
        };
        hooks.emit_run_end(&mut ev);
    }

    let mut message = Message::assistant(chunk);
    if tool_mode {
        message.tool_execution = Some(summary);
    }
    TurnOutcome {
        message,
        summary,
        pruned_tool_results,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
