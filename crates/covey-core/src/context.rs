// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context management: token accounting, per-message trimming, turn-boundary
//! compaction, orphan tool-result repair, and cache-aware pruning.
//!
//! Everything here is deterministic and synchronous — no model calls, no
//! I/O — so the engine can re-run it before every provider call without
//! concurrency concerns.

use std::collections::HashMap;

use covey_model::{Message, Role};

/// Flat per-message overhead for role framing on the wire.
const ROLE_OVERHEAD_TOKENS: usize = 8;
/// Extra accounting per attached tool call (id + name + framing).
const TOOL_CALL_OVERHEAD_TOKENS: usize = 10;

const LONG_MESSAGE_THRESHOLD_CHARS: usize = 2_800;
const LONG_MESSAGE_HEAD_CHARS: usize = 1_300;
const LONG_MESSAGE_TAIL_CHARS: usize = 900;
const MESSAGE_HARD_CAP_CHARS: usize = 8_000;

/// First line of the synthesized compaction summary message.
pub const CONTEXT_SUMMARY_HEADER: &str = "[Context summary generated to fit model window]";
/// Marker prefix for tool results whose provider cache entry has expired.
pub const PRUNED_MARKER_PREFIX: &str = "[Tool result pruned after cache expiry]";

/// Maximum total lines in the staged compaction summary.
const SUMMARY_MAX_LINES: usize = 14;
/// Single-line snippet length used inside stage lines.
const SNIPPET_CHARS: usize = 110;

/// Approximate token count for a piece of text: one token per four
/// characters, never zero.
pub fn text_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// Token cost of one message including role framing and tool-call overhead.
pub fn message_tokens(message: &Message) -> usize {
    text_tokens(&message.content)
        + ROLE_OVERHEAD_TOKENS
        + TOOL_CALL_OVERHEAD_TOKENS * message.tool_calls.len()
}

pub fn history_tokens(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

/// Truncate `text` to at most `max` bytes without splitting a UTF-8 char.
fn safe_prefix(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn safe_suffix(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Rewrite an oversized message body to `head + marker + tail`.
///
/// Bodies under the threshold pass through untouched; nothing ever exceeds
/// the hard cap.
pub fn clip_long_message(message: &mut Message) {
    if message.content.len() > LONG_MESSAGE_THRESHOLD_CHARS {
        let omitted = message
            .content
            .len()
            .saturating_sub(LONG_MESSAGE_HEAD_CHARS + LONG_MESSAGE_TAIL_CHARS);
        let head = safe_prefix(&message.content, LONG_MESSAGE_HEAD_CHARS);
        let tail = safe_suffix(&message.content, LONG_MESSAGE_TAIL_CHARS);
        message.content = format!("{head}[... trimmed middle ({omitted} chars) ...]{tail}");
    }
    if message.content.len() > MESSAGE_HARD_CAP_CHARS {
        message.content = safe_prefix(&message.content, MESSAGE_HARD_CAP_CHARS).to_string();
    }
}

/// One conversation turn: a user message plus everything that follows it
/// until the next user message.  Messages before the first user message
/// form a leading pseudo-turn.
fn split_turns(messages: &[Message]) -> Vec<Vec<Message>> {
    let mut turns: Vec<Vec<Message>> = Vec::new();
    for message in messages {
        let starts_turn = message.role == Role::User;
        if starts_turn || turns.is_empty() {
            turns.push(Vec::new());
        }
        if let Some(turn) = turns.last_mut() {
            turn.push(message.clone());
        }
    }
    turns
}

fn turn_tokens(turn: &[Message]) -> usize {
    turn.iter().map(message_tokens).sum()
}

fn single_line_snippet(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let line = line.trim();
    if line.len() > SNIPPET_CHARS {
        format!("{}…", safe_prefix(line, SNIPPET_CHARS))
    } else {
        line.to_string()
    }
}

/// Build the staged summary message for turns that fell out of the budget.
///
/// Dropped turns are grouped into stages by an average-turn-token budget;
/// each stage contributes a "Stage k:" line (first user snippet) and a
/// "Stage k end:" line (last assistant snippet), capped at
/// [`SUMMARY_MAX_LINES`] lines overall.
fn summarize_dropped_turns(dropped: &[Vec<Message>]) -> Message {
    let mut lines = vec![CONTEXT_SUMMARY_HEADER.to_string()];

    let total: usize = dropped.iter().map(|t| turn_tokens(t)).sum();
    let average = (total / dropped.len().max(1)).max(1);

    let mut chunks: Vec<&[Vec<Message>]> = Vec::new();
    let mut start = 0;
    let mut acc = 0;
    for (i, turn) in dropped.iter().enumerate() {
        acc += turn_tokens(turn);
        if acc >= average && i + 1 > start {
            chunks.push(&dropped[start..=i]);
            start = i + 1;
            acc = 0;
        }
    }
    if start < dropped.len() {
        chunks.push(&dropped[start..]);
    }

    for (k, chunk) in chunks.iter().enumerate() {
        if lines.len() + 2 > SUMMARY_MAX_LINES {
            break;
        }
        let first_user = chunk
            .iter()
            .flat_map(|t| t.iter())
            .find(|m| m.role == Role::User)
            .map(|m| single_line_snippet(&m.content))
            .unwrap_or_default();
        let last_assistant = chunk
            .iter()
            .flat_map(|t| t.iter())
            .filter(|m| m.role == Role::Assistant && !m.content.is_empty())
            .next_back()
            .map(|m| single_line_snippet(&m.content))
            .unwrap_or_default();
        lines.push(format!("Stage {}: {first_user}", k + 1));
        lines.push(format!("Stage {} end: {last_assistant}", k + 1));
    }

    Message::assistant(lines.join("\n"))
}

/// Fit `messages` into `budget` tokens.
///
/// Turns are kept newest-first while they fit; dropped turns collapse into
/// a single staged summary prepended to the result.  If even the kept turns
/// plus summary overflow, the result is right-truncated so the newest
/// messages survive.
pub fn build_managed_history(messages: &[Message], budget: usize) -> Vec<Message> {
    let mut clipped: Vec<Message> = messages.to_vec();
    for m in &mut clipped {
        clip_long_message(m);
    }

    if history_tokens(&clipped) <= budget {
        return clipped;
    }

    let turns = split_turns(&clipped);

    // Keep whole turns from the newest end while they fit.
    let mut first_kept = turns.len();
    let mut used = 0usize;
    for (i, turn) in turns.iter().enumerate().rev() {
        let cost = turn_tokens(turn);
        if used + cost > budget {
            break;
        }
        used += cost;
        first_kept = i;
    }

    // Evict the oldest kept turns until the summary of everything dropped
    // fits alongside what remains.  Eviction only grows the dropped set, so
    // the summary is rebuilt each round.  The newest turn is never evicted:
    // when even `summary + newest turn` overflows, the right-truncation
    // below sacrifices the summary instead of the live conversation.
    loop {
        let summary = summarize_dropped_turns(&turns[..first_kept]);
        let summary_cost = message_tokens(&summary);
        if used + summary_cost <= budget || first_kept + 1 >= turns.len() {
            let mut result = vec![summary];
            for turn in &turns[first_kept..] {
                result.extend_from_slice(turn);
            }
            // Right-truncate from the tail as the last resort (a single
            // oversized message can still blow the budget).
            if history_tokens(&result) > budget {
                let mut tail: Vec<Message> = Vec::new();
                let mut tail_used = 0usize;
                for message in result.iter().rev() {
                    let cost = message_tokens(message);
                    if tail_used + cost > budget {
                        break;
                    }
                    tail_used += cost;
                    tail.push(message.clone());
                }
                if !tail.is_empty() {
                    tail.reverse();
                    return tail;
                }
            }
            return result;
        }
        used -= turn_tokens(&turns[first_kept]);
        first_kept += 1;
    }
}

/// Ensure every assistant tool call has a matching tool-role result.
///
/// A missing result makes providers reject the next request outright, so a
/// synthetic failure result is injected right after the call's message
/// group.  Returns the repaired list and the injected count; the engine
/// counts injections as failures.
pub fn repair_orphan_tool_results(messages: Vec<Message>) -> (Vec<Message>, usize) {
    let mut injected = 0usize;
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());

    // Collect every answered call id up front.
    let answered: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    let mut i = 0;
    while i < messages.len() {
        let message = messages[i].clone();
        let tool_calls = message.tool_calls.clone();
        result.push(message);
        i += 1;

        if tool_calls.is_empty() {
            continue;
        }
        // Copy the contiguous run of existing tool results first so injected
        // repairs land after them.
        while i < messages.len() && messages[i].role == Role::Tool {
            result.push(messages[i].clone());
            i += 1;
        }
        for call in &tool_calls {
            if !answered.iter().any(|id| id == &call.id) {
                result.push(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    format!(
                        "Error: Missing tool result for '{}' ({}). Treat this tool call as failed.",
                        call.name, call.id
                    ),
                ));
                injected += 1;
            }
        }
    }
    (result, injected)
}

/// Prune expired tool results until the history fits `budget`.
///
/// `inserted_at_ms` maps tool-call ids to the wall-clock time their result
/// entered the conversation.  Results older than the provider's cache TTL
/// are rewritten to a short marker (oldest first); already-pruned entries
/// and results with unknown insertion times are left alone.  Returns the
/// number of results pruned in this pass.
pub fn prune_expired_tool_results(
    messages: &mut [Message],
    inserted_at_ms: &HashMap<String, u64>,
    now_ms: u64,
    ttl_ms: u64,
    budget: usize,
) -> usize {
    let mut total = history_tokens(messages);
    if total <= budget {
        return 0;
    }
    let mut pruned = 0usize;
    for i in 0..messages.len() {
        if total <= budget {
            break;
        }
        let message = &messages[i];
        if message.role != Role::Tool || message.content.starts_with(PRUNED_MARKER_PREFIX) {
            continue;
        }
        let Some(call_id) = message.tool_call_id.clone() else {
            continue;
        };
        let Some(&inserted) = inserted_at_ms.get(&call_id) else {
            continue;
        };
        if now_ms.saturating_sub(inserted) < ttl_ms {
            continue;
        }
        let name = message.name.clone().unwrap_or_else(|| "tool".to_string());
        let original_len = message.content.len();
        let before = message_tokens(message);
        messages[i].content = format!(
            "{PRUNED_MARKER_PREFIX} {name} ({call_id}); original length={original_len} chars."
        );
        total = total - before + message_tokens(&messages[i]);
        pruned += 1;
    }
    pruned
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use covey_model::ToolCallRequest;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    // ── Token accounting ──────────────────────────────────────────────────────

    #[test]
    fn text_tokens_is_quarter_rounded_up_min_one() {
        assert_eq!(text_tokens(""), 1);
        assert_eq!(text_tokens("abcd"), 1);
        assert_eq!(text_tokens("abcde"), 2);
        assert_eq!(text_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn message_tokens_adds_role_overhead() {
        // 8-char body → 2 tokens + 8 overhead.
        assert_eq!(message_tokens(&Message::user("12345678")), 10);
    }

    #[test]
    fn message_tokens_adds_tool_call_overhead() {
        let m = Message::assistant_with_tool_calls("", vec![call("a", "t"), call("b", "t")]);
        // 1 (empty content) + 8 + 2·10
        assert_eq!(message_tokens(&m), 29);
    }

    // ── Long-message guard ────────────────────────────────────────────────────

    #[test]
    fn short_messages_pass_untouched() {
        let mut m = Message::user("short body");
        clip_long_message(&mut m);
        assert_eq!(m.content, "short body");
    }

    #[test]
    fn long_messages_keep_head_and_tail_with_marker() {
        let body = format!("{}{}{}", "H".repeat(1400), "M".repeat(2000), "T".repeat(1000));
        let mut m = Message::user(body);
        clip_long_message(&mut m);
        assert!(m.content.starts_with("HHH"));
        assert!(m.content.ends_with("TTT"));
        assert!(m.content.contains("trimmed middle"));
        assert!(m.content.len() < 2_800);
    }

    #[test]
    fn clipped_messages_respect_hard_cap() {
        let mut m = Message::user("y".repeat(50_000));
        clip_long_message(&mut m);
        assert!(m.content.len() <= MESSAGE_HARD_CAP_CHARS);
    }

    #[test]
    fn clipping_does_not_split_multibyte_chars() {
        let mut m = Message::user("é".repeat(3_000));
        clip_long_message(&mut m);
        // Would panic on a bad boundary; also verify it is valid by iterating.
        assert!(m.content.chars().count() > 0);
    }

    // ── Managed history ───────────────────────────────────────────────────────

    fn turn(user: &str, assistant: &str) -> Vec<Message> {
        vec![Message::user(user), Message::assistant(assistant)]
    }

    #[test]
    fn history_under_budget_is_unchanged() {
        let mut messages = turn("question one", "answer one");
        messages.extend(turn("question two", "answer two"));
        let managed = build_managed_history(&messages, 10_000);
        assert_eq!(managed.len(), 4);
    }

    #[test]
    fn managed_history_fits_budget() {
        let mut messages = Vec::new();
        for i in 0..40 {
            messages.extend(turn(
                &format!("question {i} {}", "pad ".repeat(50)),
                &format!("answer {i} {}", "pad ".repeat(50)),
            ));
        }
        let budget = 500;
        let managed = build_managed_history(&messages, budget);
        assert!(
            history_tokens(&managed) <= budget,
            "managed history exceeds budget: {} > {budget}",
            history_tokens(&managed)
        );
    }

    #[test]
    fn dropped_turns_produce_stage_summary() {
        let mut messages = Vec::new();
        for i in 0..20 {
            messages.extend(turn(
                &format!("question number {i} with some padding text here"),
                &format!("answer number {i} with some padding text here"),
            ));
        }
        let managed = build_managed_history(&messages, 600);
        assert!(
            managed[0].content.starts_with(CONTEXT_SUMMARY_HEADER),
            "expected a summary message first, got: {}",
            managed[0].content
        );
        assert!(managed[0].content.contains("Stage 1:"));
        assert!(history_tokens(&managed) <= 600);
    }

    #[test]
    fn summary_is_capped_at_fourteen_lines() {
        let mut messages = Vec::new();
        for i in 0..60 {
            messages.extend(turn(
                &format!("unique question {i} {}", "words ".repeat(30)),
                &format!("unique answer {i} {}", "words ".repeat(30)),
            ));
        }
        let managed = build_managed_history(&messages, 300);
        if managed[0].content.starts_with(CONTEXT_SUMMARY_HEADER) {
            assert!(managed[0].content.lines().count() <= 14);
        }
    }

    #[test]
    fn newest_turn_survives_compaction() {
        let mut messages = Vec::new();
        for i in 0..30 {
            messages.extend(turn(
                &format!("old question {i} {}", "pad ".repeat(40)),
                &format!("old answer {i} {}", "pad ".repeat(40)),
            ));
        }
        messages.extend(turn("the final question", "the final answer"));
        let managed = build_managed_history(&messages, 400);
        let text: Vec<&str> = managed.iter().map(|m| m.content.as_str()).collect();
        assert!(
            text.iter().any(|t| t.contains("the final question")),
            "newest turn must be preserved"
        );
    }

    // ── Orphan repair ─────────────────────────────────────────────────────────

    #[test]
    fn orphan_call_gets_synthetic_result() {
        let messages = vec![
            Message::user("run it"),
            Message::assistant_with_tool_calls("", vec![call("c9", "shell_execute")]),
        ];
        let (repaired, injected) = repair_orphan_tool_results(messages);
        assert_eq!(injected, 1);
        let last = repaired.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("c9"));
        assert!(last
            .content
            .starts_with("Error: Missing tool result for 'shell_execute' (c9)"));
    }

    #[test]
    fn answered_calls_are_untouched() {
        let messages = vec![
            Message::assistant_with_tool_calls("", vec![call("c1", "echo")]),
            Message::tool_result("c1", "echo", "done"),
        ];
        let (repaired, injected) = repair_orphan_tool_results(messages);
        assert_eq!(injected, 0);
        assert_eq!(repaired.len(), 2);
    }

    #[test]
    fn partial_orphans_inject_after_existing_results() {
        let messages = vec![
            Message::assistant_with_tool_calls("", vec![call("c1", "a"), call("c2", "b")]),
            Message::tool_result("c1", "a", "ok"),
            Message::user("next"),
        ];
        let (repaired, injected) = repair_orphan_tool_results(messages);
        assert_eq!(injected, 1);
        // Order: assistant, real result, injected result, user.
        assert_eq!(repaired[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(repaired[2].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(repaired[3].role, Role::User);
    }

    #[test]
    fn repair_never_leaves_an_unanswered_call() {
        let messages = vec![
            Message::assistant_with_tool_calls("", vec![call("x1", "t"), call("x2", "t")]),
        ];
        let (repaired, _) = repair_orphan_tool_results(messages);
        for callid in ["x1", "x2"] {
            assert!(
                repaired
                    .iter()
                    .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(callid)),
                "call {callid} must have a result"
            );
        }
    }

    // ── Cache-aware pruning ───────────────────────────────────────────────────

    fn tool_history(big: bool) -> Vec<Message> {
        let body = if big { "x".repeat(4_000) } else { "small".into() };
        vec![
            Message::assistant_with_tool_calls("", vec![call("c1", "shell_execute")]),
            Message::tool_result("c1", "shell_execute", body),
        ]
    }

    #[test]
    fn under_budget_prunes_nothing() {
        let mut messages = tool_history(false);
        let inserted: HashMap<String, u64> = [("c1".to_string(), 0u64)].into();
        let pruned = prune_expired_tool_results(&mut messages, &inserted, 1_000_000, 1, 10_000);
        assert_eq!(pruned, 0);
    }

    #[test]
    fn expired_result_is_replaced_with_marker() {
        let mut messages = tool_history(true);
        let inserted: HashMap<String, u64> = [("c1".to_string(), 0u64)].into();
        let pruned = prune_expired_tool_results(&mut messages, &inserted, 400_000, 300_000, 50);
        assert_eq!(pruned, 1);
        let content = &messages[1].content;
        assert!(content.starts_with(PRUNED_MARKER_PREFIX));
        assert!(content.contains("shell_execute"));
        assert!(content.contains("(c1)"));
        assert!(content.contains("original length=4000"));
    }

    #[test]
    fn fresh_results_are_not_pruned() {
        let mut messages = tool_history(true);
        let inserted: HashMap<String, u64> = [("c1".to_string(), 390_000u64)].into();
        let pruned = prune_expired_tool_results(&mut messages, &inserted, 400_000, 300_000, 50);
        assert_eq!(pruned, 0);
    }

    #[test]
    fn already_pruned_results_are_skipped() {
        let mut messages = tool_history(true);
        let inserted: HashMap<String, u64> = [("c1".to_string(), 0u64)].into();
        prune_expired_tool_results(&mut messages, &inserted, 400_000, 300_000, 50);
        let first_pass = messages[1].content.clone();
        let again = prune_expired_tool_results(&mut messages, &inserted, 800_000, 300_000, 1);
        assert_eq!(again, 0);
        assert_eq!(messages[1].content, first_pass);
    }

    #[test]
    fn untracked_results_are_left_alone() {
        let mut messages = tool_history(true);
        let inserted = HashMap::new();
        let pruned = prune_expired_tool_results(&mut messages, &inserted, 400_000, 300_000, 50);
        assert_eq!(pruned, 0);
    }
}
