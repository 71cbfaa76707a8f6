// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::provider::{ChatProvider, ProviderError};
use crate::types::{ChatOptions, ChatOutcome, Message, Role, ToolCallRequest};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockChatProvider;

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn provider_id(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn chat(
        &self,
        messages: &[Message],
        _opts: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(ChatOutcome::text(format!("MOCK: {reply}")))
    }
}

/// A pre-scripted mock provider.  Each `chat` call pops the next outcome
/// from the front of the queue, so tests can specify exact call sequences —
/// including tool calls — without network access.  Every request is recorded
/// for inspection.
pub struct ScriptedChatProvider {
    outcomes: Mutex<Vec<ChatOutcome>>,
    /// `(messages, options)` pairs seen by this provider, in call order.
    pub requests: Arc<Mutex<Vec<(Vec<Message>, ChatOptions)>>>,
    fail_next_with: Mutex<Option<String>>,
}

impl ScriptedChatProvider {
    pub fn new(outcomes: Vec<ChatOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_next_with: Mutex::new(None),
        }
    }

    /// Provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![ChatOutcome::text(reply)])
    }

    /// Provider that returns one tool call, then a text reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ChatOutcome::with_tool_calls(vec![ToolCallRequest {
                id: call_id.into(),
                name: tool_name.into(),
                arguments: args_json.into(),
            }]),
            ChatOutcome::text(final_text),
        ])
    }

    /// Make the next `chat` call fail with `ProviderError::Other(message)`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next_with.lock().unwrap() = Some(message.into());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChatProvider {
    fn provider_id(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        "scripted-mock-model"
    }

    async fn chat(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), opts.clone()));

        if let Some(msg) = self.fail_next_with.lock().unwrap().take() {
            return Err(ProviderError::Other(msg));
        }

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            // Default fallback when all scripts are consumed.
            return Ok(ChatOutcome::text("[no more scripts]"));
        }
        Ok(outcomes.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockChatProvider;
        let out = p
            .chat(&[Message::user("hi")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(out.content, "MOCK: hi");
    }

    #[tokio::test]
    async fn scripted_pops_outcomes_in_order() {
        let p = ScriptedChatProvider::tool_then_text("c1", "echo", "{}", "done");

        let first = p.chat(&[], &ChatOptions::default()).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "echo");

        let second = p.chat(&[], &ChatOptions::default()).await.unwrap();
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.content, "done");
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let p = ScriptedChatProvider::new(vec![]);
        let out = p.chat(&[], &ChatOptions::default()).await.unwrap();
        assert!(out.content.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_requests() {
        let p = ScriptedChatProvider::always_text("ok");
        p.chat(&[Message::user("q")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(p.request_count(), 1);
        let requests = p.requests.lock().unwrap();
        assert_eq!(requests[0].0[0].content, "q");
    }

    #[tokio::test]
    async fn fail_next_fails_exactly_once() {
        let p = ScriptedChatProvider::always_text("ok");
        p.fail_next("boom");
        assert!(p.chat(&[], &ChatOptions::default()).await.is_err());
        assert!(p.chat(&[], &ChatOptions::default()).await.is_ok());
    }

    #[test]
    fn scripted_claims_native_tool_calling() {
        let p = ScriptedChatProvider::new(vec![]);
        assert!(p.supports_native_tool_calling());
    }
}
