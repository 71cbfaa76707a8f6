// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared adapter for OpenAI-compatible chat completion APIs.
//!
//! Most hosted providers (OpenAI, Groq, OpenRouter, Mistral, DeepSeek, local
//! llama.cpp/vLLM servers) speak the same `/chat/completions` wire format;
//! one adapter configured with a base URL and auth covers all of them.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::provider::{ChatProvider, ProviderError};
use crate::recovery::recover_tool_calls;
use crate::types::{
    ChatOptions, ChatOutcome, Message, ResponseFormat, Role, ToolCallRequest, ToolChoice, Usage,
};

pub struct OpenAiCompatProvider {
    provider_id: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.groq.com/openai/v1`.
    pub fn new(
        provider_id: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, messages: &[Message], opts: &ChatOptions, with_tools: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(messages),
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = opts.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(effort) = opts.reasoning_effort.as_ref().and_then(|e| e.as_wire_str()) {
            body["reasoning_effort"] = json!(effort);
        }
        if with_tools && !opts.tools.is_empty() {
            let tools: Vec<Value> = opts
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            if let Some(choice) = &opts.tool_choice {
                body["tool_choice"] = match choice {
                    ToolChoice::Auto => json!("auto"),
                    ToolChoice::None => json!("none"),
                };
            }
        }
        if let Some(format) = &opts.response_format {
            body["response_format"] = match format {
                ResponseFormat::JsonObject => json!({"type": "json_object"}),
                ResponseFormat::JsonSchema {
                    name,
                    schema,
                    strict,
                } => json!({
                    "type": "json_schema",
                    "json_schema": {"name": name, "schema": schema, "strict": strict},
                }),
            };
        }
        body
    }

    async fn post_chat(&self, body: &Value) -> Result<Value, ProviderError> {
        let mut req = self.client.post(&self.chat_url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            // Groq-style tool-call failures return a structured error body
            // with the raw generation attached.
            if let Some(failed) = extract_failed_generation(&text) {
                return Err(ProviderError::ToolUseFailed {
                    failed_generation: failed,
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: truncate_for_log(&text),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Schema(format!("response body is not JSON: {e}")))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        let body = self.build_body(messages, opts, true);
        debug!(provider = %self.provider_id, model = %self.model, "chat request");

        match self.post_chat(&body).await {
            Ok(value) => parse_outcome(&value),
            Err(ProviderError::ToolUseFailed { failed_generation }) => {
                // Stage 1–3: decode the failed generation into tool calls.
                let recovered = recover_tool_calls(&failed_generation);
                if !recovered.is_empty() {
                    warn!(
                        provider = %self.provider_id,
                        count = recovered.len(),
                        "recovered tool calls from failed_generation payload"
                    );
                    return Ok(ChatOutcome::with_tool_calls(recovered));
                }
                // Stage 4: retry once with tools stripped so the model can at
                // least answer in text.
                warn!(
                    provider = %self.provider_id,
                    "tool call recovery failed; retrying once without tools"
                );
                let body = self.build_body(messages, opts, false);
                let value = self.post_chat(&body).await?;
                parse_outcome(&value)
            }
            Err(e) => Err(e),
        }
    }
}

/// Map conversation messages into the OpenAI wire shape.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::Tool => {
                let mut v = json!({
                    "role": "tool",
                    "content": m.content,
                    "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                });
                if let Some(name) = &m.name {
                    v["name"] = json!(name);
                }
                v
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments},
                        })
                    })
                    .collect();
                json!({"role": "assistant", "content": m.content, "tool_calls": calls})
            }
            _ => {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => unreachable!("handled above"),
                };
                json!({"role": role, "content": m.content})
            }
        })
        .collect()
}

fn parse_outcome(value: &Value) -> Result<ChatOutcome, ProviderError> {
    let message = value["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| ProviderError::Schema("response has no choices".into()))?;

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message["tool_calls"].as_array() {
        for (i, raw) in raw_calls.iter().enumerate() {
            let name = raw["function"]["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                warn!("dropping tool call with empty name from provider response");
                continue;
            }
            let id = raw["id"].as_str().unwrap_or_default();
            let id = if id.is_empty() {
                // A missing id would break tool-result correlation on the
                // next request; synthesize one.
                format!("call_synthetic_{i}")
            } else {
                id.to_string()
            };
            tool_calls.push(ToolCallRequest {
                id,
                name: name.to_string(),
                arguments: raw["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            });
        }
    }

    let usage = value["usage"]["total_tokens"]
        .as_u64()
        .map(|t| Usage {
            total_tokens: t as u32,
        });

    Ok(ChatOutcome {
        content,
        tool_calls,
        usage,
    })
}

/// Pull the `failed_generation` string out of a `tool_use_failed` error body.
fn extract_failed_generation(body: &str) -> Option<String> {
    if !body.contains("tool_use_failed") {
        return None;
    }
    let value: Value = covey_runtime::json::parse_json_with_recovery(body)?;
    value["error"]["failed_generation"]
        .as_str()
        .or_else(|| value["failed_generation"].as_str())
        .map(str::to_string)
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 600;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        format!("{}…", &text[..LIMIT])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
