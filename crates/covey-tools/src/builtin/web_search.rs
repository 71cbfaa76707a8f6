// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::canonical::WEB_SEARCH_TOOL_ID;
use crate::context::ExecutionContext;
use crate::tool::{Artifact, Check, Tool, ToolResult};

/// Cap on the response text handed back to the model.
const RESPONSE_LIMIT_BYTES: usize = 8_000;

/// Built-in web search tool backed by a configurable HTTP search endpoint.
pub struct WebSearchTool {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> &str {
        WEB_SEARCH_TOOL_ID
    }

    fn description(&self) -> &str {
        "Search the web and return the raw result payload. \
         'query' is required; keep queries short and specific."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to request (optional)."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'query' argument");
        };
        let Some(endpoint) = &self.endpoint else {
            return ToolResult::fail(
                "web search endpoint is not configured; set tools.web_search.endpoint",
            );
        };

        debug!(query = %query, "web search");

        let mut req = self.client.get(endpoint).query(&[("q", query)]);
        if let Some(n) = args.get("max_results").and_then(Value::as_u64) {
            req = req.query(&[("count", n.to_string())]);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::fail(format!("web search request failed: {e}"))
                    .with_artifact(Artifact::web(query));
            }
        };
        let status = resp.status();
        let mut body = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                return ToolResult::fail(format!("web search response unreadable: {e}"))
                    .with_artifact(Artifact::web(query));
            }
        };
        if body.len() > RESPONSE_LIMIT_BYTES {
            body.truncate(RESPONSE_LIMIT_BYTES);
            body.push_str("\n[... truncated ...]");
        }

        let check = if status.is_success() {
            Check::pass("http_status", "search endpoint returned success")
        } else {
            Check::fail(
                "http_status",
                "search endpoint returned success",
                format!("status {status}"),
            )
        };

        if status.is_success() {
            ToolResult::ok(body)
                .with_artifact(Artifact::web(query))
                .with_check(check)
        } else {
            ToolResult::fail(format!("web search failed with status {status}: {body}"))
                .with_artifact(Artifact::web(query))
                .with_check(check)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::for_agent("r", "a", "A", "mock")
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let tool = WebSearchTool::new(Some("http://localhost:1".into()), None);
        let result = tool.execute(json!({}), &ctx()).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("query"));
    }

    #[tokio::test]
    async fn unconfigured_endpoint_fails_without_network() {
        let tool = WebSearchTool::new(None, None);
        let result = tool.execute(json!({"query": "rust"}), &ctx()).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_request_failure() {
        // Port 1 is essentially never listening; the request errors fast.
        let tool = WebSearchTool::new(Some("http://127.0.0.1:1".into()), None);
        let result = tool.execute(json!({"query": "rust"}), &ctx()).await;
        assert!(!result.ok);
        assert_eq!(result.artifacts[0].label, "rust");
    }

    #[test]
    fn id_is_canonical() {
        assert_eq!(WebSearchTool::new(None, None).id(), "web_search");
        assert!(!WebSearchTool::new(None, None).privileged());
    }
}
