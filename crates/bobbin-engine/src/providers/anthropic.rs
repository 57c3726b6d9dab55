use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use bobbin_core::types::Role;
use bobbin_wire::{items_from_blocks, ContentBlock, ToolNameIndex};

use crate::provider::{ChatProvider, ChatRequest, ChatResponse, ProviderError};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, messages = req.messages.len(), "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": req.system,
        "messages": req.messages,
    });

    // Inject tool definitions when the caller has provided any.
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    // Tool-result blocks never appear in a fresh assistant turn, so a
    // throwaway name index is fine here.
    let mut index = ToolNameIndex::new();
    let items = items_from_blocks(&resp.content, Role::Assistant, &mut index);

    ChatResponse {
        items,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        usage: resp.usage,
        model: resp.model,
    }
}

// Anthropic API response shape (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;
    use bobbin_core::message::ContentItem;

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let req = ChatRequest {
            model: "claude-sonnet-4-5".to_string(),
            system: "be brief".to_string(),
            messages: vec![serde_json::json!({"role": "user", "content": "hi"})],
            tools: Vec::new(),
            max_tokens: 1024,
        };
        let body = build_request_body(&req);
        assert!(body.get("tools").is_none());

        let with_tools = ChatRequest {
            tools: vec![ToolDefinition {
                name: "read_file".to_string(),
                description: "Read a file".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            ..req
        };
        let body = build_request_body(&with_tools);
        assert_eq!(body["tools"][0]["name"], "read_file");
    }

    #[test]
    fn response_blocks_become_items() {
        let api_resp: ApiResponse = serde_json::from_str(
            r#"{"model":"claude-sonnet-4-5","content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"read_file","input":{"path":"a"}}],"stop_reason":"tool_use","usage":{"input_tokens":3}}"#,
        )
        .unwrap();
        let resp = parse_response(api_resp);
        assert_eq!(resp.items.len(), 2);
        assert!(matches!(resp.items[0], ContentItem::AssistantText { .. }));
        assert_eq!(resp.tool_calls().len(), 1);
        assert_eq!(resp.stop_reason, "tool_use");
    }
}
