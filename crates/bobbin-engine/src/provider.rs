use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bobbin_core::message::ContentItem;
use bobbin_core::types::ProviderTag;

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call extracted from a provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Request to a chat provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    /// Provider-format message sequence (see `convert::to_provider_messages`).
    pub messages: Vec<Value>,
    /// Tools to expose to the model. Empty by default.
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// Response from a chat provider, already converted to content items.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub items: Vec<ContentItem>,
    pub stop_reason: String,
    pub usage: Option<Value>,
    pub model: String,
}

impl ChatResponse {
    /// Tool calls requested by this response, in item order.
    pub fn tool_calls(&self) -> Vec<ToolCallSpec> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolCall {
                    id, name, input, ..
                } => Some(ToolCallSpec {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Common interface for in-process chat providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Maps an agent definition's provider tag to a live provider.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderTag, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: ProviderTag, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(tag, provider);
    }

    pub fn with(mut self, tag: ProviderTag, provider: Arc<dyn ChatProvider>) -> Self {
        self.register(tag, provider);
        self
    }

    pub fn resolve(&self, tag: ProviderTag) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        self.providers.get(&tag).cloned().ok_or_else(|| {
            ProviderError::Unavailable(format!("no provider registered for tag '{tag}'"))
        })
    }
}
