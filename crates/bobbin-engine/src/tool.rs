//! The tool invocation contract.
//!
//! Tool implementations live outside the core; the engine only needs a name,
//! a schema, and a way to run a call against the conversation's project.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use bobbin_core::message::ResultPart;

use crate::provider::ToolDefinition;

/// What a tool call runs against.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The conversation's project directory.
    pub project_path: PathBuf,
}

/// Result of executing one tool call.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub parts: Vec<ResultPart>,
    pub is_error: bool,
    /// Set when the tool wants the loop to stop after this batch — the
    /// engine must not call the provider again once the results are in.
    pub return_direct: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            parts: vec![ResultPart::text(content)],
            is_error: false,
            return_direct: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            parts: vec![ResultPart::text(message)],
            is_error: true,
            return_direct: false,
        }
    }

    pub fn with_return_direct(mut self) -> Self {
        self.return_direct = true;
        self
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> Value;
    /// Execute the tool with the given input. Tools report their own
    /// failures through `ToolOutput::error`; panics are caught upstream.
    async fn run(&self, input: Value, ctx: &ToolContext) -> ToolOutput;
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[Arc<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}
