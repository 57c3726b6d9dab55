//! Parallel tool-batch execution.
//!
//! Every call in a batch runs concurrently; results come back in input
//! order as `ToolResult` content items, ready to form a single tool-result
//! message. A failing or panicking tool never takes the batch down — it
//! becomes an error result and the others still run.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bobbin_core::message::{ContentItem, ResultPart, INTERRUPTED_TOOL_RESULT};
use bobbin_core::types::BlockState;

use crate::provider::ToolCallSpec;
use crate::tool::{Tool, ToolContext, ToolOutput};

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// One `ToolResult` item per call, in input order.
    pub items: Vec<ContentItem>,
    /// True when any tool in the batch asked to terminate the loop.
    pub return_direct: bool,
}

/// Dispatch `calls` concurrently against `tools` and collect typed results.
///
/// Cancellation semantics: when `cancel` fires, in-flight calls resolve to
/// the synthetic interruption result; calls that already finished keep
/// their real output.
pub async fn execute_batch(
    tools: &[Arc<dyn Tool>],
    calls: &[ToolCallSpec],
    ctx: Arc<ToolContext>,
    cancel: &CancellationToken,
) -> BatchOutcome {
    let handles: Vec<(ToolCallSpec, JoinHandle<ToolOutput>)> = calls
        .iter()
        .map(|call| {
            let tool = tools.iter().find(|t| t.name() == call.name).cloned();
            let input = call.input.clone();
            let name = call.name.clone();
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let Some(tool) = tool else {
                    return ToolOutput::error(format!("unknown tool: {name}"));
                };
                debug!(tool = %name, "executing tool");
                tokio::select! {
                    _ = cancel.cancelled() => ToolOutput {
                        parts: vec![ResultPart::text(INTERRUPTED_TOOL_RESULT)],
                        is_error: true,
                        return_direct: false,
                    },
                    output = tool.run(input, &ctx) => output,
                }
            });
            (call.clone(), handle)
        })
        .collect();

    let mut items = Vec::with_capacity(handles.len());
    let mut return_direct = false;

    for (call, handle) in handles {
        let output = match handle.await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool task failed");
                ToolOutput::error(format!("tool '{}' crashed: {e}", call.name))
            }
        };
        return_direct |= output.return_direct;
        items.push(ContentItem::ToolResult {
            tool_use_id: call.id,
            tool_name: call.name,
            result: output.parts,
            is_error: output.is_error,
            block_state: BlockState::Complete,
        });
    }

    BatchOutcome {
        items,
        return_direct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, input: Value, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::success(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct FinishTool;

    #[async_trait]
    impl Tool for FinishTool {
        fn name(&self) -> &str {
            "finish"
        }
        fn description(&self) -> &str {
            "Terminate the loop"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _input: Value, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::success("done").with_return_direct()
        }
    }

    struct StallTool;

    #[async_trait]
    impl Tool for StallTool {
        fn name(&self) -> &str {
            "stall"
        }
        fn description(&self) -> &str {
            "Never finishes on its own"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _input: Value, _ctx: &ToolContext) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(600)).await;
            ToolOutput::success("too late")
        }
    }

    fn ctx() -> Arc<ToolContext> {
        Arc::new(ToolContext {
            project_path: "/tmp".into(),
        })
    }

    fn call(id: &str, name: &str, input: Value) -> ToolCallSpec {
        ToolCallSpec {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
        let calls = vec![
            call("a", "echo", serde_json::json!({"text": "one"})),
            call("b", "echo", serde_json::json!({"text": "two"})),
            call("c", "echo", serde_json::json!({"text": "three"})),
        ];
        let outcome = execute_batch(&tools, &calls, ctx(), &CancellationToken::new()).await;

        let ids: Vec<&str> = outcome
            .items
            .iter()
            .map(|item| match item {
                ContentItem::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
                other => panic!("unexpected item: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!outcome.return_direct);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_others_still_run() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
        let calls = vec![
            call("a", "no_such_tool", serde_json::json!({})),
            call("b", "echo", serde_json::json!({"text": "fine"})),
        ];
        let outcome = execute_batch(&tools, &calls, ctx(), &CancellationToken::new()).await;

        match &outcome.items[0] {
            ContentItem::ToolResult { is_error, .. } => assert!(*is_error),
            other => panic!("unexpected item: {other:?}"),
        }
        match &outcome.items[1] {
            ContentItem::ToolResult {
                is_error, result, ..
            } => {
                assert!(!is_error);
                assert_eq!(result, &vec![ResultPart::text("fine")]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn return_direct_is_flagged_for_the_whole_batch() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool), Arc::new(FinishTool)];
        let calls = vec![
            call("a", "echo", serde_json::json!({"text": "x"})),
            call("b", "finish", serde_json::json!({})),
            call("c", "echo", serde_json::json!({"text": "y"})),
        ];
        let outcome = execute_batch(&tools, &calls, ctx(), &CancellationToken::new()).await;
        assert!(outcome.return_direct);
        assert_eq!(outcome.items.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_preserves_completed_results() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool), Arc::new(StallTool)];
        let calls = vec![
            call("a", "echo", serde_json::json!({"text": "quick"})),
            call("b", "stall", serde_json::json!({})),
        ];
        let cancel = CancellationToken::new();

        let cancel_after = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_after.cancel();
        });

        let outcome = execute_batch(&tools, &calls, ctx(), &cancel).await;
        match &outcome.items[0] {
            ContentItem::ToolResult {
                is_error, result, ..
            } => {
                assert!(!is_error);
                assert_eq!(result, &vec![ResultPart::text("quick")]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
        match &outcome.items[1] {
            ContentItem::ToolResult {
                is_error, result, ..
            } => {
                assert!(*is_error);
                assert_eq!(result, &vec![ResultPart::text(INTERRUPTED_TOOL_RESULT)]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
