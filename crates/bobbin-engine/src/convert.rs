//! History → provider-format conversion.
//!
//! The inverse direction (provider blocks → content items) lives in
//! `bobbin_wire::convert`; both sides speak the same block dialect.

use serde_json::Value;

use bobbin_core::message::Message;
use bobbin_core::types::Role;
use bobbin_wire::blocks_from_items;

/// Map the internal history to the provider's message sequence, preserving
/// role order and tool-call/tool-result correspondence.
///
/// System-role messages (inline notices, unknown-record pass-throughs) have
/// no provider representation and are skipped, as are messages whose items
/// all convert to nothing.
pub fn to_provider_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter_map(|m| {
            let blocks = blocks_from_items(&m.content);
            if blocks.is_empty() {
                return None;
            }
            let content = serde_json::to_value(&blocks).unwrap_or(Value::Null);
            Some(serde_json::json!({
                "role": m.role.to_string(),
                "content": content,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobbin_core::message::{ContentItem, ResultPart, StructuredText};
    use bobbin_core::types::{BlockState, ConversationId, SystemLevel};
    use bobbin_wire::{items_from_blocks, ContentBlock, ToolNameIndex};

    fn conv() -> ConversationId {
        ConversationId::new()
    }

    #[test]
    fn history_maps_to_role_ordered_turns() {
        let c = conv();
        let history = vec![
            Message::user(c.clone(), "hi"),
            Message::assistant(c.clone(), vec![ContentItem::assistant_text("hello")]),
            Message::user(c.clone(), "again"),
        ];
        let wire = to_provider_messages(&history);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[0]["content"][0]["text"], "hi");
    }

    #[test]
    fn system_messages_are_skipped() {
        let c = conv();
        let history = vec![
            Message::user(c.clone(), "hi"),
            Message::new(
                c.clone(),
                Role::System,
                vec![ContentItem::System {
                    level: SystemLevel::Info,
                    text: "subprocess init".to_string(),
                    tool_use_id: None,
                }],
            ),
        ];
        let wire = to_provider_messages(&history);
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn tool_call_and_result_round_trip_through_provider_format() {
        let c = conv();
        let call_items = vec![
            ContentItem::AssistantText {
                structured: StructuredText::plain("running it"),
                block_state: BlockState::Complete,
            },
            ContentItem::ToolCall {
                id: "t1".to_string(),
                name: "run_shell".to_string(),
                input: serde_json::json!({"command": "ls"}),
                block_state: BlockState::Complete,
            },
        ];
        let result_items = vec![ContentItem::ToolResult {
            tool_use_id: "t1".to_string(),
            tool_name: "run_shell".to_string(),
            result: vec![ResultPart::text("Cargo.toml")],
            is_error: false,
            block_state: BlockState::Complete,
        }];
        let history = vec![
            Message::assistant(c.clone(), call_items.clone()),
            Message::new(c.clone(), Role::User, result_items.clone()),
        ];

        let wire = to_provider_messages(&history);
        assert_eq!(wire[0]["content"][1]["type"], "tool_use");
        assert_eq!(wire[1]["content"][0]["type"], "tool_result");
        assert_eq!(wire[1]["content"][0]["tool_use_id"], "t1");

        // Walk the wire shape back through the inverse and compare.
        let mut index = ToolNameIndex::new();
        let call_blocks: Vec<ContentBlock> =
            serde_json::from_value(wire[0]["content"].clone()).unwrap();
        let back_calls = items_from_blocks(&call_blocks, Role::Assistant, &mut index);
        assert_eq!(back_calls, call_items);

        let result_blocks: Vec<ContentBlock> =
            serde_json::from_value(wire[1]["content"].clone()).unwrap();
        let back_results = items_from_blocks(&result_blocks, Role::User, &mut index);
        assert_eq!(back_results, result_items);
    }
}
