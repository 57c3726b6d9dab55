//! Conversion between wire blocks and the internal content-item model.
//!
//! Both the session actor (decoding subprocess traffic) and the in-process
//! engine (talking to the HTTP provider) speak the same block dialect, so
//! the two directions live here side by side.

use std::collections::HashMap;

use serde_json::Value;

use bobbin_core::message::{ContentItem, ImageSource, Message, ResultPart, StructuredText};
use bobbin_core::types::{BlockState, ConversationId, Role, SystemLevel};

use crate::content::{
    ContentBlock, ContentUnion, ImageBlock, ImageSourceBlock, TextBlock, ThinkingBlock,
    ToolResultBlock, ToolResultContent, ToolUseBlock,
};
use crate::records::StreamRecord;

/// Running map of `tool_use_id → tool name`.
///
/// The wire's `tool_result` blocks do not repeat the tool name, so callers
/// keep one of these alive across a conversation and let the conversion
/// record names as calls stream past.
#[derive(Debug, Default)]
pub struct ToolNameIndex {
    names: HashMap<String, String>,
}

impl ToolNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, name: &str) {
        self.names.insert(id.to_string(), name.to_string());
    }

    pub fn resolve(&self, id: &str) -> String {
        self.names.get(id).cloned().unwrap_or_default()
    }
}

/// Convert wire blocks into content items.
///
/// `role` decides whether bare text becomes `UserText` or `AssistantText`;
/// assistant text is run through the structured-output parser. Tool-call
/// input that arrives as a string the provider could not parse is preserved
/// as a `{error, raw}` diagnostic payload instead of being dropped.
pub fn items_from_blocks(
    blocks: &[ContentBlock],
    role: Role,
    index: &mut ToolNameIndex,
) -> Vec<ContentItem> {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text(TextBlock { text }) => match role {
                Role::Assistant => ContentItem::AssistantText {
                    structured: StructuredText::parse(text),
                    block_state: BlockState::Complete,
                },
                _ => ContentItem::UserText { text: text.clone() },
            },
            ContentBlock::ToolUse(ToolUseBlock { id, name, input }) => {
                index.record(id, name);
                ContentItem::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: repair_tool_input(input),
                    block_state: BlockState::Complete,
                }
            }
            ContentBlock::ToolResult(ToolResultBlock {
                tool_use_id,
                content,
                is_error,
            }) => ContentItem::ToolResult {
                tool_use_id: tool_use_id.clone(),
                tool_name: index.resolve(tool_use_id),
                result: result_parts(content.as_ref()),
                is_error: is_error.unwrap_or(false),
                block_state: BlockState::Complete,
            },
            ContentBlock::Thinking(ThinkingBlock {
                thinking,
                signature,
            }) => ContentItem::Thinking {
                signature: signature.clone().unwrap_or_default(),
                text: thinking.clone(),
            },
            ContentBlock::Image(ImageBlock { source }) => ContentItem::ImageRef {
                source: image_source(source),
            },
            ContentBlock::Unknown(json) => ContentItem::UnknownJson { json: json.clone() },
        })
        .collect()
}

/// The inverse: content items back to wire blocks.
///
/// `System` items have no wire representation and are omitted.
pub fn blocks_from_items(items: &[ContentItem]) -> Vec<ContentBlock> {
    items
        .iter()
        .filter_map(|item| match item {
            ContentItem::UserText { text } => Some(ContentBlock::text(text.clone())),
            ContentItem::AssistantText { structured, .. } => {
                Some(ContentBlock::text(structured.to_wire_text()))
            }
            ContentItem::ToolCall {
                id, name, input, ..
            } => Some(ContentBlock::ToolUse(ToolUseBlock {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            })),
            ContentItem::ToolResult {
                tool_use_id,
                result,
                is_error,
                ..
            } => Some(ContentBlock::ToolResult(ToolResultBlock {
                tool_use_id: tool_use_id.clone(),
                content: Some(ToolResultContent::Blocks(
                    result.iter().map(block_from_part).collect(),
                )),
                is_error: Some(*is_error),
            })),
            ContentItem::Thinking { signature, text } => {
                Some(ContentBlock::Thinking(ThinkingBlock {
                    thinking: text.clone(),
                    signature: if signature.is_empty() {
                        None
                    } else {
                        Some(signature.clone())
                    },
                }))
            }
            ContentItem::ImageRef { source } => Some(ContentBlock::Image(ImageBlock {
                source: match source {
                    ImageSource::Base64 { media_type, data } => ImageSourceBlock::Base64 {
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                    ImageSource::Url { url } => ImageSourceBlock::Url {
                        url: url.clone(),
                        media_type: None,
                    },
                    ImageSource::FileId { file_id } => ImageSourceBlock::File {
                        file_id: file_id.clone(),
                        media_type: None,
                    },
                },
            })),
            ContentItem::System { .. } => None,
            ContentItem::UnknownJson { json } => Some(ContentBlock::Unknown(json.clone())),
        })
        .collect()
}

/// Convert a decoded stream record into an internal message.
///
/// Control traffic has no message representation and returns `None`; every
/// other record — including unknown ones — becomes a message with the raw
/// wire line attached for debugging.
pub fn message_from_record(
    record: &StreamRecord,
    conversation_id: &ConversationId,
    raw: &str,
    index: &mut ToolNameIndex,
) -> Option<Message> {
    let message = match record {
        StreamRecord::Assistant(r) => {
            let items = items_from_blocks(&r.message.content, Role::Assistant, index);
            let mut msg = Message::new(conversation_id.clone(), Role::Assistant, items);
            msg.provider_meta = assistant_meta(r);
            msg
        }
        StreamRecord::User(r) => {
            let items = match &r.message.content {
                ContentUnion::Text(text) => vec![ContentItem::user_text(text.clone())],
                ContentUnion::Blocks(blocks) => items_from_blocks(blocks, Role::User, index),
            };
            Message::new(conversation_id.clone(), Role::User, items)
        }
        StreamRecord::System(r) => Message::new(
            conversation_id.clone(),
            Role::System,
            vec![ContentItem::System {
                level: SystemLevel::Info,
                text: format!("subprocess {}", r.subtype),
                tool_use_id: None,
            }],
        ),
        StreamRecord::Result(r) => Message::new(
            conversation_id.clone(),
            Role::System,
            vec![ContentItem::System {
                level: if r.is_error {
                    SystemLevel::Error
                } else {
                    SystemLevel::Info
                },
                text: format!("turn {}: {} turns in {}ms", r.subtype, r.num_turns, r.duration_ms),
                tool_use_id: None,
            }],
        ),
        StreamRecord::Unknown(json) => Message::new(
            conversation_id.clone(),
            Role::System,
            vec![ContentItem::UnknownJson { json: json.clone() }],
        ),
        StreamRecord::ControlRequest(_) | StreamRecord::ControlResponse(_) => return None,
    };
    Some(message.with_raw_wire(raw))
}

fn assistant_meta(record: &crate::records::AssistantRecord) -> Option<Value> {
    let mut meta = serde_json::Map::new();
    if let Some(ref usage) = record.message.usage {
        meta.insert("usage".to_string(), usage.clone());
    }
    if let Some(ref model) = record.message.model {
        meta.insert("model".to_string(), Value::String(model.clone()));
    }
    if let Some(ref stop) = record.message.stop_reason {
        meta.insert("stop_reason".to_string(), Value::String(stop.clone()));
    }
    if meta.is_empty() {
        None
    } else {
        Some(Value::Object(meta))
    }
}

/// Tool-call input normally arrives as a JSON object. When the provider
/// hands over a string it failed to parse, keep the raw text alongside a
/// diagnostic instead of dropping the call.
fn repair_tool_input(input: &Value) -> Value {
    match input {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => parsed,
            Err(e) => serde_json::json!({ "error": e.to_string(), "raw": s }),
        },
        other => other.clone(),
    }
}

fn result_parts(content: Option<&ToolResultContent>) -> Vec<ResultPart> {
    match content {
        None => Vec::new(),
        Some(ToolResultContent::Text(text)) => vec![ResultPart::text(text.clone())],
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text(TextBlock { text }) => ResultPart::text(text.clone()),
                ContentBlock::Image(ImageBlock { source }) => match source {
                    ImageSourceBlock::Base64 { media_type, data } => ResultPart::Base64Blob {
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                    ImageSourceBlock::Url { url, media_type } => ResultPart::UrlRef {
                        url: url.clone(),
                        media_type: media_type.clone(),
                    },
                    ImageSourceBlock::File {
                        file_id,
                        media_type,
                    } => ResultPart::FileRef {
                        file_id: file_id.clone(),
                        media_type: media_type.clone(),
                    },
                },
                other => ResultPart::text(
                    serde_json::to_string(&other.to_value()).unwrap_or_default(),
                ),
            })
            .collect(),
    }
}

fn block_from_part(part: &ResultPart) -> ContentBlock {
    match part {
        ResultPart::Text { content } => ContentBlock::text(content.clone()),
        ResultPart::Base64Blob { media_type, data } => ContentBlock::Image(ImageBlock {
            source: ImageSourceBlock::Base64 {
                media_type: media_type.clone(),
                data: data.clone(),
            },
        }),
        ResultPart::UrlRef { url, media_type } => ContentBlock::Image(ImageBlock {
            source: ImageSourceBlock::Url {
                url: url.clone(),
                media_type: media_type.clone(),
            },
        }),
        ResultPart::FileRef {
            file_id,
            media_type,
        } => ContentBlock::Image(ImageBlock {
            source: ImageSourceBlock::File {
                file_id: file_id.clone(),
                media_type: media_type.clone(),
            },
        }),
    }
}

fn image_source(source: &ImageSourceBlock) -> ImageSource {
    match source {
        ImageSourceBlock::Base64 { media_type, data } => ImageSource::Base64 {
            media_type: media_type.clone(),
            data: data.clone(),
        },
        ImageSourceBlock::Url { url, .. } => ImageSource::Url { url: url.clone() },
        ImageSourceBlock::File { file_id, .. } => ImageSource::FileId {
            file_id: file_id.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bobbin_core::types::BlockState;

    #[test]
    fn assistant_items_round_trip_through_blocks() {
        let items = vec![
            ContentItem::AssistantText {
                structured: StructuredText::plain("let me check"),
                block_state: BlockState::Complete,
            },
            ContentItem::Thinking {
                signature: "sig-1".to_string(),
                text: "hmm".to_string(),
            },
            ContentItem::ToolCall {
                id: "t1".to_string(),
                name: "read_file".to_string(),
                input: serde_json::json!({"path": "a.rs"}),
                block_state: BlockState::Complete,
            },
        ];

        let blocks = blocks_from_items(&items);
        let mut index = ToolNameIndex::new();
        let back = items_from_blocks(&blocks, Role::Assistant, &mut index);
        assert_eq!(back, items);
    }

    #[test]
    fn tool_result_round_trip_resolves_name_via_index() {
        let mut index = ToolNameIndex::new();
        index.record("t1", "read_file");

        let items = vec![ContentItem::ToolResult {
            tool_use_id: "t1".to_string(),
            tool_name: "read_file".to_string(),
            result: vec![ResultPart::text("contents")],
            is_error: false,
            block_state: BlockState::Complete,
        }];

        let blocks = blocks_from_items(&items);
        let back = items_from_blocks(&blocks, Role::User, &mut index);
        assert_eq!(back, items);
    }

    #[test]
    fn unparseable_tool_input_becomes_diagnostic() {
        let blocks = vec![ContentBlock::ToolUse(ToolUseBlock {
            id: "t1".to_string(),
            name: "edit".to_string(),
            input: Value::String("{not json".to_string()),
        })];
        let mut index = ToolNameIndex::new();
        let items = items_from_blocks(&blocks, Role::Assistant, &mut index);
        match &items[0] {
            ContentItem::ToolCall { input, .. } => {
                assert_eq!(input["raw"], "{not json");
                assert!(input["error"].is_string());
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn structured_assistant_text_is_parsed() {
        let blocks = vec![ContentBlock::text(
            r#"{"full_text":"done","tts_text":"all done"}"#,
        )];
        let mut index = ToolNameIndex::new();
        let items = items_from_blocks(&blocks, Role::Assistant, &mut index);
        match &items[0] {
            ContentItem::AssistantText { structured, .. } => {
                assert_eq!(structured.full_text, "done");
                assert_eq!(structured.tts_text.as_deref(), Some("all done"));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn control_records_produce_no_message() {
        let conversation = ConversationId::new();
        let mut index = ToolNameIndex::new();
        let record = StreamRecord::ControlResponse(
            crate::records::ControlResponseRecord::success("req_1"),
        );
        assert!(message_from_record(&record, &conversation, "{}", &mut index).is_none());
    }

    #[test]
    fn unknown_record_becomes_passthrough_message() {
        let conversation = ConversationId::new();
        let mut index = ToolNameIndex::new();
        let record = StreamRecord::Unknown(serde_json::json!({"type": "telemetry", "n": 1}));
        let msg = message_from_record(&record, &conversation, r#"{"type":"telemetry","n":1}"#, &mut index)
            .unwrap();
        assert_eq!(msg.role, Role::System);
        assert!(matches!(msg.content[0], ContentItem::UnknownJson { .. }));
        assert!(msg.raw_wire.is_some());
    }
}
