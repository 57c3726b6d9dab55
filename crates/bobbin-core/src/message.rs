//! The message and content-item model.
//!
//! Messages are append-only and content-addressable by id. A message's
//! content is a list of tagged items; edits never mutate an existing
//! message — they produce a new message on a new thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BlockState, ConversationId, MessageId, Role, SystemLevel};

/// Text synthesised when an orphaned tool call is repaired with an error
/// result. Both the engine and the fork paths use the same wording so the
/// model sees a consistent explanation.
pub const INTERRUPTED_TOOL_RESULT: &str = "Tool execution was interrupted or cancelled";

/// Assistant text with optional speech metadata.
///
/// Providers asked for structured output wrap their reply in a small JSON
/// envelope; `parse` accepts either shape and `to_wire_text` reproduces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredText {
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_tone: Option<String>,
}

impl StructuredText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            full_text: text.into(),
            tts_text: None,
            voice_tone: None,
        }
    }

    /// Parse assistant text that may or may not be the structured envelope.
    /// Anything that is not a JSON object with a `full_text` field is plain.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<StructuredText>(text) {
            Ok(parsed) if !parsed.full_text.is_empty() => parsed,
            _ => Self::plain(text),
        }
    }

    /// Inverse of [`parse`](Self::parse): plain text stays plain, text with
    /// speech metadata is re-serialised as the JSON envelope.
    pub fn to_wire_text(&self) -> String {
        if self.tts_text.is_none() && self.voice_tone.is_none() {
            self.full_text.clone()
        } else {
            serde_json::to_string(self).unwrap_or_else(|_| self.full_text.clone())
        }
    }
}

/// Where an image lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
    FileId { file_id: String },
}

/// One part of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPart {
    Text {
        content: String,
    },
    Base64Blob {
        media_type: String,
        data: String,
    },
    UrlRef {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    FileRef {
        file_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ResultPart {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }
}

/// A single item inside a message's content list.
///
/// The `UnknownJson` variant carries records the codec did not recognise;
/// they ride along untouched so newer subprocess builds stay renderable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    UserText {
        text: String,
    },
    AssistantText {
        structured: StructuredText,
        block_state: BlockState,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
        block_state: BlockState,
    },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        result: Vec<ResultPart>,
        is_error: bool,
        block_state: BlockState,
    },
    Thinking {
        signature: String,
        text: String,
    },
    ImageRef {
        source: ImageSource,
    },
    System {
        level: SystemLevel,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
    UnknownJson {
        json: serde_json::Value,
    },
}

impl ContentItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::AssistantText {
            structured: StructuredText::plain(text),
            block_state: BlockState::Complete,
        }
    }

    /// The synthetic error result used to close an orphaned tool call.
    pub fn interrupted_tool_result(tool_use_id: &str, tool_name: &str) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            tool_name: tool_name.to_string(),
            result: vec![ResultPart::text(INTERRUPTED_TOOL_RESULT)],
            is_error: true,
            block_state: BlockState::Complete,
        }
    }
}

/// An immutable, append-only conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: Vec<ContentItem>,
    pub created_at: DateTime<Utc>,
    /// Opaque provider metadata (usage counters, stop reason, model).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<serde_json::Value>,
    /// Set exactly when the message was loaded from the store on engine
    /// initialisation; downstream consumers suppress side effects for these.
    #[serde(default)]
    pub is_historical: bool,
    /// The raw wire line this message was decoded from, for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_wire: Option<String>,
}

impl Message {
    pub fn new(conversation_id: ConversationId, role: Role, content: Vec<ContentItem>) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            role,
            content,
            created_at: Utc::now(),
            provider_meta: None,
            is_historical: false,
            raw_wire: None,
        }
    }

    pub fn user(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, vec![ContentItem::user_text(text)])
    }

    pub fn assistant(conversation_id: ConversationId, items: Vec<ContentItem>) -> Self {
        Self::new(conversation_id, Role::Assistant, items)
    }

    /// Copy of this message with new content, a fresh id, and a fresh
    /// timestamp — the building block of edit forking.
    pub fn edited_copy(&self, new_content: Vec<ContentItem>) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id: self.conversation_id.clone(),
            role: self.role,
            content: new_content,
            created_at: Utc::now(),
            provider_meta: self.provider_meta.clone(),
            is_historical: false,
            raw_wire: None,
        }
    }

    pub fn with_raw_wire(mut self, raw: impl Into<String>) -> Self {
        self.raw_wire = Some(raw.into());
        self
    }

    /// All tool calls in this message, as `(id, name)` pairs in item order.
    pub fn tool_calls(&self) -> Vec<(&str, &str)> {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolCall { id, name, .. } => Some((id.as_str(), name.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Ids answered by tool results in this message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated plain text of the message, for logging and display.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            match item {
                ContentItem::UserText { text } => out.push_str(text),
                ContentItem::AssistantText { structured, .. } => out.push_str(&structured.full_text),
                ContentItem::System { text, .. } => out.push_str(text),
                _ => {}
            }
        }
        out
    }
}

/// Tool calls anywhere in `messages` that no later tool result answers,
/// as `(id, name)` pairs in call order.
///
/// The loop normally appends a result message right after each assistant
/// turn; gaps appear when a previous run was interrupted or crashed, and
/// must be repaired before the history is handed to a provider again.
pub fn unresolved_tool_calls(messages: &[Message]) -> Vec<(String, String)> {
    let mut answered: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for msg in messages {
        for id in msg.tool_result_ids() {
            answered.insert(id);
        }
    }

    let mut orphans = Vec::new();
    for msg in messages {
        for (id, name) in msg.tool_calls() {
            if !answered.contains(id) {
                orphans.push((id.to_string(), name.to_string()));
            }
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockState;

    fn conv() -> ConversationId {
        ConversationId::new()
    }

    fn tool_call(id: &str, name: &str) -> ContentItem {
        ContentItem::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: serde_json::json!({}),
            block_state: BlockState::Complete,
        }
    }

    #[test]
    fn structured_text_parses_envelope() {
        let parsed = StructuredText::parse(r#"{"full_text":"hi","tts_text":"hi there"}"#);
        assert_eq!(parsed.full_text, "hi");
        assert_eq!(parsed.tts_text.as_deref(), Some("hi there"));
    }

    #[test]
    fn structured_text_falls_back_to_plain() {
        let parsed = StructuredText::parse("just words");
        assert_eq!(parsed.full_text, "just words");
        assert!(parsed.tts_text.is_none());
    }

    #[test]
    fn structured_text_wire_round_trip() {
        let original = StructuredText {
            full_text: "hello".to_string(),
            tts_text: Some("hello!".to_string()),
            voice_tone: Some("warm".to_string()),
        };
        let wire = original.to_wire_text();
        assert_eq!(StructuredText::parse(&wire), original);

        let plain = StructuredText::plain("hello");
        assert_eq!(plain.to_wire_text(), "hello");
    }

    #[test]
    fn edited_copy_gets_fresh_id_and_content() {
        let original = Message::user(conv(), "first");
        let edited = original.edited_copy(vec![ContentItem::user_text("second")]);
        assert_ne!(edited.id, original.id);
        assert_eq!(edited.conversation_id, original.conversation_id);
        assert_eq!(edited.text(), "second");
        assert_eq!(original.text(), "first");
    }

    #[test]
    fn unresolved_calls_found_in_order() {
        let c = conv();
        let assistant = Message::assistant(
            c.clone(),
            vec![
                ContentItem::assistant_text("working"),
                tool_call("a", "read_file"),
                tool_call("b", "run_shell"),
            ],
        );
        let orphans = unresolved_tool_calls(&[assistant.clone()]);
        assert_eq!(
            orphans,
            vec![
                ("a".to_string(), "read_file".to_string()),
                ("b".to_string(), "run_shell".to_string())
            ]
        );

        let repair = Message::new(
            c,
            Role::User,
            vec![ContentItem::interrupted_tool_result("a", "read_file")],
        );
        let orphans = unresolved_tool_calls(&[assistant, repair]);
        assert_eq!(orphans, vec![("b".to_string(), "run_shell".to_string())]);
    }

    #[test]
    fn interrupted_result_is_error_with_standard_text() {
        let item = ContentItem::interrupted_tool_result("a", "read_file");
        match item {
            ContentItem::ToolResult {
                is_error, result, ..
            } => {
                assert!(is_error);
                assert_eq!(result, vec![ResultPart::text(INTERRUPTED_TOOL_RESULT)]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
