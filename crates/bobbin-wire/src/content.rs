//! Content blocks — the sealed variants carried inside `user` and
//! `assistant` envelopes, plus the string-or-array unions the wire allows.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: ImageSourceBlock,
}

/// Where an image block's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSourceBlock {
    Base64 {
        media_type: String,
        data: String,
    },
    Url {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        file_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

/// One content block. Unknown tags are preserved verbatim so newer
/// subprocess builds keep flowing through older shells.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Thinking(ThinkingBlock),
    Image(ImageBlock),
    Unknown(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextBlock { text: text.into() })
    }

    /// Parse the `type` discriminator first, then the body. A recognised tag
    /// with a malformed body is an error; an unrecognised tag is `Unknown`.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let block = match tag.as_str() {
            "text" => ContentBlock::Text(serde_json::from_value(value)?),
            "tool_use" => ContentBlock::ToolUse(serde_json::from_value(value)?),
            "tool_result" => ContentBlock::ToolResult(serde_json::from_value(value)?),
            "thinking" => ContentBlock::Thinking(serde_json::from_value(value)?),
            "image" => ContentBlock::Image(serde_json::from_value(value)?),
            _ => ContentBlock::Unknown(value),
        };
        Ok(block)
    }

    pub fn to_value(&self) -> Value {
        match self {
            ContentBlock::Text(b) => tagged("text", b),
            ContentBlock::ToolUse(b) => tagged("tool_use", b),
            ContentBlock::ToolResult(b) => tagged("tool_result", b),
            ContentBlock::Thinking(b) => tagged("thinking", b),
            ContentBlock::Image(b) => tagged("image", b),
            ContentBlock::Unknown(v) => v.clone(),
        }
    }
}

/// Serialise `body` and stamp the `type` discriminator onto it.
fn tagged<T: Serialize>(tag: &str, body: &T) -> Value {
    let mut value = serde_json::to_value(body).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("type".to_string(), Value::String(tag.to_string()));
    }
    value
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ContentBlock::from_value(value).map_err(D::Error::custom)
    }
}

/// User-message content: a bare string or a block array, both accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentUnion {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// `tool_result.content` comes in the same two shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_block_round_trips() {
        let json = r#"{"type":"tool_use","id":"t1","name":"read_file","input":{"path":"a.rs"}}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        match &block {
            ContentBlock::ToolUse(b) => assert_eq!(b.name, "read_file"),
            other => panic!("unexpected block: {other:?}"),
        }
        let back: ContentBlock = serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let json = r#"{"type":"server_tool_use","id":"x","weird":true}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        match &block {
            ContentBlock::Unknown(v) => assert_eq!(v["weird"], true),
            other => panic!("unexpected block: {other:?}"),
        }
        // Pass-through must survive re-encoding untouched.
        let encoded = serde_json::to_value(&block).unwrap();
        assert_eq!(encoded["type"], "server_tool_use");
    }

    #[test]
    fn known_tag_with_bad_body_is_an_error() {
        let json = r#"{"type":"tool_use","id":"t1"}"#;
        assert!(serde_json::from_str::<ContentBlock>(json).is_err());
    }

    #[test]
    fn content_union_accepts_both_shapes() {
        let text: ContentUnion = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, ContentUnion::Text("hello".to_string()));

        let blocks: ContentUnion =
            serde_json::from_str(r#"[{"type":"text","text":"hello"}]"#).unwrap();
        assert_eq!(
            blocks,
            ContentUnion::Blocks(vec![ContentBlock::text("hello")])
        );
    }

    #[test]
    fn tool_result_content_accepts_both_shapes() {
        let text: ToolResultContent = serde_json::from_str(r#""done""#).unwrap();
        assert_eq!(text, ToolResultContent::Text("done".to_string()));

        let blocks: ToolResultContent =
            serde_json::from_str(r#"[{"type":"text","text":"done"}]"#).unwrap();
        assert!(matches!(blocks, ToolResultContent::Blocks(ref b) if b.len() == 1));
    }
}
