//! Top-level wire records. Every line the subprocess reads or writes is one
//! of these, discriminated by the `type` field.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::content::{ContentBlock, ContentUnion};

/// Out-of-band signalling from the child. Subtype `init` carries the
/// canonical session id for the started process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub subtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Fields newer subprocess builds add ride along untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SystemRecord {
    pub fn init(session_id: impl Into<String>) -> Self {
        Self {
            subtype: "init".to_string(),
            session_id: Some(session_id.into()),
            cwd: None,
            tools: Vec::new(),
            mcp_servers: None,
            model: None,
            permission_mode: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

/// User-role envelope. The driver writes these for operator input; the child
/// echoes them back carrying tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub message: UserPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub role: String,
    pub content: ContentUnion,
}

impl UserRecord {
    /// A plain-text user turn, as written by `send_message`.
    pub fn text(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: UserPayload {
                role: "user".to_string(),
                content: ContentUnion::Text(text.into()),
            },
            session_id: Some(session_id.into()),
            parent_tool_use_id: None,
        }
    }
}

/// Assistant-role envelope streamed by the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantRecord {
    pub message: AssistantPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantPayload {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AssistantRecord {
    pub fn text(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: AssistantPayload {
                role: "assistant".to_string(),
                content: vec![ContentBlock::text(text)],
                stop_reason: None,
                usage: None,
                model: None,
            },
            session_id: Some(session_id.into()),
            parent_tool_use_id: None,
        }
    }
}

/// End-of-turn marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub subtype: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ResultRecord {
    pub fn success(session_id: impl Into<String>, num_turns: u32) -> Self {
        Self {
            subtype: "success".to_string(),
            duration_ms: 0,
            duration_api_ms: 0,
            is_error: false,
            num_turns,
            session_id: Some(session_id.into()),
            usage: None,
            total_cost_usd: None,
            result: None,
        }
    }
}

/// Driver → child control channel (currently only `interrupt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequestRecord {
    pub request_id: String,
    pub request: ControlRequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequestBody {
    pub subtype: String,
}

impl ControlRequestRecord {
    pub fn interrupt(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            request: ControlRequestBody {
                subtype: "interrupt".to_string(),
            },
        }
    }
}

/// Child → driver acknowledgement for a control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponseRecord {
    pub response: ControlResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponseBody {
    pub request_id: String,
    pub subtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponseRecord {
    pub fn success(request_id: impl Into<String>) -> Self {
        Self {
            response: ControlResponseBody {
                request_id: request_id.into(),
                subtype: "success".to_string(),
                error: None,
            },
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response: ControlResponseBody {
                request_id: request_id.into(),
                subtype: "error".to_string(),
                error: Some(message.into()),
            },
        }
    }
}

/// One decoded wire line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    System(SystemRecord),
    User(UserRecord),
    Assistant(AssistantRecord),
    Result(ResultRecord),
    ControlRequest(ControlRequestRecord),
    ControlResponse(ControlResponseRecord),
    /// A record whose `type` we do not recognise, preserved verbatim.
    Unknown(Value),
}

impl StreamRecord {
    /// Parse the `type` discriminator first, then the body — a recognised
    /// tag with a malformed body is an error, an unrecognised tag is
    /// `Unknown`.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Strip the discriminator so it does not leak into flattened
        // extra-field maps; `Unknown` keeps the original value whole.
        let strip = |mut value: Value| -> Value {
            if let Value::Object(ref mut map) = value {
                map.remove("type");
            }
            value
        };

        let record = match tag.as_str() {
            "system" => StreamRecord::System(serde_json::from_value(strip(value))?),
            "user" => StreamRecord::User(serde_json::from_value(strip(value))?),
            "assistant" => StreamRecord::Assistant(serde_json::from_value(strip(value))?),
            "result" => StreamRecord::Result(serde_json::from_value(strip(value))?),
            "control_request" => {
                StreamRecord::ControlRequest(serde_json::from_value(strip(value))?)
            }
            "control_response" => {
                StreamRecord::ControlResponse(serde_json::from_value(strip(value))?)
            }
            _ => StreamRecord::Unknown(value),
        };
        Ok(record)
    }

    pub fn to_value(&self) -> Value {
        match self {
            StreamRecord::System(r) => tagged("system", r),
            StreamRecord::User(r) => tagged("user", r),
            StreamRecord::Assistant(r) => tagged("assistant", r),
            StreamRecord::Result(r) => tagged("result", r),
            StreamRecord::ControlRequest(r) => tagged("control_request", r),
            StreamRecord::ControlResponse(r) => tagged("control_response", r),
            StreamRecord::Unknown(v) => v.clone(),
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamRecord::System(_) => "system",
            StreamRecord::User(_) => "user",
            StreamRecord::Assistant(_) => "assistant",
            StreamRecord::Result(_) => "result",
            StreamRecord::ControlRequest(_) => "control_request",
            StreamRecord::ControlResponse(_) => "control_response",
            StreamRecord::Unknown(_) => "unknown",
        }
    }
}

fn tagged<T: Serialize>(tag: &str, body: &T) -> Value {
    let mut value = serde_json::to_value(body).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("type".to_string(), Value::String(tag.to_string()));
    }
    value
}

impl Serialize for StreamRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StreamRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        StreamRecord::from_value(value).map_err(D::Error::custom)
    }
}
