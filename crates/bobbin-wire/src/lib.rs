//! bobbin-wire — the newline-delimited JSON protocol spoken with the
//! streaming CLI subprocess.
//!
//! Each line on the wire is one JSON object with a `type` discriminator.
//! The decoder is total over well-formed records: unknown `type` tags (and
//! unknown content-block tags) are preserved as `Unknown` values instead of
//! failing the session, while malformed JSON surfaces a [`WireError`] to the
//! owning session. The encoder is deterministic — serialising the same
//! record twice yields byte-identical lines.

pub mod codec;
pub mod content;
pub mod convert;
pub mod error;
pub mod records;

pub use codec::{decode_line, encode_line};
pub use content::{
    ContentBlock, ContentUnion, ImageBlock, ImageSourceBlock, TextBlock, ThinkingBlock,
    ToolResultBlock, ToolResultContent, ToolUseBlock,
};
pub use convert::{blocks_from_items, items_from_blocks, message_from_record, ToolNameIndex};
pub use error::WireError;
pub use records::{
    AssistantPayload, AssistantRecord, ControlRequestBody, ControlRequestRecord,
    ControlResponseBody, ControlResponseRecord, ResultRecord, StreamRecord, SystemRecord,
    UserPayload, UserRecord,
};
