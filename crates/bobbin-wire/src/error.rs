use thiserror::Error;

/// Errors raised by the stream codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// The line was not valid JSON, or a known record failed to parse.
    #[error("malformed wire record: {0}")]
    Json(#[from] serde_json::Error),

    /// A record was structurally valid JSON but not a JSON object.
    #[error("wire record is not a JSON object: {got}")]
    NotAnObject { got: String },
}

pub type Result<T> = std::result::Result<T, WireError>;
