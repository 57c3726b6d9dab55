use thiserror::Error;

/// Errors that can occur during conversation-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist in the database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column failed to (de)serialise.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
