use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not spawn or reach the subprocess.
    #[error("subprocess unavailable: {0}")]
    Unavailable(String),

    /// A write to or read from the child failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bobbin_wire::WireError),

    #[error("store error: {0}")]
    Store(#[from] bobbin_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
