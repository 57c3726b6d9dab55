use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] bobbin_store::StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
