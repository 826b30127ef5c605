use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("seal error: {0}")]
    Seal(String),

    #[error("malformed stored value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => EngineError::NotFound(key),
            StoreError::AlreadyExists(key) => EngineError::AlreadyExists(key),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidFormat(msg.into())
    }
}
