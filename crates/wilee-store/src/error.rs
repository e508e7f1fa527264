use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported store image version {0}")]
    UnsupportedVersion(u16),

    #[error("Core error: {0}")]
    Core(#[from] wilee_core::CoreError),
}
