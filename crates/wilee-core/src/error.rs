use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Empty log entry")]
    EmptyEntry,

    #[error("Unknown log entry format: {0}")]
    UnknownEntryFormat(u8),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid validity window: not_before {not_before} is after not_after {not_after}")]
    InvalidValidity { not_before: u64, not_after: u64 },

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}
