use std::fmt;

use thiserror::Error;
use wilee_core::{CoreError, Hash};
use wilee_store::StoreError;

use crate::types::NodeId;

/// Configuration problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Nil cluster configuration")]
    NilReceiver,

    #[error("Missing {0}")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Compound(#[from] CompoundError),
}

/// Every problem found by a single validation pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompoundError {
    errors: Vec<ConfigError>,
}

impl CompoundError {
    pub fn new() -> Self {
        CompoundError { errors: Vec::new() }
    }

    pub fn push(&mut self, error: ConfigError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Names of the fields reported as missing
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::Missing(field) => Some(*field),
                _ => None,
            })
            .collect()
    }

    /// `Ok` when nothing was collected
    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Compound(self))
        }
    }
}

impl fmt::Display for CompoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cluster configuration: ")?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompoundError {}

/// Snapshot restore failures. State is left untouched on every variant.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Malformed snapshot: {0}")]
    Malformed(String),

    #[error("Unsupported snapshot format version {0}")]
    UnsupportedVersion(u16),

    #[error("Snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Hash, actual: Hash },

    #[error("Stale snapshot at index {snapshot_index}, already applied {last_applied}")]
    Stale { snapshot_index: u64, last_applied: u64 },

    #[error("Store rejected snapshot image: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Corrupt log entry at index {index}: {reason}")]
    CorruptEntry { index: u64, reason: String },

    #[error("Restore failed: {0}")]
    Restore(#[from] RestoreError),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Consensus engine error: {0}")]
    Engine(String),

    #[error("Failed to start consensus node while {context}: {source}")]
    ConsensusStart {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node not started")]
    NotStarted,

    #[error("Not the leader (leader: {leader_id:?} at {leader_addr:?})")]
    NotLeader {
        leader_id: Option<NodeId>,
        leader_addr: Option<String>,
    },

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Membership change failed: {0}")]
    Membership(String),

    #[error("Invalid operation: {0}")]
    Operation(#[from] CoreError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Node is shut down: {0}")]
    Shutdown(String),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl ClusterError {
    pub(crate) fn start<E>(context: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ClusterError::ConsensusStart {
            context,
            source: source.into(),
        }
    }
}
