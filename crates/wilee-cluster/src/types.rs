use std::fmt;
use std::io::Cursor;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};
use wilee_core::{decode_operation, encode_operation, CertificateOperation, CoreError};
use wilee_store::{IssueOutcome, RevokeOutcome};

pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Raft type configuration of the certificate control plane.
    pub TypeConfig:
        D = LogEntry,
        R = ApplyResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime
);

/// Replicated log payload: an encoded [`CertificateOperation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn from_operation(op: &CertificateOperation) -> Result<Self, CoreError> {
        Ok(LogEntry {
            payload: encode_operation(op)?,
        })
    }

    pub fn decode(&self) -> Result<CertificateOperation, CoreError> {
        decode_operation(&self.payload)
    }
}

impl From<Vec<u8>> for LogEntry {
    fn from(payload: Vec<u8>) -> Self {
        LogEntry { payload }
    }
}

/// What applying one entry did to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Issued,
    Replaced,
    Unchanged,
    Superseded,
    Revoked,
    UnknownDomain,
    /// Invalid operation, store untouched
    Rejected { reason: String },
    Membership,
    Blank,
    /// Index already applied
    Skipped,
}

impl ApplyOutcome {
    /// Check if the store changed
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Issued | ApplyOutcome::Replaced | ApplyOutcome::Revoked
        )
    }
}

impl From<IssueOutcome> for ApplyOutcome {
    fn from(outcome: IssueOutcome) -> Self {
        match outcome {
            IssueOutcome::Issued => ApplyOutcome::Issued,
            IssueOutcome::Replaced => ApplyOutcome::Replaced,
            IssueOutcome::Unchanged => ApplyOutcome::Unchanged,
            IssueOutcome::Superseded => ApplyOutcome::Superseded,
        }
    }
}

impl From<RevokeOutcome> for ApplyOutcome {
    fn from(outcome: RevokeOutcome) -> Self {
        match outcome {
            RevokeOutcome::Removed => ApplyOutcome::Revoked,
            RevokeOutcome::Unknown => ApplyOutcome::UnknownDomain,
        }
    }
}

/// Response of the state machine to one committed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub index: u64,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

impl ApplyResponse {
    pub fn new(index: u64, outcome: ApplyOutcome) -> Self {
        ApplyResponse { index, outcome }
    }
}

impl fmt::Display for ApplyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.index, self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_operation() {
        let op = CertificateOperation::issue("example.org", b"cert".to_vec(), 1, 2);
        let entry = LogEntry::from_operation(&op).unwrap();
        assert_eq!(entry.decode().unwrap(), op);

        assert!(LogEntry::from(vec![0xff]).decode().is_err());
    }

    #[test]
    fn test_apply_response_json() {
        let response = ApplyResponse::new(
            4,
            ApplyOutcome::Rejected {
                reason: "bad window".to_string(),
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["index"], 4);
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["reason"], "bad window");

        let back: ApplyResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(ApplyOutcome::from(IssueOutcome::Issued), ApplyOutcome::Issued);
        assert_eq!(
            ApplyOutcome::from(RevokeOutcome::Unknown),
            ApplyOutcome::UnknownDomain
        );
        assert!(ApplyOutcome::Revoked.mutated());
        assert!(!ApplyOutcome::Skipped.mutated());
    }
}
