//! Certificate state machine driven by committed log entries.
//!
//! Entries are applied strictly above the last-applied index; anything at
//! or below it is a redelivery and is skipped. Store operations are
//! idempotent, so a replay after restart converges to the same store.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use openraft::{BasicNode, LogId, Membership, StoredMembership};
use serde::{Deserialize, Serialize};
use wilee_core::{hash_blake3, CertificateOperation, CertificateRecord, Hash, ValidityWindow};
use wilee_store::{write_atomic, CertificateStore, StoreError};

use crate::error::{RestoreError, StateMachineError};
use crate::logger::{Logger, RaftLog};
use crate::types::{ApplyOutcome, ApplyResponse, LogEntry, NodeId};

/// Version of the snapshot envelope
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachinePhase {
    /// Nothing applied yet
    Empty,
    CaughtUp,
    /// Receiving a snapshot
    Recovering,
}

/// Serialized state machine: store image plus log position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStoreSnapshot {
    pub format_version: u16,
    pub last_applied: Option<LogId<NodeId>>,
    pub membership: StoredMembership<NodeId, BasicNode>,
    pub store_image: Vec<u8>,
    /// Blake3 of `store_image`
    pub checksum: Hash,
}

impl CertificateStoreSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>, StateMachineError> {
        bincode::serialize(self).map_err(|e| StateMachineError::Snapshot(e.to_string()))
    }

    /// Decode and verify an encoded snapshot
    pub fn decode(bytes: &[u8]) -> Result<Self, RestoreError> {
        // The version leads the envelope as a little-endian u16.
        let version = match bytes {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return Err(RestoreError::Malformed("truncated header".to_string())),
        };
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(RestoreError::UnsupportedVersion(version));
        }

        let snapshot: CertificateStoreSnapshot =
            bincode::deserialize(bytes).map_err(|e| RestoreError::Malformed(e.to_string()))?;

        let actual = hash_blake3(&snapshot.store_image);
        if actual != snapshot.checksum {
            return Err(RestoreError::ChecksumMismatch {
                expected: snapshot.checksum,
                actual,
            });
        }
        Ok(snapshot)
    }

    pub fn index(&self) -> Option<u64> {
        self.last_applied.map(|log_id| log_id.index)
    }
}

/// Log position of the store, persisted beside it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AppliedState {
    last_applied: Option<LogId<NodeId>>,
    membership: StoredMembership<NodeId, BasicNode>,
}

pub struct CertStateMachine {
    store: Box<dyn CertificateStore>,
    applied_path: Option<PathBuf>,
    last_applied: Option<LogId<NodeId>>,
    membership: StoredMembership<NodeId, BasicNode>,
    phase: MachinePhase,
    logger: Logger,
}

impl fmt::Debug for CertStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStateMachine")
            .field("certificates", &self.store.len())
            .field("last_applied", &self.last_applied)
            .field("phase", &self.phase)
            .finish()
    }
}

impl CertStateMachine {
    pub fn new(store: Box<dyn CertificateStore>, logger: Logger) -> Self {
        CertStateMachine {
            store,
            applied_path: None,
            last_applied: None,
            membership: StoredMembership::default(),
            phase: MachinePhase::Empty,
            logger,
        }
    }

    /// State machine over a durable store whose log position is kept at
    /// `applied_path`, so a restart resumes after the last applied entry
    pub fn open(
        store: Box<dyn CertificateStore>,
        applied_path: impl Into<PathBuf>,
        logger: Logger,
    ) -> Result<Self, StateMachineError> {
        let applied_path = applied_path.into();
        let applied = load_applied(&applied_path)?;

        let mut machine = CertStateMachine::new(store, logger);
        machine.last_applied = applied.last_applied;
        machine.membership = applied.membership;
        machine.applied_path = Some(applied_path);
        machine.settle_phase();

        machine.logger.infof(format_args!(
            "resuming state machine at {:?} with {} certificates",
            machine.last_applied_index(),
            machine.store.len()
        ));
        Ok(machine)
    }

    pub fn last_applied(&self) -> Option<LogId<NodeId>> {
        self.last_applied
    }

    pub fn last_applied_index(&self) -> Option<u64> {
        self.last_applied.map(|log_id| log_id.index)
    }

    pub fn membership(&self) -> &StoredMembership<NodeId, BasicNode> {
        &self.membership
    }

    pub fn phase(&self) -> MachinePhase {
        self.phase
    }

    pub fn certificate(&self, domain: &str) -> Option<CertificateRecord> {
        self.store.get(domain)
    }

    pub fn domains(&self) -> Vec<String> {
        self.store.domains()
    }

    pub fn certificate_count(&self) -> usize {
        self.store.len()
    }

    fn is_applied(&self, log_id: &LogId<NodeId>) -> bool {
        self.last_applied
            .is_some_and(|applied| log_id.index <= applied.index)
    }

    fn advance(&mut self, log_id: LogId<NodeId>) -> Result<(), StateMachineError> {
        self.last_applied = Some(log_id);
        self.phase = MachinePhase::CaughtUp;
        self.persist_applied().map_err(StateMachineError::from)
    }

    fn persist_applied(&self) -> Result<(), StoreError> {
        let Some(path) = &self.applied_path else {
            return Ok(());
        };
        let applied = AppliedState {
            last_applied: self.last_applied,
            membership: self.membership.clone(),
        };
        let bytes = bincode::serialize(&applied)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    fn settle_phase(&mut self) {
        self.phase = if self.last_applied.is_some() {
            MachinePhase::CaughtUp
        } else {
            MachinePhase::Empty
        };
    }

    /// Apply a committed application entry
    pub fn apply(
        &mut self,
        log_id: LogId<NodeId>,
        entry: &LogEntry,
    ) -> Result<ApplyResponse, StateMachineError> {
        if self.is_applied(&log_id) {
            self.logger
                .v(2)
                .infof(format_args!("skipping applied entry {}", log_id));
            return Ok(ApplyResponse::new(log_id.index, ApplyOutcome::Skipped));
        }

        let op = entry.decode().map_err(|e| StateMachineError::CorruptEntry {
            index: log_id.index,
            reason: e.to_string(),
        })?;

        let outcome = match op.validate() {
            Ok(()) => self.execute(&op)?,
            Err(e) => {
                self.logger
                    .warningf(format_args!("rejected {} at {}: {}", op, log_id, e));
                ApplyOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };

        self.advance(log_id)?;
        self.logger
            .v(1)
            .infof(format_args!("applied {} at {}: {:?}", op, log_id, outcome));
        Ok(ApplyResponse::new(log_id.index, outcome))
    }

    fn execute(&mut self, op: &CertificateOperation) -> Result<ApplyOutcome, StateMachineError> {
        let outcome: ApplyOutcome = match op {
            CertificateOperation::Issue {
                domain,
                certificate,
                not_before,
                not_after,
            } => {
                let validity = ValidityWindow::new(*not_before, *not_after)
                    .map_err(wilee_store::StoreError::from)?;
                self.store.issue(domain, certificate, validity)?.into()
            }
            CertificateOperation::Revoke { domain } => self.store.revoke(domain)?.into(),
        };
        Ok(outcome)
    }

    /// Apply an entry that carries no operation
    pub fn apply_blank(&mut self, log_id: LogId<NodeId>) -> Result<ApplyResponse, StateMachineError> {
        if self.is_applied(&log_id) {
            return Ok(ApplyResponse::new(log_id.index, ApplyOutcome::Skipped));
        }
        self.advance(log_id)?;
        Ok(ApplyResponse::new(log_id.index, ApplyOutcome::Blank))
    }

    /// Apply a membership change entry
    pub fn apply_membership(
        &mut self,
        log_id: LogId<NodeId>,
        membership: Membership<NodeId, BasicNode>,
    ) -> Result<ApplyResponse, StateMachineError> {
        if self.is_applied(&log_id) {
            return Ok(ApplyResponse::new(log_id.index, ApplyOutcome::Skipped));
        }
        self.membership = StoredMembership::new(Some(log_id), membership);
        self.advance(log_id)?;
        self.logger
            .infof(format_args!("membership changed at {}", log_id));
        Ok(ApplyResponse::new(log_id.index, ApplyOutcome::Membership))
    }

    /// Encode the full state at the last-applied index
    pub fn snapshot(&self) -> Result<Cursor<Vec<u8>>, StateMachineError> {
        let store_image = self.store.export_all()?;
        let snapshot = CertificateStoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            last_applied: self.last_applied,
            membership: self.membership.clone(),
            checksum: hash_blake3(&store_image),
            store_image,
        };
        Ok(Cursor::new(snapshot.encode()?))
    }

    pub fn begin_recovery(&mut self) {
        self.phase = MachinePhase::Recovering;
    }

    /// Replace the whole state with a snapshot.
    ///
    /// A snapshot older than the last-applied index is rejected. On any
    /// error the store and the last-applied index are unchanged.
    pub fn restore<R: Read>(&mut self, mut reader: R) -> Result<(), StateMachineError> {
        let result = self.restore_from(&mut reader);
        match &result {
            Ok(()) => self.logger.infof(format_args!(
                "restored snapshot at {:?}, {} certificates",
                self.last_applied_index(),
                self.store.len()
            )),
            Err(e) => {
                self.settle_phase();
                self.logger.errorf(format_args!("snapshot restore failed: {}", e));
            }
        }
        result.map_err(StateMachineError::from)
    }

    fn restore_from<R: Read>(&mut self, reader: &mut R) -> Result<(), RestoreError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| RestoreError::Malformed(e.to_string()))?;
        let snapshot = CertificateStoreSnapshot::decode(&bytes)?;

        if let Some(last_applied) = self.last_applied_index() {
            let snapshot_index = snapshot.index();
            if snapshot_index.map_or(true, |index| index < last_applied) {
                return Err(RestoreError::Stale {
                    snapshot_index: snapshot_index.unwrap_or(0),
                    last_applied,
                });
            }
        }

        self.store.replace_all(&snapshot.store_image)?;
        self.last_applied = snapshot.last_applied;
        self.membership = snapshot.membership;
        self.settle_phase();
        self.persist_applied()?;
        Ok(())
    }
}

fn load_applied(path: &Path) -> Result<AppliedState, StateMachineError> {
    if !path.exists() {
        return Ok(AppliedState::default());
    }
    let bytes = std::fs::read(path).map_err(|e| StoreError::Storage(e.to_string()))?;
    let applied =
        bincode::deserialize(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;
    use wilee_store::MemoryCertStore;

    fn machine() -> CertStateMachine {
        CertStateMachine::new(Box::new(MemoryCertStore::new()), Logger::default())
    }

    fn log_id(index: u64) -> LogId<NodeId> {
        LogId::new(CommittedLeaderId::new(1, 1), index)
    }

    fn issue(domain: &str, cert: &[u8], not_before: u64) -> LogEntry {
        let op = CertificateOperation::issue(domain, cert.to_vec(), not_before, not_before + 100);
        LogEntry::from_operation(&op).unwrap()
    }

    fn revoke(domain: &str) -> LogEntry {
        LogEntry::from_operation(&CertificateOperation::revoke(domain)).unwrap()
    }

    fn export(sm: &CertStateMachine) -> Vec<u8> {
        sm.store.export_all().unwrap()
    }

    #[test]
    fn test_apply_operations() {
        let mut sm = machine();
        assert_eq!(sm.phase(), MachinePhase::Empty);

        let r = sm.apply(log_id(1), &issue("a.example", b"a1", 10)).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Issued);
        let r = sm.apply(log_id(2), &issue("a.example", b"a2", 20)).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Replaced);
        let r = sm.apply(log_id(3), &issue("a.example", b"a1", 10)).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Superseded);
        let r = sm.apply(log_id(4), &revoke("b.example")).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::UnknownDomain);

        assert_eq!(sm.last_applied_index(), Some(4));
        assert_eq!(sm.phase(), MachinePhase::CaughtUp);
        assert_eq!(sm.certificate("a.example").unwrap().certificate, b"a2".to_vec());
    }

    #[test]
    fn test_replay_twice_is_idempotent() {
        let entries = vec![
            issue("a.example", b"a", 10),
            issue("b.example", b"b", 10),
            revoke("a.example"),
            issue("c.example", b"c", 10),
            issue("b.example", b"b2", 50),
        ];

        let mut once = machine();
        for (i, entry) in entries.iter().enumerate() {
            once.apply(log_id(i as u64 + 1), entry).unwrap();
        }

        // A restarted node with a durable store replays from a fresh index.
        let mut twice = machine();
        for round in 0..2 {
            let mut replay = machine();
            replay.store.replace_all(&export(&twice)).unwrap();
            for (i, entry) in entries.iter().enumerate() {
                replay.apply(log_id(i as u64 + 1), entry).unwrap();
            }
            twice = replay;
            assert_eq!(export(&twice), export(&once), "round {}", round);
        }
    }

    #[test]
    fn test_redelivered_index_is_skipped() {
        let mut sm = machine();
        sm.apply(log_id(1), &issue("a.example", b"a", 10)).unwrap();
        sm.apply(log_id(2), &revoke("a.example")).unwrap();

        let r = sm.apply(log_id(1), &issue("a.example", b"a", 10)).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Skipped);
        assert!(sm.certificate("a.example").is_none());
        assert_eq!(sm.last_applied_index(), Some(2));
    }

    #[test]
    fn test_corrupt_entry_keeps_last_applied() {
        let mut sm = machine();
        sm.apply(log_id(1), &issue("a.example", b"a", 10)).unwrap();

        let err = sm
            .apply(log_id(2), &LogEntry::from(vec![1, 0xff, 0xff]))
            .unwrap_err();
        assert!(matches!(err, StateMachineError::CorruptEntry { index: 2, .. }));
        assert_eq!(sm.last_applied_index(), Some(1));

        let err = sm.apply(log_id(2), &LogEntry::from(Vec::new())).unwrap_err();
        assert!(matches!(err, StateMachineError::CorruptEntry { .. }));
        assert_eq!(sm.last_applied_index(), Some(1));
    }

    #[test]
    fn test_invalid_operation_is_rejected() {
        let mut sm = machine();
        let op = CertificateOperation::issue("a.example", b"a".to_vec(), 50, 10);
        let entry = LogEntry::from_operation(&op).unwrap();

        let r = sm.apply(log_id(1), &entry).unwrap();
        assert!(matches!(r.outcome, ApplyOutcome::Rejected { .. }));
        assert_eq!(sm.certificate_count(), 0);
        assert_eq!(sm.last_applied_index(), Some(1));
    }

    #[test]
    fn test_blank_and_membership() {
        let mut sm = machine();
        assert_eq!(sm.apply_blank(log_id(1)).unwrap().outcome, ApplyOutcome::Blank);

        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(1, BasicNode::new("127.0.0.1:7480"));
        let voters: std::collections::BTreeSet<NodeId> = [1].into_iter().collect();
        let membership = Membership::new(vec![voters], nodes);
        let r = sm.apply_membership(log_id(2), membership).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Membership);
        assert_eq!(sm.membership().log_id(), &Some(log_id(2)));

        assert_eq!(sm.apply_blank(log_id(2)).unwrap().outcome, ApplyOutcome::Skipped);
    }

    #[test]
    fn test_open_resumes_after_last_applied() {
        let dir = tempfile::tempdir().unwrap();
        let applied = dir.path().join("applied.bin");

        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(1, BasicNode::new("127.0.0.1:7480"));
        let voters: std::collections::BTreeSet<NodeId> = [1].into_iter().collect();

        {
            let mut sm =
                CertStateMachine::open(Box::new(MemoryCertStore::new()), &applied, Logger::default())
                    .unwrap();
            assert_eq!(sm.phase(), MachinePhase::Empty);
            sm.apply_membership(log_id(1), Membership::new(vec![voters], nodes))
                .unwrap();
            sm.apply(log_id(2), &issue("a.example", b"a", 10)).unwrap();
        }

        let mut sm =
            CertStateMachine::open(Box::new(MemoryCertStore::new()), &applied, Logger::default())
                .unwrap();
        assert_eq!(sm.last_applied_index(), Some(2));
        assert_eq!(sm.phase(), MachinePhase::CaughtUp);
        assert_eq!(sm.membership().log_id(), &Some(log_id(1)));

        let r = sm.apply(log_id(2), &issue("a.example", b"a", 10)).unwrap();
        assert_eq!(r.outcome, ApplyOutcome::Skipped);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut source = machine();
        source.apply(log_id(1), &issue("a.example", b"a", 10)).unwrap();
        source.apply(log_id(2), &issue("b.example", b"b", 10)).unwrap();
        let snapshot = source.snapshot().unwrap();

        let mut target = machine();
        target.begin_recovery();
        assert_eq!(target.phase(), MachinePhase::Recovering);
        target.restore(snapshot).unwrap();

        assert_eq!(target.phase(), MachinePhase::CaughtUp);
        assert_eq!(target.last_applied_index(), Some(2));
        assert_eq!(target.domains(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_stale_snapshot_rejected() {
        let mut sm = machine();
        sm.apply(log_id(1), &issue("a.example", b"a", 10)).unwrap();
        let older = sm.snapshot().unwrap().into_inner();
        sm.apply(log_id(2), &issue("b.example", b"b", 10)).unwrap();
        let newer = sm.snapshot().unwrap().into_inner();

        let mut target = machine();
        target.restore(newer.as_slice()).unwrap();
        let before = export(&target);

        let err = target.restore(older.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::Restore(RestoreError::Stale {
                snapshot_index: 1,
                last_applied: 2
            })
        ));
        assert_eq!(export(&target), before);
        assert_eq!(target.last_applied_index(), Some(2));

        // Same index is accepted.
        target.restore(newer.as_slice()).unwrap();
    }

    #[test]
    fn test_corrupted_snapshot_leaves_state() {
        let mut source = machine();
        source.apply(log_id(3), &issue("a.example", b"a", 10)).unwrap();
        let bytes = source.snapshot().unwrap().into_inner();

        let mut target = machine();
        target.apply(log_id(1), &issue("z.example", b"z", 10)).unwrap();
        let before = export(&target);

        let mut tampered = CertificateStoreSnapshot::decode(&bytes).unwrap();
        tampered.checksum = Hash::ZERO;
        let err = target
            .restore(tampered.encode().unwrap().as_slice())
            .unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::Restore(RestoreError::ChecksumMismatch { .. })
        ));

        let mut unknown = bytes.clone();
        unknown[0] = 7;
        unknown[1] = 0;
        let err = target.restore(unknown.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::Restore(RestoreError::UnsupportedVersion(7))
        ));

        let err = target.restore(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::Restore(RestoreError::Malformed(_))
        ));

        assert_eq!(export(&target), before);
        assert_eq!(target.last_applied_index(), Some(1));
    }
}
