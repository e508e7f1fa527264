//! OpenRaft storage for the certificate state machine.
//!
//! Implements [`RaftLogReader`], [`RaftStorage`] and [`RaftSnapshotBuilder`].
//! The log and the vote live in memory and, when the node has a storage
//! root, in [`RaftFiles`] written before each call returns. Applied state
//! lives in the shared [`CertStateMachine`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use openraft::storage::{LogState, RaftLogReader, RaftSnapshotBuilder, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftStorage,
    SnapshotMeta, StorageError, StoredMembership, Vote,
};
use tokio::sync::RwLock;

use crate::error::StateMachineError;
use wilee_store::StoreError;

use crate::log_files::RaftFiles;
use crate::logger::{Logger, RaftLog};
use crate::state_machine::CertStateMachine;
use crate::types::{ApplyResponse, NodeId, TypeConfig};

#[derive(Debug, Clone)]
struct StoredSnapshot {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: Vec<u8>,
}

impl StoredSnapshot {
    fn to_snapshot(&self) -> Snapshot<TypeConfig> {
        Snapshot {
            meta: self.meta.clone(),
            snapshot: Box::new(Cursor::new(self.data.clone())),
        }
    }
}

/// Raft log, vote and state machine of one node
#[derive(Debug, Clone)]
pub struct ClusterStore {
    log: Arc<RwLock<BTreeMap<u64, Entry<TypeConfig>>>>,
    last_purged: Arc<RwLock<Option<LogId<NodeId>>>>,
    vote: Arc<RwLock<Option<Vote<NodeId>>>>,
    state_machine: Arc<RwLock<CertStateMachine>>,
    current_snapshot: Arc<RwLock<Option<StoredSnapshot>>>,
    snapshot_idx: Arc<AtomicU64>,
    files: Option<RaftFiles>,
    logger: Logger,
}

impl ClusterStore {
    pub fn new(state_machine: Arc<RwLock<CertStateMachine>>, logger: Logger) -> Self {
        ClusterStore {
            log: Arc::new(RwLock::new(BTreeMap::new())),
            last_purged: Arc::new(RwLock::new(None)),
            vote: Arc::new(RwLock::new(None)),
            state_machine,
            current_snapshot: Arc::new(RwLock::new(None)),
            snapshot_idx: Arc::new(AtomicU64::new(0)),
            files: None,
            logger,
        }
    }

    /// Store whose log, vote and purge point persist under `dir`
    pub fn open(
        dir: &Path,
        state_machine: Arc<RwLock<CertStateMachine>>,
        logger: Logger,
    ) -> Result<Self, StoreError> {
        let files = RaftFiles::new(dir);
        let image = files.load()?;

        logger.infof(format_args!(
            "recovered vote {:?}, {} log entries, purged up to {:?}",
            image.vote,
            image.log.len(),
            image.last_purged.map(|log_id| log_id.index)
        ));

        let mut store = ClusterStore::new(state_machine, logger);
        store.log = Arc::new(RwLock::new(image.log));
        store.last_purged = Arc::new(RwLock::new(image.last_purged));
        store.vote = Arc::new(RwLock::new(image.vote));
        store.files = Some(files);
        Ok(store)
    }

    pub fn state_machine(&self) -> Arc<RwLock<CertStateMachine>> {
        Arc::clone(&self.state_machine)
    }
}

impl RaftLogReader<TypeConfig> for ClusterStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let log = self.log.read().await;
        Ok(log.range(range).map(|(_, entry)| entry.clone()).collect())
    }
}

/// Builds snapshots from the shared state machine
#[derive(Debug, Clone)]
pub struct ClusterSnapshotBuilder {
    state_machine: Arc<RwLock<CertStateMachine>>,
    current_snapshot: Arc<RwLock<Option<StoredSnapshot>>>,
    snapshot_idx: Arc<AtomicU64>,
    logger: Logger,
}

impl RaftSnapshotBuilder<TypeConfig> for ClusterSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let (data, last_applied, membership) = {
            let state_machine = self.state_machine.read().await;
            let data = state_machine
                .snapshot()
                .map_err(|e| snapshot_error(&e, ErrorVerb::Write))?
                .into_inner();
            (
                data,
                state_machine.last_applied(),
                state_machine.membership().clone(),
            )
        };

        let idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied {
            Some(log_id) => format!("{}-{}-{}", log_id.leader_id, log_id.index, idx),
            None => format!("--{}", idx),
        };

        let stored = StoredSnapshot {
            meta: SnapshotMeta {
                last_log_id: last_applied,
                last_membership: membership,
                snapshot_id,
            },
            data,
        };
        let snapshot = stored.to_snapshot();

        self.logger.v(1).infof(format_args!(
            "built snapshot {} ({} bytes)",
            stored.meta.snapshot_id,
            stored.data.len()
        ));
        *self.current_snapshot.write().await = Some(stored);

        Ok(snapshot)
    }
}

#[allow(deprecated)]
impl RaftStorage<TypeConfig> for ClusterStore {
    type LogReader = Self;
    type SnapshotBuilder = ClusterSnapshotBuilder;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_purged = *self.last_purged.read().await;
        let last_log_id = self
            .log
            .read()
            .await
            .values()
            .next_back()
            .map(|entry| entry.log_id)
            .or(last_purged);

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        if let Some(files) = &self.files {
            files
                .save_vote(vote)
                .map_err(|e| durable_error(ErrorSubject::Vote, &e))?;
        }
        *self.vote.write().await = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(*self.vote.read().await)
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let entries: Vec<Entry<TypeConfig>> = entries.into_iter().collect();
        if let Some(files) = &self.files {
            files
                .append(&entries)
                .map_err(|e| durable_error(ErrorSubject::Logs, &e))?;
        }

        let mut log = self.log.write().await;
        for entry in entries {
            log.insert(entry.log_id.index, entry);
        }
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeId>,
    ) -> Result<(), StorageError<NodeId>> {
        let mut log = self.log.write().await;
        if let Some(files) = &self.files {
            files
                .remove(log.range(log_id.index..).map(|(index, _)| *index))
                .map_err(|e| durable_error(ErrorSubject::Logs, &e))?;
        }
        log.retain(|index, _| *index < log_id.index);
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        if let Some(files) = &self.files {
            files
                .save_purged(&log_id)
                .map_err(|e| durable_error(ErrorSubject::Logs, &e))?;
        }
        {
            let mut last_purged = self.last_purged.write().await;
            *last_purged = Some(log_id);
        }

        let mut log = self.log.write().await;
        if let Some(files) = &self.files {
            files
                .remove(log.range(..=log_id.index).map(|(index, _)| *index))
                .map_err(|e| durable_error(ErrorSubject::Logs, &e))?;
        }
        log.retain(|index, _| *index > log_id.index);
        Ok(())
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        let state_machine = self.state_machine.read().await;
        Ok((
            state_machine.last_applied(),
            state_machine.membership().clone(),
        ))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<ApplyResponse>, StorageError<NodeId>> {
        let mut state_machine = self.state_machine.write().await;
        let mut responses = Vec::with_capacity(entries.len());

        for entry in entries {
            let response = match &entry.payload {
                EntryPayload::Blank => state_machine
                    .apply_blank(entry.log_id)
                    .map_err(|e| apply_error(&e))?,
                EntryPayload::Normal(data) => {
                    state_machine.apply(entry.log_id, data).map_err(|e| {
                        self.logger
                            .fatalf(format_args!("cannot apply {}: {}", entry.log_id, e));
                        apply_error(&e)
                    })?
                }
                EntryPayload::Membership(membership) => state_machine
                    .apply_membership(entry.log_id, membership.clone())
                    .map_err(|e| apply_error(&e))?,
            };
            responses.push(response);
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        ClusterSnapshotBuilder {
            state_machine: Arc::clone(&self.state_machine),
            current_snapshot: Arc::clone(&self.current_snapshot),
            snapshot_idx: Arc::clone(&self.snapshot_idx),
            logger: self.logger.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        self.state_machine.write().await.begin_recovery();
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();

        self.logger.infof(format_args!(
            "installing snapshot {} ({} bytes)",
            meta.snapshot_id,
            data.len()
        ));

        self.state_machine
            .write()
            .await
            .restore(data.as_slice())
            .map_err(|e| snapshot_error(&e, ErrorVerb::Read))?;

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        Ok(self
            .current_snapshot
            .read()
            .await
            .as_ref()
            .map(StoredSnapshot::to_snapshot))
    }
}

fn apply_error(e: &StateMachineError) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::StateMachine,
        ErrorVerb::Write,
        std::io::Error::other(e.to_string()),
    )
}

fn durable_error(subject: ErrorSubject<NodeId>, e: &StoreError) -> StorageError<NodeId> {
    StorageError::from_io_error(subject, ErrorVerb::Write, std::io::Error::other(e.to_string()))
}

fn snapshot_error(e: &StateMachineError, verb: ErrorVerb) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::Snapshot(None),
        verb,
        std::io::Error::other(e.to_string()),
    )
}
