//! On-disk raft state: vote, purge point and one file per log entry.
//!
//! Every write goes through [`write_atomic`], so a file is either the old
//! or the new content. Entries at or below the purge point that survive a
//! crash between writing the purge point and deleting files are dropped on
//! load.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use openraft::{Entry, LogId, Vote};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use wilee_store::{write_atomic, StoreError};

use crate::types::{NodeId, TypeConfig};

/// Directory of the raft state under the storage root
pub const RAFT_DIR: &str = "raft";

const VOTE_FILE: &str = "vote.bin";
const PURGED_FILE: &str = "purged.bin";
const LOG_DIR: &str = "log";
const ENTRY_EXT: &str = "entry";

/// Raft state as loaded from disk
#[derive(Debug, Default)]
pub struct RaftImage {
    pub vote: Option<Vote<NodeId>>,
    pub last_purged: Option<LogId<NodeId>>,
    pub log: BTreeMap<u64, Entry<TypeConfig>>,
}

#[derive(Debug, Clone)]
pub struct RaftFiles {
    root: PathBuf,
}

impl RaftFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RaftFiles { root: root.into() }
    }

    fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    fn entry_path(&self, index: u64) -> PathBuf {
        self.log_dir().join(format!("{:020}.{}", index, ENTRY_EXT))
    }

    pub fn load(&self) -> Result<RaftImage, StoreError> {
        fs::create_dir_all(self.log_dir()).map_err(storage_error)?;

        let vote = read_value(&self.root.join(VOTE_FILE))?;
        let last_purged: Option<LogId<NodeId>> = read_value(&self.root.join(PURGED_FILE))?;
        let purged_index = last_purged.map(|log_id| log_id.index);

        let mut log = BTreeMap::new();
        for dir_entry in fs::read_dir(self.log_dir()).map_err(storage_error)? {
            let path = dir_entry.map_err(storage_error)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let entry: Entry<TypeConfig> = read_value(&path)?
                .ok_or_else(|| StoreError::Storage(format!("vanished {}", path.display())))?;
            if purged_index.is_some_and(|purged| entry.log_id.index <= purged) {
                remove_file(&path)?;
                continue;
            }
            log.insert(entry.log_id.index, entry);
        }

        info!(
            "Loaded raft state from {} ({} log entries)",
            self.root.display(),
            log.len()
        );
        Ok(RaftImage {
            vote,
            last_purged,
            log,
        })
    }

    pub fn save_vote(&self, vote: &Vote<NodeId>) -> Result<(), StoreError> {
        write_value(&self.root.join(VOTE_FILE), vote)
    }

    pub fn save_purged(&self, log_id: &LogId<NodeId>) -> Result<(), StoreError> {
        write_value(&self.root.join(PURGED_FILE), log_id)
    }

    pub fn append(&self, entries: &[Entry<TypeConfig>]) -> Result<(), StoreError> {
        for entry in entries {
            write_value(&self.entry_path(entry.log_id.index), entry)?;
        }
        Ok(())
    }

    pub fn remove(&self, indexes: impl IntoIterator<Item = u64>) -> Result<(), StoreError> {
        for index in indexes {
            remove_file(&self.entry_path(index))?;
        }
        Ok(())
    }
}

fn storage_error(e: io::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn write_value<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    write_atomic(path, &bytes)
}

fn read_value<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_error(e)),
    };
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(storage_error(e)),
        _ => Ok(()),
    }
}
