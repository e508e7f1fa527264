//! Wilee Cluster - Replicated certificate control plane
//!
//! This crate runs the certificate store as a replicated state machine:
//! configuration, the consensus node lifecycle, snapshot transfer and the
//! HTTP transport between members.

pub mod config;
pub mod error;
pub mod log_files;
pub mod logger;
pub mod network;
pub mod node;
pub mod server;
pub mod state_machine;
pub mod storage;
pub mod types;

pub use config::{ClusterConfig, NodeOptions, PeerConfig, Settings, StartMode, StartOptions};
pub use error::{ClusterError, CompoundError, ConfigError, RestoreError, StateMachineError};
pub use log_files::RaftFiles;
pub use logger::{Fields, Level, Logger, RaftLog, StructuredLogger, TracingLogger, Verbose};
pub use network::{HttpNetworkFactory, HttpNetworkConnection};
pub use node::{ConsensusNode, NodeHandle, NodePhase, NodeStatus};
pub use server::{create_router, ApiError, ErrorBody, JoinRequest, JoinResponse};
pub use state_machine::{CertStateMachine, CertificateStoreSnapshot, MachinePhase};
pub use storage::ClusterStore;
pub use types::{ApplyOutcome, ApplyResponse, LogEntry, NodeId, TypeConfig};
