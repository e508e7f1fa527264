use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use openraft::SnapshotPolicy;
use tokio_util::sync::CancellationToken;

use crate::error::{CompoundError, ConfigError};
use crate::logger::{Logger, TracingLogger};
use crate::types::NodeId;

pub const DEFAULT_CLUSTER_NAME: &str = "wilee";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7480";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 150;
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 300;
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 600;
pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 1000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 1000;

/// Defaulting and validation, also available on an absent configuration
pub trait Settings {
    /// Fill unset fields. Idempotent.
    fn set_defaults(&mut self) -> Result<(), ConfigError>;

    /// Report every problem at once. Never mutates.
    fn validate(&self) -> Result<(), ConfigError>;
}

impl<T: Settings> Settings for Option<T> {
    fn set_defaults(&mut self) -> Result<(), ConfigError> {
        match self {
            Some(settings) => settings.set_defaults(),
            None => Err(ConfigError::NilReceiver),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Some(settings) => settings.validate(),
            None => Err(ConfigError::NilReceiver),
        }
    }
}

/// Another cluster member, written `<id>=<host:port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub addr: String,
}

impl PeerConfig {
    pub fn new(node_id: NodeId, addr: impl Into<String>) -> Self {
        PeerConfig {
            node_id,
            addr: addr.into(),
        }
    }
}

impl FromStr for PeerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("peer {:?} is not <id>=<addr>", s)))?;
        let node_id = id
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("peer id {:?}: {}", id, e)))?;
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ConfigError::Invalid(format!("peer {} has no address", node_id)));
        }
        Ok(PeerConfig::new(node_id, addr))
    }
}

/// Configuration of one cluster node
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Execution context. Cancelling it stops the node.
    pub context: Option<CancellationToken>,
    pub logger: Logger,
    pub node_id: NodeId,
    /// Address the RPC endpoint listens on
    pub bind_addr: Option<SocketAddr>,
    /// Address other members use to reach this node; the bound address if unset
    pub advertise_addr: Option<String>,
    pub peers: Vec<PeerConfig>,
    /// Directory of the certificate store; in-memory store if unset
    pub storage_root: Option<PathBuf>,
    /// Initialize a new cluster instead of joining the peers
    pub bootstrap: bool,
    pub cluster_name: String,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Applied entries between two snapshots
    pub snapshot_threshold: u64,
    pub rpc_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn new(node_id: NodeId) -> Self {
        ClusterConfig {
            node_id,
            ..Default::default()
        }
    }

    /// Check if starting this node initializes a new cluster
    pub fn should_bootstrap(&self) -> bool {
        self.bootstrap || self.peers.is_empty()
    }

    /// Engine options for constructing a node
    pub fn export_new_node_options(&self) -> Result<NodeOptions, ConfigError> {
        self.validate()?;

        let raft_config = openraft::Config {
            cluster_name: self.cluster_name.clone(),
            heartbeat_interval: self.heartbeat_interval_ms,
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(self.snapshot_threshold),
            ..Default::default()
        }
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let context = self.context.clone().ok_or(ConfigError::Missing("context"))?;

        Ok(NodeOptions {
            node_id: self.node_id,
            raft_config: Arc::new(raft_config),
            context,
            logger: self.logger.clone().with_field("node_id", self.node_id),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            storage_root: self.storage_root.clone(),
        })
    }

    /// Transport and membership options for starting a node
    pub fn export_start_options(&self) -> Result<StartOptions, ConfigError> {
        self.validate()?;

        let bind_addr = self.bind_addr.ok_or(ConfigError::Missing("bind_addr"))?;
        let mode = if self.should_bootstrap() {
            StartMode::Bootstrap {
                peers: self.peers.clone(),
            }
        } else {
            StartMode::Join {
                peers: self.peers.clone(),
            }
        };

        Ok(StartOptions {
            bind_addr,
            advertise_addr: self.advertise_addr.clone(),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            mode,
        })
    }

    fn validate_timings(&self, errors: &mut CompoundError) {
        if self.heartbeat_interval_ms == 0 {
            errors.push(ConfigError::Invalid("heartbeat interval is zero".to_string()));
        }
        if self.election_timeout_min_ms == 0 {
            errors.push(ConfigError::Invalid("election timeout is zero".to_string()));
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            errors.push(ConfigError::Invalid(format!(
                "election timeout min {}ms must be below max {}ms",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            errors.push(ConfigError::Invalid(format!(
                "heartbeat interval {}ms must be below election timeout {}ms",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.snapshot_threshold == 0 {
            errors.push(ConfigError::Invalid("snapshot threshold is zero".to_string()));
        }
        if self.rpc_timeout_ms == 0 {
            errors.push(ConfigError::Invalid("rpc timeout is zero".to_string()));
        }
    }

    fn validate_peers(&self, errors: &mut CompoundError) {
        let mut seen = BTreeSet::new();
        for peer in &self.peers {
            if peer.node_id == self.node_id {
                errors.push(ConfigError::Invalid(format!(
                    "peer list contains this node ({})",
                    self.node_id
                )));
            } else if !seen.insert(peer.node_id) {
                errors.push(ConfigError::Invalid(format!(
                    "duplicate peer id {}",
                    peer.node_id
                )));
            }
            if peer.addr.trim().is_empty() {
                errors.push(ConfigError::Invalid(format!(
                    "peer {} has no address",
                    peer.node_id
                )));
            }
        }
    }
}

impl Settings for ClusterConfig {
    fn set_defaults(&mut self) -> Result<(), ConfigError> {
        if self.context.is_none() {
            self.context = Some(CancellationToken::new());
        }
        if !self.logger.has_destination() {
            self.logger.set_destination(Arc::new(TracingLogger::default()));
        }
        if self.bind_addr.is_none() {
            self.bind_addr = DEFAULT_BIND_ADDR.parse().ok();
        }
        if self.cluster_name.is_empty() {
            self.cluster_name = DEFAULT_CLUSTER_NAME.to_string();
        }
        if self.heartbeat_interval_ms == 0 {
            self.heartbeat_interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
        }
        if self.election_timeout_min_ms == 0 {
            self.election_timeout_min_ms = DEFAULT_ELECTION_TIMEOUT_MIN_MS;
        }
        if self.election_timeout_max_ms == 0 {
            self.election_timeout_max_ms =
                DEFAULT_ELECTION_TIMEOUT_MAX_MS.max(self.election_timeout_min_ms.saturating_mul(2));
        }
        if self.snapshot_threshold == 0 {
            self.snapshot_threshold = DEFAULT_SNAPSHOT_THRESHOLD;
        }
        if self.rpc_timeout_ms == 0 {
            self.rpc_timeout_ms = DEFAULT_RPC_TIMEOUT_MS;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = CompoundError::new();

        if self.context.is_none() {
            errors.push(ConfigError::Missing("context"));
        }
        if !self.logger.has_destination() {
            errors.push(ConfigError::Missing("logger"));
        }
        if self.bind_addr.is_none() {
            errors.push(ConfigError::Missing("bind_addr"));
        }
        if self.cluster_name.is_empty() {
            errors.push(ConfigError::Invalid("cluster name is empty".to_string()));
        }
        self.validate_timings(&mut errors);
        self.validate_peers(&mut errors);

        errors.into_result()
    }
}

/// Options a node is constructed with
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub node_id: NodeId,
    pub raft_config: Arc<openraft::Config>,
    pub context: CancellationToken,
    pub logger: Logger,
    pub rpc_timeout: Duration,
    pub storage_root: Option<PathBuf>,
}

/// How a starting node enters the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Initialize a cluster of this node and `peers`
    Bootstrap { peers: Vec<PeerConfig> },
    /// Ask `peers` to add this node
    Join { peers: Vec<PeerConfig> },
}

/// Options a node is started with
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub bind_addr: SocketAddr,
    pub advertise_addr: Option<String>,
    pub rpc_timeout: Duration,
    pub mode: StartMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> ClusterConfig {
        ClusterConfig {
            bind_addr: Some("127.0.0.1:0".parse().unwrap()),
            cluster_name: "test".to_string(),
            heartbeat_interval_ms: 50,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            snapshot_threshold: 10,
            rpc_timeout_ms: 500,
            ..ClusterConfig::new(1)
        }
    }

    #[test]
    fn test_defaults_fill_context_and_logger() {
        let mut config = ClusterConfig::new(1);
        config.set_defaults().unwrap();

        assert!(config.context.is_some());
        assert!(config.logger.has_destination());
        assert_eq!(config.cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_defaults_is_idempotent() {
        let mut config = ClusterConfig::new(3);
        config.set_defaults().unwrap();
        let token = config.context.clone().unwrap();
        config.set_defaults().unwrap();

        token.cancel();
        assert!(config.context.as_ref().unwrap().is_cancelled());
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let config = bare();
        match config.validate() {
            Err(ConfigError::Compound(errors)) => {
                assert_eq!(errors.missing_fields(), vec!["context", "logger"]);
                assert_eq!(errors.errors().len(), 2);
            }
            other => panic!("expected compound error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_only_missing_logger() {
        let config = ClusterConfig {
            context: Some(CancellationToken::new()),
            ..bare()
        };
        match config.validate() {
            Err(ConfigError::Compound(errors)) => {
                assert_eq!(errors.missing_fields(), vec!["logger"]);
            }
            other => panic!("expected compound error, got {:?}", other),
        }
    }

    #[test]
    fn test_nil_receiver() {
        let mut config: Option<ClusterConfig> = None;
        assert_eq!(config.set_defaults(), Err(ConfigError::NilReceiver));
        assert_eq!(config.validate(), Err(ConfigError::NilReceiver));

        let mut config = Some(ClusterConfig::new(1));
        config.set_defaults().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timings_and_peers() {
        let mut config = ClusterConfig::new(1);
        config.set_defaults().unwrap();
        config.election_timeout_min_ms = 700;
        config.peers = vec![
            PeerConfig::new(1, "127.0.0.1:1"),
            PeerConfig::new(2, "127.0.0.1:2"),
            PeerConfig::new(2, "127.0.0.1:3"),
        ];

        match config.validate() {
            Err(ConfigError::Compound(errors)) => {
                assert!(errors.missing_fields().is_empty());
                assert_eq!(errors.errors().len(), 3);
            }
            other => panic!("expected compound error, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_election_timeout_saturates() {
        let mut config = ClusterConfig::new(1);
        config.election_timeout_min_ms = u64::MAX;
        config.set_defaults().unwrap();

        assert_eq!(config.election_timeout_max_ms, u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_peer() {
        let peer: PeerConfig = "2=10.0.0.2:7480".parse().unwrap();
        assert_eq!(peer, PeerConfig::new(2, "10.0.0.2:7480"));

        assert!("10.0.0.2:7480".parse::<PeerConfig>().is_err());
        assert!("x=10.0.0.2:7480".parse::<PeerConfig>().is_err());
        assert!("2=".parse::<PeerConfig>().is_err());
    }

    #[test]
    fn test_export_node_options() {
        let mut config = ClusterConfig::new(4);
        config.set_defaults().unwrap();
        let options = config.export_new_node_options().unwrap();

        assert_eq!(options.node_id, 4);
        assert_eq!(options.raft_config.cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(
            options.logger.fields().get("node_id").map(String::as_str),
            Some("4")
        );
        assert!(matches!(
            ClusterConfig::new(4).export_new_node_options(),
            Err(ConfigError::Compound(_))
        ));
    }

    #[test]
    fn test_start_mode() {
        let mut config = ClusterConfig::new(2);
        config.set_defaults().unwrap();
        assert!(matches!(
            config.export_start_options().unwrap().mode,
            StartMode::Bootstrap { .. }
        ));

        config.peers = vec![PeerConfig::new(1, "127.0.0.1:7480")];
        assert!(matches!(
            config.export_start_options().unwrap().mode,
            StartMode::Join { .. }
        ));

        config.bootstrap = true;
        match config.export_start_options().unwrap().mode {
            StartMode::Bootstrap { peers } => assert_eq!(peers.len(), 1),
            other => panic!("expected bootstrap, got {:?}", other),
        }
    }
}
