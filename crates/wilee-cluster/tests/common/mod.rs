//! Shared helpers for cluster integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use wilee_cluster::{ClusterConfig, ConsensusNode, NodeId, PeerConfig, Settings};
use wilee_core::CertificateOperation;

pub const WAIT: Duration = Duration::from_secs(10);

/// Config of a node on an ephemeral loopback port
pub fn node_config(node_id: NodeId, peers: Vec<PeerConfig>) -> ClusterConfig {
    let mut config = ClusterConfig::new(node_id);
    config.bind_addr = Some("127.0.0.1:0".parse().unwrap());
    config.peers = peers;
    config.set_defaults().unwrap();
    config
}

pub fn durable_config(node_id: NodeId, root: &Path) -> ClusterConfig {
    let mut config = node_config(node_id, Vec::new());
    config.storage_root = Some(root.to_path_buf());
    config
}

/// Construct and start a node, then wait until it sees a leader
pub async fn started_node(config: ClusterConfig) -> ConsensusNode {
    let mut node = ConsensusNode::new(config).await.unwrap();
    node.start().await.unwrap();
    node.wait_for_leader(WAIT).await.unwrap();
    node
}

pub fn issue(domain: &str, certificate: &[u8]) -> CertificateOperation {
    CertificateOperation::issue(domain, certificate.to_vec(), 1_700_000_000, 1_800_000_000)
}

/// Peer entry pointing at a started node
pub fn peer_of(node: &ConsensusNode) -> PeerConfig {
    PeerConfig::new(node.id(), node.local_addr().unwrap().to_string())
}
