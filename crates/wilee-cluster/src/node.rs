use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{ClientWriteError, InitializeError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, Raft, RaftMetrics};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wilee_core::{CertificateOperation, CertificateRecord};
use wilee_store::{CertificateStore, FileCertStore, MemoryCertStore};

use crate::config::{ClusterConfig, PeerConfig, StartMode};
use crate::error::{ClusterError, StateMachineError};
use crate::log_files::RAFT_DIR;
use crate::logger::{Logger, RaftLog};
use crate::network::{endpoint_url, HttpNetworkFactory};
use crate::server::{create_router, ErrorBody, JoinRequest, JoinResponse, JOIN_PATH};
use crate::state_machine::{CertStateMachine, MachinePhase};
use crate::storage::ClusterStore;
use crate::types::{ApplyResponse, LogEntry, NodeId, TypeConfig};

/// File name of the certificate store under the storage root
pub const CERTIFICATE_FILE: &str = "certificates.bin";

/// File name of the state machine's log position under the storage root
pub const APPLIED_FILE: &str = "applied.bin";

/// Leader redirects followed per peer while joining
const MAX_JOIN_REDIRECTS: usize = 3;

/// Upper bound of one join request; the leader waits for this node to catch up
const JOIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    /// Engine built, not participating yet
    Constructed,
    Started,
    Stopped,
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub server_state: String,
    pub current_term: u64,
    pub current_leader: Option<NodeId>,
    pub leader_addr: Option<String>,
    pub last_log_index: Option<u64>,
    pub last_applied: Option<u64>,
    pub voters: Vec<NodeId>,
    pub learners: Vec<NodeId>,
    pub certificates: usize,
    pub machine_phase: MachinePhase,
}

/// Shared access to a running engine and its state machine
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    raft: Raft<TypeConfig>,
    state_machine: Arc<RwLock<CertStateMachine>>,
    logger: Logger,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn raft(&self) -> &Raft<TypeConfig> {
        &self.raft
    }

    fn metrics(&self) -> RaftMetrics<NodeId, BasicNode> {
        self.raft.metrics().borrow().clone()
    }

    /// Replicate an operation and return what the state machine did with it
    pub async fn propose(&self, op: CertificateOperation) -> Result<ApplyResponse, ClusterError> {
        op.validate()?;
        let entry = LogEntry::from_operation(&op)?;

        let response = self
            .raft
            .client_write(entry)
            .await
            .map_err(|e| write_error(e, ClusterError::Write))?;

        self.logger
            .v(1)
            .infof(format_args!("committed {} as {}", op, response.data));
        Ok(response.data)
    }

    /// Add a member as learner, wait for it to catch up, then make it a voter
    pub async fn add_member(&self, node_id: NodeId, addr: String) -> Result<JoinResponse, ClusterError> {
        self.logger
            .infof(format_args!("adding member {} at {}", node_id, addr));

        self.raft
            .add_learner(node_id, BasicNode::new(&addr), true)
            .await
            .map_err(|e| write_error(e, ClusterError::Membership))?;

        let mut voters: BTreeSet<NodeId> = self
            .metrics()
            .membership_config
            .membership()
            .voter_ids()
            .collect();

        if voters.insert(node_id) {
            self.raft
                .change_membership(voters.clone(), false)
                .await
                .map_err(|e| write_error(e, ClusterError::Membership))?;
        }

        Ok(JoinResponse {
            leader_id: self.id,
            voters: voters.into_iter().collect(),
        })
    }

    pub async fn status(&self) -> NodeStatus {
        let metrics = self.metrics();
        let membership = metrics.membership_config.membership();
        let leader_addr = metrics
            .current_leader
            .and_then(|leader| membership.get_node(&leader))
            .map(|node| node.addr.clone());

        let state_machine = self.state_machine.read().await;
        NodeStatus {
            node_id: self.id,
            server_state: format!("{:?}", metrics.state),
            current_term: metrics.current_term,
            current_leader: metrics.current_leader,
            leader_addr,
            last_log_index: metrics.last_log_index,
            last_applied: state_machine.last_applied_index(),
            voters: membership.voter_ids().collect(),
            learners: membership.learner_ids().collect(),
            certificates: state_machine.certificate_count(),
            machine_phase: state_machine.phase(),
        }
    }

    pub async fn certificate(&self, domain: &str) -> Option<CertificateRecord> {
        self.state_machine.read().await.certificate(domain)
    }

    /// Wait until some leader is known
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, ClusterError> {
        let metrics = self
            .raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), "leader elected")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;

        metrics
            .current_leader
            .ok_or_else(|| ClusterError::Timeout("leader elected".to_string()))
    }

    /// Wait until the state machine applied `index`
    pub async fn wait_for_applied(&self, index: u64, timeout: Duration) -> Result<(), ClusterError> {
        self.raft
            .wait(Some(timeout))
            .applied_index_at_least(Some(index), "entry applied")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        Ok(())
    }
}

fn write_error<E>(
    error: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>,
    wrap: E,
) -> ClusterError
where
    E: FnOnce(String) -> ClusterError,
{
    match error {
        RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => ClusterError::NotLeader {
            leader_id: forward.leader_id,
            leader_addr: forward.leader_node.map(|node| node.addr),
        },
        other => wrap(other.to_string()),
    }
}

/// A member of the certificate control plane.
///
/// Lifecycle: [`ConsensusNode::new`] builds the engine without touching the
/// network, [`ConsensusNode::start`] binds the RPC endpoint and bootstraps
/// or joins, [`ConsensusNode::shutdown`] stops both.
pub struct ConsensusNode {
    config: ClusterConfig,
    handle: NodeHandle,
    phase: NodePhase,
    token: CancellationToken,
    engine_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: Option<SocketAddr>,
    logger: Logger,
}

impl ConsensusNode {
    pub async fn new(config: impl Into<Option<ClusterConfig>>) -> Result<Self, ClusterError> {
        let config = config
            .into()
            .ok_or_else(|| ClusterError::InvalidConfig("Nil cluster configuration".to_string()))?;
        let options = config.export_new_node_options()?;
        let logger = options.logger.clone();

        let (state_machine, storage) = match &options.storage_root {
            Some(root) => {
                let store = FileCertStore::open(root.join(CERTIFICATE_FILE))
                    .map_err(StateMachineError::from)?;
                let machine =
                    CertStateMachine::open(Box::new(store), root.join(APPLIED_FILE), logger.clone())?;
                let state_machine = Arc::new(RwLock::new(machine));
                let storage =
                    ClusterStore::open(&root.join(RAFT_DIR), Arc::clone(&state_machine), logger.clone())
                        .map_err(|e| ClusterError::Engine(e.to_string()))?;
                (state_machine, storage)
            }
            None => {
                let store: Box<dyn CertificateStore> = Box::new(MemoryCertStore::new());
                let state_machine =
                    Arc::new(RwLock::new(CertStateMachine::new(store, logger.clone())));
                let storage = ClusterStore::new(Arc::clone(&state_machine), logger.clone());
                (state_machine, storage)
            }
        };
        let network = HttpNetworkFactory::new(options.rpc_timeout, logger.clone())
            .map_err(|e| ClusterError::Engine(e.to_string()))?;

        let (log_store, sm_store) = Adaptor::new(storage);
        let raft = Raft::<TypeConfig>::new(
            options.node_id,
            Arc::clone(&options.raft_config),
            network,
            log_store,
            sm_store,
        )
        .await
        .map_err(|e| ClusterError::Engine(e.to_string()))?;

        // Cancelling the execution context stops the engine.
        let token = options.context.child_token();
        let engine_task = tokio::spawn({
            let raft = raft.clone();
            let token = token.clone();
            let logger = logger.clone();
            async move {
                token.cancelled().await;
                if let Err(e) = raft.shutdown().await {
                    logger.errorf(format_args!("engine shutdown failed: {}", e));
                }
            }
        });

        info!("Constructed consensus node {}", options.node_id);

        Ok(ConsensusNode {
            config,
            handle: NodeHandle {
                id: options.node_id,
                raft,
                state_machine,
                logger: logger.clone(),
            },
            phase: NodePhase::Constructed,
            token,
            engine_task: Some(engine_task),
            server_task: None,
            local_addr: None,
            logger,
        })
    }

    pub fn id(&self) -> NodeId {
        self.handle.id
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Address the RPC endpoint is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the RPC endpoint and bootstrap or join the cluster
    pub async fn start(&mut self) -> Result<(), ClusterError> {
        match self.phase {
            NodePhase::Constructed => {}
            NodePhase::Started => return Err(ClusterError::AlreadyStarted),
            NodePhase::Stopped => return Err(ClusterError::Shutdown("node stopped".to_string())),
        }

        let options = self
            .config
            .export_start_options()
            .map_err(|e| ClusterError::start("deriving start options", e))?;

        let listener = TcpListener::bind(options.bind_addr)
            .await
            .map_err(|e| ClusterError::start("binding rpc endpoint", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ClusterError::start("binding rpc endpoint", e))?;
        let advertise_addr = options
            .advertise_addr
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let router = create_router(self.handle.clone());
        let token = self.token.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        info!("Node {} serving rpc on {}", self.id(), local_addr);

        let entered = match &options.mode {
            StartMode::Bootstrap { peers } => self.bootstrap(&advertise_addr, peers).await,
            StartMode::Join { peers } => {
                self.join(&advertise_addr, peers, options.rpc_timeout).await
            }
        };

        if let Err(e) = entered {
            server_task.abort();
            return Err(e);
        }

        self.server_task = Some(server_task);
        self.local_addr = Some(local_addr);
        self.phase = NodePhase::Started;
        Ok(())
    }

    async fn bootstrap(&self, advertise_addr: &str, peers: &[PeerConfig]) -> Result<(), ClusterError> {
        let mut members = BTreeMap::new();
        members.insert(self.id(), BasicNode::new(advertise_addr));
        for peer in peers {
            members.insert(peer.node_id, BasicNode::new(&peer.addr));
        }
        let size = members.len();

        match self.handle.raft.initialize(members).await {
            Ok(()) => {
                self.logger
                    .infof(format_args!("initialized cluster of {} members", size));
                Ok(())
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                self.logger
                    .infof(format_args!("cluster already initialized, resuming"));
                Ok(())
            }
            Err(e) => Err(ClusterError::start("initializing cluster", e)),
        }
    }

    async fn join(
        &self,
        advertise_addr: &str,
        peers: &[PeerConfig],
        rpc_timeout: Duration,
    ) -> Result<(), ClusterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(rpc_timeout)
            .timeout(JOIN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClusterError::start("joining cluster", e))?;
        let request = JoinRequest {
            node_id: self.id(),
            addr: advertise_addr.to_string(),
        };

        let mut failures = Vec::new();
        for peer in peers {
            let mut target = peer.addr.clone();
            let mut redirects = 0;
            loop {
                match request_join(&client, &target, &request).await {
                    Ok(JoinOutcome::Joined(response)) => {
                        self.logger.infof(format_args!(
                            "joined cluster through {} (leader {}, voters {:?})",
                            target, response.leader_id, response.voters
                        ));
                        return Ok(());
                    }
                    Ok(JoinOutcome::Redirect(leader_addr)) => {
                        if redirects == MAX_JOIN_REDIRECTS {
                            warn!("Join through {} gave up after {} redirects", peer.addr, redirects);
                            failures.push(format!("{}: too many leader redirects", target));
                            break;
                        }
                        redirects += 1;
                        self.logger
                            .v(1)
                            .infof(format_args!("{} redirected join to {}", target, leader_addr));
                        target = leader_addr;
                    }
                    Err(reason) => {
                        warn!("Join through {} failed: {}", target, reason);
                        failures.push(format!("{}: {}", target, reason));
                        break;
                    }
                }
            }
        }

        Err(ClusterError::start(
            "joining cluster",
            format!("no peer accepted the join ({})", failures.join("; ")),
        ))
    }

    /// Replicate an operation through this node
    pub async fn propose(&self, op: CertificateOperation) -> Result<ApplyResponse, ClusterError> {
        self.ensure_started()?;
        self.handle.propose(op).await
    }

    /// Add a member to the cluster; leader only
    pub async fn add_member(&self, node_id: NodeId, addr: impl Into<String>) -> Result<JoinResponse, ClusterError> {
        self.ensure_started()?;
        self.handle.add_member(node_id, addr.into()).await
    }

    pub async fn status(&self) -> NodeStatus {
        self.handle.status().await
    }

    pub async fn certificate(&self, domain: &str) -> Option<CertificateRecord> {
        self.handle.certificate(domain).await
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, ClusterError> {
        self.handle.wait_for_leader(timeout).await
    }

    pub async fn wait_for_applied(&self, index: u64, timeout: Duration) -> Result<(), ClusterError> {
        self.handle.wait_for_applied(index, timeout).await
    }

    fn ensure_started(&self) -> Result<(), ClusterError> {
        match self.phase {
            NodePhase::Started => Ok(()),
            NodePhase::Constructed => Err(ClusterError::NotStarted),
            NodePhase::Stopped => Err(ClusterError::Shutdown("node stopped".to_string())),
        }
    }

    /// Stop the endpoint and the engine, releasing the bound address
    pub async fn shutdown(&mut self) -> Result<(), ClusterError> {
        if self.phase == NodePhase::Stopped {
            return Ok(());
        }
        self.token.cancel();

        if let Some(engine) = self.engine_task.take() {
            engine
                .await
                .map_err(|e| ClusterError::Shutdown(e.to_string()))?;
        }
        if let Some(server) = self.server_task.take() {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("RPC server exited with error: {}", e),
                Err(e) => return Err(ClusterError::Shutdown(e.to_string())),
            }
        }

        self.phase = NodePhase::Stopped;
        self.local_addr = None;
        info!("Node {} stopped", self.id());
        Ok(())
    }
}

impl Drop for ConsensusNode {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum JoinOutcome {
    Joined(JoinResponse),
    Redirect(String),
}

async fn request_join(
    client: &reqwest::Client,
    addr: &str,
    request: &JoinRequest,
) -> Result<JoinOutcome, String> {
    let response = client
        .post(endpoint_url(addr, JOIN_PATH))
        .json(request)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        let body: JoinResponse = response.json().await.map_err(|e| e.to_string())?;
        return Ok(JoinOutcome::Joined(body));
    }

    let status = response.status();
    let body: ErrorBody = response
        .json()
        .await
        .map_err(|e| format!("{}: {}", status, e))?;
    match body.leader_addr {
        Some(leader_addr) if leader_addr != addr => Ok(JoinOutcome::Redirect(leader_addr)),
        _ => Err(format!("{}: {}", status, body.error)),
    }
}
