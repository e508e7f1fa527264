//! HTTP/JSON transport for the consensus engine RPCs.

use std::time::Duration;

use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::logger::{Logger, RaftLog};
use crate::types::{NodeId, TypeConfig};

pub const APPEND_PATH: &str = "raft/append";
pub const VOTE_PATH: &str = "raft/vote";
pub const SNAPSHOT_PATH: &str = "raft/snapshot";

/// Base URL of a member address, which may omit the scheme
pub fn endpoint_url(addr: &str, path: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{}/{}", addr, path)
    } else {
        format!("http://{}/{}", addr, path)
    }
}

/// Creates one connection per target member
#[derive(Debug, Clone)]
pub struct HttpNetworkFactory {
    client: reqwest::Client,
    logger: Logger,
}

impl HttpNetworkFactory {
    pub fn new(timeout: Duration, logger: Logger) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpNetworkFactory { client, logger })
    }
}

impl RaftNetworkFactory<TypeConfig> for HttpNetworkFactory {
    type Network = HttpNetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        HttpNetworkConnection {
            client: self.client.clone(),
            target,
            addr: node.addr.clone(),
            logger: self.logger.clone().with_field("target", target),
        }
    }
}

pub struct HttpNetworkConnection {
    client: reqwest::Client,
    target: NodeId,
    addr: String,
    logger: Logger,
}

impl HttpNetworkConnection {
    async fn send_rpc<Req, Resp, Err>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, RPCError<NodeId, BasicNode, Err>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        Err: std::error::Error + DeserializeOwned,
    {
        let url = endpoint_url(&self.addr, path);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                self.logger
                    .v(2)
                    .warningf(format_args!("rpc to {} failed: {}", url, e));
                if e.is_connect() {
                    RPCError::Unreachable(Unreachable::new(&e))
                } else {
                    RPCError::Network(NetworkError::new(&e))
                }
            })?;

        let result: Result<Resp, Err> = response
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<TypeConfig> for HttpNetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.send_rpc(APPEND_PATH, &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        self.send_rpc(SNAPSHOT_PATH, &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.send_rpc(VOTE_PATH, &rpc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("127.0.0.1:7480", APPEND_PATH),
            "http://127.0.0.1:7480/raft/append"
        );
        assert_eq!(
            endpoint_url("https://node-2.internal/", VOTE_PATH),
            "https://node-2.internal/raft/vote"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let mut factory =
            HttpNetworkFactory::new(Duration::from_millis(500), Logger::default()).unwrap();
        // Port 1 is never served in the test environment.
        let mut conn = factory
            .new_client(2, &BasicNode::new("127.0.0.1:1"))
            .await;

        let rpc = VoteRequest::new(openraft::Vote::new(1, 1), None);
        let result = conn
            .vote(rpc, RPCOption::new(Duration::from_millis(500)))
            .await;
        assert!(matches!(
            result,
            Err(RPCError::Unreachable(_)) | Err(RPCError::Network(_))
        ));
    }
}
