use axum::extract::{Path, State};
use axum::Json;
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use wilee_core::{CertificateOperation, CertificateRecord};

use super::error::ApiError;
use crate::node::{NodeHandle, NodeStatus};
use crate::types::{ApplyResponse, NodeId, TypeConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_id: NodeId,
    /// Address the joining node serves its rpc endpoint on
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub leader_id: NodeId,
    pub voters: Vec<NodeId>,
}

// Engine rpcs: the engine's own result is the response body.

/// POST /raft/append
pub async fn raft_append(
    State(node): State<NodeHandle>,
    Json(request): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>> {
    Json(node.raft().append_entries(request).await)
}

/// POST /raft/vote
pub async fn raft_vote(
    State(node): State<NodeHandle>,
    Json(request): Json<VoteRequest<NodeId>>,
) -> Json<Result<VoteResponse<NodeId>, RaftError<NodeId>>> {
    Json(node.raft().vote(request).await)
}

/// POST /raft/snapshot
pub async fn raft_snapshot(
    State(node): State<NodeHandle>,
    Json(request): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>> {
    Json(node.raft().install_snapshot(request).await)
}

/// POST /cluster/join - Add the caller as a voting member
pub async fn join_cluster(
    State(node): State<NodeHandle>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    if request.addr.trim().is_empty() {
        return Err(ApiError::BadRequest("empty member address".to_string()));
    }
    info!("Join request from node {} at {}", request.node_id, request.addr);

    let response = node.add_member(request.node_id, request.addr).await?;
    Ok(Json(response))
}

/// POST /cluster/write - Replicate a certificate operation
pub async fn write_operation(
    State(node): State<NodeHandle>,
    Json(op): Json<CertificateOperation>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let response = node.propose(op).await?;
    Ok(Json(response))
}

/// GET /cluster/status
pub async fn get_status(State(node): State<NodeHandle>) -> Json<NodeStatus> {
    Json(node.status().await)
}

/// GET /cluster/certificates/{domain}
pub async fn get_certificate(
    State(node): State<NodeHandle>,
    Path(domain): Path<String>,
) -> Result<Json<CertificateRecord>, ApiError> {
    node.certificate(&domain)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no certificate for {}", domain)))
}
