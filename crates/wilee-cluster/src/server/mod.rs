//! RPC endpoint of a node: engine traffic plus the cluster api.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::network::{APPEND_PATH, SNAPSHOT_PATH, VOTE_PATH};
use crate::node::NodeHandle;

pub use error::{ApiError, ErrorBody};
pub use handlers::{JoinRequest, JoinResponse};

pub const JOIN_PATH: &str = "cluster/join";
pub const WRITE_PATH: &str = "cluster/write";
pub const STATUS_PATH: &str = "cluster/status";
pub const CERTIFICATES_PATH: &str = "cluster/certificates";

/// Create the HTTP router
pub fn create_router(node: NodeHandle) -> Router {
    Router::new()
        .route(&format!("/{}", APPEND_PATH), post(handlers::raft_append))
        .route(&format!("/{}", VOTE_PATH), post(handlers::raft_vote))
        .route(&format!("/{}", SNAPSHOT_PATH), post(handlers::raft_snapshot))
        .route(&format!("/{}", JOIN_PATH), post(handlers::join_cluster))
        .route(&format!("/{}", WRITE_PATH), post(handlers::write_operation))
        .route(&format!("/{}", STATUS_PATH), get(handlers::get_status))
        .route(
            &format!("/{}/{{domain}}", CERTIFICATES_PATH),
            get(handlers::get_certificate),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}
