use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ClusterError;
use crate::types::NodeId;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_addr: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorBody {
            error: error.into(),
            leader_id: None,
            leader_addr: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorBody::new(message)),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorBody::new(message)),
            ApiError::Cluster(ClusterError::NotLeader {
                leader_id,
                leader_addr,
            }) => (
                StatusCode::MISDIRECTED_REQUEST,
                ErrorBody {
                    error: message,
                    leader_id,
                    leader_addr,
                },
            ),
            ApiError::Cluster(ClusterError::Operation(_)) => {
                (StatusCode::BAD_REQUEST, ErrorBody::new(message))
            }
            ApiError::Cluster(ClusterError::NotStarted | ClusterError::Shutdown(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorBody::new(message))
            }
            ApiError::Cluster(ClusterError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, ErrorBody::new(message))
            }
            ApiError::Cluster(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new(message)),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_status() {
        let response = ApiError::from(ClusterError::NotLeader {
            leader_id: Some(2),
            leader_addr: Some("127.0.0.1:7482".to_string()),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);

        let response = ApiError::NotFound("example.org".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::from(ClusterError::Write("engine stopped".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body_omits_unknown_leader() {
        let json = serde_json::to_value(ErrorBody::new("boom")).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "boom" }));

        let body: ErrorBody = serde_json::from_value(serde_json::json!({
            "error": "not leader",
            "leader_id": 3,
        }))
        .unwrap();
        assert_eq!(body.leader_id, Some(3));
        assert_eq!(body.leader_addr, None);
    }
}
