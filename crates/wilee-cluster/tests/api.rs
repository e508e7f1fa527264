//! Router tests driven without a socket

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::node_config;
use tower::ServiceExt;
use wilee_cluster::{create_router, ConsensusNode, ErrorBody, NodeStatus};

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status_route() {
    let mut node = ConsensusNode::new(node_config(7, Vec::new())).await.unwrap();
    let router = create_router(node.handle().clone());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/cluster/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: NodeStatus = body_json(response).await;
    assert_eq!(status.node_id, 7);
    assert_eq!(status.certificates, 0);
    assert_eq!(status.current_leader, None);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_certificate_is_not_found() {
    let mut node = ConsensusNode::new(node_config(1, Vec::new())).await.unwrap();
    let router = create_router(node.handle().clone());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/cluster/certificates/example.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: ErrorBody = body_json(response).await;
    assert!(body.error.contains("example.org"));

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_write_is_bad_request() {
    let mut node = ConsensusNode::new(node_config(1, Vec::new())).await.unwrap();
    let router = create_router(node.handle().clone());

    let op = serde_json::json!({
        "Issue": {
            "domain": "example.org",
            "certificate": [1, 2, 3],
            "not_before": 20,
            "not_after": 10,
        }
    });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cluster/write")
                .header("content-type", "application/json")
                .body(Body::from(op.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_join_with_empty_address_is_bad_request() {
    let mut node = ConsensusNode::new(node_config(1, Vec::new())).await.unwrap();
    let router = create_router(node.handle().clone());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cluster/join")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"node_id":2,"addr":" "}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    node.shutdown().await.unwrap();
}
