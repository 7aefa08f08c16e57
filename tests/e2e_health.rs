//! E2E tests for health check and basic server functionality

mod common;

use common::TestServer;
use vidfed::data::FollowState;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["follow_edges"], 0);
    assert_eq!(body["pending_deliveries"], 0);
}

#[tokio::test]
async fn test_health_reports_instance_follows() {
    let server = TestServer::new().await;
    let remote = server.remote_instance("remote.example").await;
    let system = server.system_actor().clone();
    server.follow(&remote, &system, FollowState::Accepted).await;
    server.follow(&system, &remote, FollowState::Pending).await;

    let body: serde_json::Value = server
        .client
        .get(&server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["follow_edges"], 2);
    assert_eq!(body["instance_followers"], 1);
    assert_eq!(body["instance_following"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("vidfed_follow_edges"));
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/unknown/route"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}
