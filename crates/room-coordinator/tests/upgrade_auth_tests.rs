//! Integration tests for connection admission and the status endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::secret::SecretString;
use http_body_util::BodyExt;
use rc_test_utils::*;
use room_coordinator::auth::{ConnectionAuthenticator, FALLBACK_DISPLAY_NAME};
use room_coordinator::observability::status_router;
use room_coordinator::server::{ws_router, ServerState};
use room_coordinator::store::StoreOperation;
use tower::util::ServiceExt;

fn authenticator(harness: &TestHarness) -> Arc<ConnectionAuthenticator> {
    Arc::new(ConnectionAuthenticator::new(
        &SecretString::from(TEST_JWT_SECRET.to_string()),
        harness.store.clone(),
        Duration::from_secs(300),
    ))
}

fn server_state(harness: &TestHarness, max_connections: usize) -> Arc<ServerState> {
    Arc::new(ServerState::new(
        harness.coordinator.clone(),
        authenticator(harness),
        max_connections,
        Arc::clone(&harness.metrics),
    ))
}

async fn upgrade_status(state: Arc<ServerState>, request: Request<Body>) -> StatusCode {
    ws_router(state).oneshot(request).await.unwrap().status()
}

// ============================================================================
// Upgrade admission
// ============================================================================

#[tokio::test]
async fn test_upgrade_without_credential_is_refused() {
    let harness = TestHarness::new(scenario_store());

    let status = upgrade_status(
        server_state(&harness, 10),
        Request::builder().uri("/ws").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(harness.registry().await.is_empty());
}

#[tokio::test]
async fn test_upgrade_with_bad_credentials_is_refused() {
    let harness = TestHarness::new(scenario_store());

    let expired = TestToken::new(HOST_ID).expires_in(-60).build();
    let wrong_secret = TestToken::new(HOST_ID)
        .signed_with("some-other-secret-0123456789abcdef")
        .build();
    let future_iat = TestToken::new(HOST_ID)
        .issued_at(chrono::Utc::now().timestamp() + 3600)
        .build();

    for token in [expired, wrong_secret, future_iat] {
        let status = upgrade_status(
            server_state(&harness, 10),
            Request::builder()
                .uri("/ws")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_upgrade_over_connection_limit_is_refused() {
    let harness = TestHarness::new(scenario_store());
    let token = TestToken::new(HOST_ID).build();

    let status = upgrade_status(
        server_state(&harness, 0),
        Request::builder()
            .uri(format!("/ws?token={token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Identity resolution
// ============================================================================

#[tokio::test]
async fn test_identity_uses_store_then_fallback_names() {
    let harness = TestHarness::new(scenario_store());
    let auth = authenticator(&harness);

    let identity = auth
        .authenticate(&TestToken::new(HOST_ID).with_name("Ignored").build())
        .await
        .unwrap();
    assert_eq!(identity.user_id, HOST_ID);
    assert_eq!(identity.name, HOST_NAME);

    let identity = auth
        .authenticate(&TestToken::new("user-unknown").build())
        .await
        .unwrap();
    assert_eq!(identity.name, FALLBACK_DISPLAY_NAME);

    harness.store.fail_on(StoreOperation::GetUser);
    let identity = auth
        .authenticate(&TestToken::new(HOST_ID).with_name("From Token").build())
        .await
        .unwrap();
    assert_eq!(identity.name, "From Token");
}

// ============================================================================
// Status endpoint
// ============================================================================

#[tokio::test]
async fn test_status_reports_presence_counts() {
    let harness = TestHarness::new(scenario_store());
    let mut host = harness.connect(HOST_ID, HOST_NAME).await;
    let mut guest = harness.connect(GUEST_ID, GUEST_NAME).await;

    host.send(join_room(ROOM_ID)).await;
    guest.send(join_room(ROOM_ID)).await;

    let response = status_router(harness.controller.clone())
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["roomCount"], 1);
    assert_eq!(status["connectionCount"], 2);
    assert_eq!(status["presence"][ROOM_ID], 2);
}
