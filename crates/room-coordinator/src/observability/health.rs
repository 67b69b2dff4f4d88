//! Health endpoints for the Room Coordinator.
//!
//! Kubernetes-compatible probes plus an operator status view:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we accept connections?)
//! - `GET /status` - JSON: rooms, connections, presence counts per room
//!
//! The `/metrics` endpoint is mounted by `main` from the Prometheus handle.
//!
//! # Health State
//!
//! - `live`: Always true after startup (process is running)
//! - `ready`: True once the WebSocket listener is bound; false again
//!   as soon as shutdown starts

use crate::actors::{ControllerStatus, RoomControllerHandle};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the Room Coordinator.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Router with the liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Router with `GET /status`.
pub fn status_router(controller: RoomControllerHandle) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(controller)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(
    State(controller): State<RoomControllerHandle>,
) -> Result<Json<ControllerStatus>, StatusCode> {
    controller.get_status().await.map(Json).map_err(|e| {
        tracing::warn!(target: "rc.health", error = %e, "Status query failed");
        StatusCode::SERVICE_UNAVAILABLE
    })
}
