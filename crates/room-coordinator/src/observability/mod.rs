//! Observability: Prometheus metrics and the health/status HTTP surface.

pub mod health;
pub mod metrics;

pub use health::{health_router, status_router, HealthState};
