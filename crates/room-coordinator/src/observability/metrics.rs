//! Prometheus metrics for the Room Coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Coordinator
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `command`: one value per client command (10)
//! - `status`: `success` | `error`
//! - `code`: bounded by `RcError::error_code`
//! - `operation`: one value per store call (7)
//! - `actor_type`: `controller` | `room` | `connection`
//!
//! Room and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by
/// `GET /metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Store latency buckets - p99 target 50ms
        .set_buckets_for_metric(
            Matcher::Prefix("rc_store_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store query buckets: {e}"))?
        // Command handling includes store round trips
        .set_buckets_for_metric(
            Matcher::Prefix("rc_command_duration".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set command duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of open WebSocket sessions.
///
/// Metric: `rc_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").set(count as f64);
}

/// Set the number of live room actors.
///
/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Commands
// ============================================================================

/// Record a handled client command.
///
/// Metric: `rc_commands_total`, `rc_command_duration_seconds`
/// Labels: `command`, `status`
pub fn record_command(command: &'static str, status: &'static str, duration: Duration) {
    counter!("rc_commands_total", "command" => command, "status" => status).increment(1);
    histogram!("rc_command_duration_seconds", "command" => command)
        .record(duration.as_secs_f64());
}

/// Record a command that ended in an `error` event.
///
/// Metric: `rc_command_errors_total`
/// Labels: `code`
pub fn record_command_error(code: &'static str) {
    counter!("rc_command_errors_total", "code" => code).increment(1);
}

// ============================================================================
// Store
// ============================================================================

/// Record an external store call.
///
/// Metric: `rc_store_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_store_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("rc_store_query_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

// ============================================================================
// Delivery and auth
// ============================================================================

/// Record an outbound event dropped because a connection mailbox was full
/// or closed.
///
/// Metric: `rc_events_dropped_total`
pub fn record_event_dropped() {
    counter!("rc_events_dropped_total").increment(1);
}

/// Record a refused connection attempt.
///
/// Metric: `rc_auth_failures_total`
pub fn record_auth_failure() {
    counter!("rc_auth_failures_total").increment(1);
}

/// Record an actor task that ended by panicking.
///
/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These execute without a global recorder installed; the calls are no-ops
    // but must not panic.
    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_connections_active(3);
        set_rooms_active(1);
        set_actor_mailbox_depth("room", 4);
        record_command("join-room", "success", Duration::from_millis(3));
        record_command_error("NOT_IN_ROOM");
        record_store_query("get_room", "success", Duration::from_micros(800));
        record_event_dropped();
        record_auth_failure();
        record_actor_panic("room");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(2);
            set_rooms_active(1);
            record_command("chat-message", "error", Duration::from_millis(1));
            record_command_error("NOT_IN_ROOM");
            record_store_query("get_room", "error", Duration::from_millis(2));
            record_event_dropped();
            record_auth_failure();
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: Vec<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "rc_connections_active",
            "rc_rooms_active",
            "rc_commands_total",
            "rc_command_duration_seconds",
            "rc_command_errors_total",
            "rc_store_query_duration_seconds",
            "rc_events_dropped_total",
            "rc_auth_failures_total",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }

        let errors = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "rc_command_errors_total")
            .unwrap();
        assert!(errors
            .0
            .key()
            .labels()
            .any(|l| l.key() == "code" && l.value() == "NOT_IN_ROOM"));
        assert_eq!(errors.3, DebugValue::Counter(1));
    }
}
