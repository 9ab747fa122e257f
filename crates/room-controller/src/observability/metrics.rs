//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Every label is drawn from a closed set:
//! - `actor_type`: controller, room, session
//! - `topic_kind`: signal, room, group, upload
//! - `outcome`: accepted, duplicate, gap, rejected
//! - `reason`: stopped, owner_left, room_closed
//! - `kind`: user, internal, cancelled

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `rc_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_sessions_active").set(count as f64);
}

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
// Counters
// ============================================================================

/// Metric: `rc_bus_events_published_total`
/// Labels: `topic_kind`
pub fn record_bus_event_published(topic_kind: &str) {
    counter!("rc_bus_events_published_total", "topic_kind" => topic_kind.to_string())
        .increment(1);
}

/// Metric: `rc_bus_listener_failures_total`
pub fn record_bus_listener_failure() {
    counter!("rc_bus_listener_failures_total").increment(1);
}

/// Metric: `rc_upload_chunks_total`
/// Labels: `outcome`
pub fn record_upload_chunk(outcome: &str) {
    counter!("rc_upload_chunks_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `rc_upload_bytes_total`
pub fn record_upload_bytes(bytes: usize) {
    counter!("rc_upload_bytes_total").increment(bytes as u64);
}

/// Recordings finalized with a gap.
///
/// Metric: `rc_recordings_incomplete_total`
pub fn record_recording_incomplete() {
    counter!("rc_recordings_incomplete_total").increment(1);
}

/// Metric: `rc_recordings_finalized_total`
/// Labels: `reason`
pub fn record_recording_finalized(reason: &str) {
    counter!("rc_recordings_finalized_total", "reason" => reason.to_string()).increment(1);
}

/// Metric: `rc_handler_errors_total`
/// Labels: `kind`
pub fn record_handler_error(kind: &str) {
    counter!("rc_handler_errors_total", "kind" => kind.to_string()).increment(1);
}

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

    // Without an installed recorder these calls go to the no-op recorder.
    #[test]
    fn test_recording_functions_without_recorder() {
        set_sessions_active(3);
        set_rooms_active(1);
        set_actor_mailbox_depth("room", 12);
        record_bus_event_published("room");
        record_bus_listener_failure();
        record_upload_chunk("gap");
        record_recording_finalized("owner_left");
        record_upload_bytes(4096);
        record_recording_incomplete();
        record_handler_error("user");
        record_actor_panic("session");
    }

    #[test]
    fn test_counters_are_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_upload_chunk("accepted");
            record_upload_chunk("accepted");
            record_upload_chunk("duplicate");
            set_rooms_active(4);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let accepted = snapshot.iter().find(|(key, _, _, _)| {
            key.key().name() == "rc_upload_chunks_total"
                && key
                    .key()
                    .labels()
                    .any(|label| label.key() == "outcome" && label.value() == "accepted")
        });
        assert!(matches!(accepted, Some((_, _, _, DebugValue::Counter(2)))));

        let rooms = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "rc_rooms_active");
        assert!(rooms.is_some());
    }
}
