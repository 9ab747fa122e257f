//! Observability module for the Room Controller.
//!
//! Metric labels are bounded to prevent cardinality explosion. Room, group,
//! session and recording ids only ever appear in log fields, never as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_sessions_active` | Gauge | none | Open client sessions |
//! | `rc_rooms_active` | Gauge | none | Live room actors |
//! | `rc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator per actor type |
//! | `rc_bus_events_published_total` | Counter | `topic_kind` | Bus traffic |
//! | `rc_bus_listener_failures_total` | Counter | none | Listener errors and panics |
//! | `rc_upload_chunks_total` | Counter | `outcome` | Chunk acceptance, duplicates, gaps |
//! | `rc_upload_bytes_total` | Counter | none | Bytes applied to recordings |
//! | `rc_recordings_finalized_total` | Counter | `reason` | Recordings handed to the archive |
//! | `rc_recordings_incomplete_total` | Counter | none | Recordings stored with a gap |
//! | `rc_handler_errors_total` | Counter | `kind` | Failed client events |
//! | `rc_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;
pub mod upload;

// Re-exports for convenience
pub use health::{health_router, status_router, HealthState, StatusState};
pub use metrics::init_metrics_recorder;
pub use upload::{UploadObserver, UploadStats, UploadTotals};
