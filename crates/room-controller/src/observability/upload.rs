//! Process-wide observer of recording uploads.
//!
//! Holds a strong subscription on [`Topic::Upload`] and keeps running totals
//! for `/status` and the byte-level Prometheus counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::metrics;
use crate::bus::{BusEvent, EventBus, Strength, Subscription, Topic, UploadEvent};

/// Running upload totals.
#[derive(Debug, Default)]
pub struct UploadStats {
    chunks_accepted: AtomicU64,
    bytes_accepted: AtomicU64,
    recordings_finalized: AtomicU64,
    recordings_incomplete: AtomicU64,
}

/// Point-in-time copy of [`UploadStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadTotals {
    pub chunks_accepted: u64,
    pub bytes_accepted: u64,
    pub recordings_finalized: u64,
    pub recordings_incomplete: u64,
}

impl UploadStats {
    #[must_use]
    pub fn totals(&self) -> UploadTotals {
        UploadTotals {
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            bytes_accepted: self.bytes_accepted.load(Ordering::Relaxed),
            recordings_finalized: self.recordings_finalized.load(Ordering::Relaxed),
            recordings_incomplete: self.recordings_incomplete.load(Ordering::Relaxed),
        }
    }

    fn observe(&self, event: &UploadEvent) {
        match event {
            UploadEvent::ChunkAccepted { bytes, .. } => {
                self.chunks_accepted.fetch_add(1, Ordering::Relaxed);
                self.bytes_accepted
                    .fetch_add(u64::try_from(*bytes).unwrap_or(u64::MAX), Ordering::Relaxed);
                metrics::record_upload_bytes(*bytes);
            }
            UploadEvent::Finalized {
                recording,
                reason,
                applied_chunks,
                applied_bytes,
                missing,
            } => {
                self.recordings_finalized.fetch_add(1, Ordering::Relaxed);
                match missing {
                    Some(range) => {
                        self.recordings_incomplete.fetch_add(1, Ordering::Relaxed);
                        metrics::record_recording_incomplete();
                        warn!(
                            target: "rc.upload",
                            recording = %recording,
                            reason = reason.as_str(),
                            applied_chunks,
                            missing_start = range.start,
                            missing_end = range.end,
                            "Recording stored with a gap"
                        );
                    }
                    None => {
                        debug!(
                            target: "rc.upload",
                            recording = %recording,
                            reason = reason.as_str(),
                            applied_chunks,
                            applied_bytes,
                            "Recording stored"
                        );
                    }
                }
            }
        }
    }
}

/// Listener registration for upload progress.
#[derive(Debug)]
pub struct UploadObserver {
    subscription: Subscription,
    stats: Arc<UploadStats>,
}

impl UploadObserver {
    /// Subscribe to the upload topic for the life of the process.
    #[must_use]
    pub fn attach(bus: &EventBus) -> Self {
        let stats = Arc::new(UploadStats::default());
        let subscription = bus.subscribe(Topic::Upload, Strength::Strong);

        let observed = Arc::clone(&stats);
        subscription.on_any(move |event| {
            if let BusEvent::Upload(upload) = event {
                observed.observe(upload);
            }
            Ok(())
        });

        Self {
            subscription,
            stats,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<UploadStats> {
        Arc::clone(&self.stats)
    }

    /// Remove the strong subscription from the bus.
    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}
