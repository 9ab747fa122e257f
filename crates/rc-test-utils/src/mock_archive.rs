//! Mock recording archive.
//!
//! Records every finished recording handed off by a room, and lets tests
//! wait for hand-offs that happen on background paths (disconnects, room
//! shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::error::HuddleError;
use room_controller::services::{FinishedRecording, RecordingArchive};
use tokio::sync::Notify;

/// How long [`MockArchive::wait_for`] waits before failing the test.
pub const ARCHIVE_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Mock archive for testing.
#[derive(Clone, Default)]
pub struct MockArchive {
    recordings: Arc<Mutex<Vec<FinishedRecording>>>,
    archived: Arc<Notify>,
    failing: Arc<AtomicBool>,
}

impl MockArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later hand-off. Rejected recordings are still counted.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn recordings(&self) -> Vec<FinishedRecording> {
        self.recordings.lock().unwrap().clone()
    }

    /// Wait until at least `count` recordings were handed off.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within [`ARCHIVE_WAIT_TIMEOUT`].
    pub async fn wait_for(&self, count: usize) -> Vec<FinishedRecording> {
        let wait = async {
            loop {
                let notified = self.archived.notified();
                let recordings = self.recordings();
                if recordings.len() >= count {
                    return recordings;
                }
                notified.await;
            }
        };
        tokio::time::timeout(ARCHIVE_WAIT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "expected {count} archived recordings, got {}",
                    self.recordings().len()
                )
            })
    }
}

#[async_trait]
impl RecordingArchive for MockArchive {
    async fn archive(&self, recording: FinishedRecording) -> Result<(), HuddleError> {
        self.recordings.lock().unwrap().push(recording);
        self.archived.notify_waiters();
        if self.failing.load(Ordering::SeqCst) {
            return Err(HuddleError::Archive("archive unavailable".to_string()));
        }
        Ok(())
    }
}
