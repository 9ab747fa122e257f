//! Actor bookkeeping and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Controller | < 100  | 100-500 | > 500    |
//! | Room       | < 100  | 100-500 | > 500    |
//! | Session    | < 50   | 50-200  | > 200    |
//!
//! Depth is sampled from the receiver after each message and exported as
//! `rc_actor_mailbox_depth`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::observability::metrics;

/// Mailbox depth thresholds for controller and room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for session actors.
pub const SESSION_MAILBOX_NORMAL: usize = 50;
pub const SESSION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `ControllerActor` (singleton)
    Controller,
    /// `RoomActor` (one per live room)
    Room,
    /// `SessionActor` (one per client connection)
    Session,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Room => "room",
            ActorType::Session => "session",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Controller | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Session => SESSION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Controller | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Session => SESSION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks the queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    last_level: std::sync::Mutex<MailboxLevel>,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            last_level: std::sync::Mutex::new(MailboxLevel::Normal),
        }
    }

    /// Record one processed message and the number still queued behind it.
    pub fn record_processed(&self, queued: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.observe(queued);
    }

    /// Record the current queue depth.
    pub fn observe(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        let level = self.level_for_depth(depth);
        let mut last = self
            .last_level
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if level == *last {
            return;
        }
        *last = level;
        drop(last);

        // Log on transitions only
        match level {
            MailboxLevel::Critical => warn!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning => debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            ),
            MailboxLevel::Normal => debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth back to normal"
            ),
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth >= self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Process-wide actor counts, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_rooms: AtomicUsize,
    active_sessions: AtomicUsize,
    actor_panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        let count = self
            .active_rooms
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_rooms_active(count);
    }

    pub fn session_opened(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_sessions_active(count);
    }

    pub fn session_closed(&self) {
        let count = self
            .active_sessions
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_sessions_active(count);
    }

    /// Record an actor panic. Always a bug.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}
