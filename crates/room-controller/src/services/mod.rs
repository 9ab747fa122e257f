//! External collaborators.
//!
//! The controller never owns persistence or authentication; it reaches them
//! through these traits. Every call is a suspension point and may fail, so
//! callers re-check any state they read before the call.

pub mod memory;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::error::HuddleError;
use common::secret::SecretString;
use common::types::{GroupId, MessageId, RoomId, SignalId, UserId};

use crate::protocol::{MessageInfo, RecordingInfo, UserInfo};

/// Credentials presented when a connection opens.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

/// Persisted room as the store reports it. `members` may lag the live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub members: Vec<UserId>,
}

/// Persisted messaging group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
}

/// Message to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub group_id: GroupId,
    pub author: UserId,
    pub content: String,
    pub client_id: MessageId,
    pub sent_at: DateTime<Utc>,
}

/// Why a recording was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Owner sent `upload_stop`
    Stopped,
    /// Owner left the room or disconnected
    OwnerLeft,
    /// Room shut down with the recording open
    RoomClosed,
}

impl FinalizeReason {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::Stopped => "stopped",
            FinalizeReason::OwnerLeft => "owner_left",
            FinalizeReason::RoomClosed => "room_closed",
        }
    }
}

/// A recording handed off for storage.
///
/// `chunks` holds exactly the applied prefix, in index order. Nothing is
/// fabricated for `missing`.
#[derive(Clone)]
pub struct FinishedRecording {
    pub info: RecordingInfo,
    pub room_id: RoomId,
    pub owner_session: SignalId,
    pub chunks: Vec<Bytes>,
    pub applied_bytes: u64,
    pub missing: Option<Range<u64>>,
    pub reason: FinalizeReason,
}

impl FinishedRecording {
    /// Concatenate the applied chunks.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(usize::try_from(self.applied_bytes).unwrap_or(0));
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        Bytes::from(out)
    }
}

impl fmt::Debug for FinishedRecording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedRecording")
            .field("id", &self.info.id)
            .field("room_id", &self.room_id)
            .field("chunks", &self.chunks.len())
            .field("applied_bytes", &self.applied_bytes)
            .field("missing", &self.missing)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Maps credentials to a user. `Ok(None)` means unknown credentials, which
/// opens a guest session.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, HuddleError>;
}

/// Request/response access to persisted entities.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_room(&self, id: RoomId) -> Result<Option<RoomRecord>, HuddleError>;

    async fn add_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError>;

    async fn remove_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError>;

    async fn get_group(&self, id: GroupId) -> Result<Option<GroupRecord>, HuddleError>;

    async fn list_messages(&self, group: GroupId) -> Result<Vec<MessageInfo>, HuddleError>;

    async fn create_message(&self, message: NewMessage) -> Result<MessageInfo, HuddleError>;

    /// Unknown ids are skipped.
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<UserInfo>, HuddleError>;

    async fn set_user_name(&self, id: UserId, name: String) -> Result<UserInfo, HuddleError>;
}

/// Storage/attachment creation for finished recordings.
#[async_trait]
pub trait RecordingArchive: Send + Sync {
    async fn archive(&self, recording: FinishedRecording) -> Result<(), HuddleError>;
}

/// The collaborators, bundled for the actors.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityService>,
    pub store: Arc<dyn Store>,
    pub archive: Arc<dyn RecordingArchive>,
}

impl Services {
    /// Process-local collaborators with no persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            identity: Arc::new(memory::TokenIdentity::default()),
            store: Arc::new(memory::InMemoryStore::default()),
            archive: Arc::new(memory::MemoryArchive::default()),
        }
    }
}
