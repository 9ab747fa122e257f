//! Process-local collaborators.
//!
//! Used by the binary when no external store is wired in, and by unit tests.
//! Nothing here survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::error::HuddleError;
use common::secret::ExposeSecret;
use common::types::{GroupId, RoomId, UserId};
use uuid::Uuid;

use super::{
    Credentials, FinishedRecording, GroupRecord, IdentityService, NewMessage, RecordingArchive,
    RoomRecord, Store,
};
use crate::protocol::{MessageInfo, UserInfo};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreState {
    rooms: HashMap<RoomId, RoomRecord>,
    groups: HashMap<GroupId, GroupRecord>,
    users: HashMap<UserId, UserInfo>,
    messages: HashMap<GroupId, Vec<MessageInfo>>,
}

/// Map-backed [`Store`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a room and return its id.
    pub fn insert_room(&self, name: &str) -> RoomId {
        let id = RoomId::new();
        lock(&self.state).rooms.insert(
            id,
            RoomRecord {
                id,
                name: name.to_string(),
                members: Vec::new(),
            },
        );
        id
    }

    /// Seed a group and return its id.
    pub fn insert_group(&self, name: &str) -> GroupId {
        let id = GroupId::new();
        lock(&self.state).groups.insert(
            id,
            GroupRecord {
                id,
                name: name.to_string(),
                members: Vec::new(),
            },
        );
        id
    }

    /// Seed a user and return its id.
    pub fn insert_user(&self, name: Option<&str>) -> UserId {
        let id = UserId::new();
        lock(&self.state).users.insert(
            id,
            UserInfo {
                id,
                name: name.map(str::to_string),
            },
        );
        id
    }

    /// Persisted members of a room, in join order.
    #[must_use]
    pub fn room_members(&self, id: RoomId) -> Vec<UserId> {
        lock(&self.state)
            .rooms
            .get(&id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    /// Number of messages persisted for a group.
    #[must_use]
    pub fn message_count(&self, id: GroupId) -> usize {
        lock(&self.state).messages.get(&id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_room(&self, id: RoomId) -> Result<Option<RoomRecord>, HuddleError> {
        Ok(lock(&self.state).rooms.get(&id).cloned())
    }

    async fn add_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError> {
        let mut state = lock(&self.state);
        let record = state
            .rooms
            .get_mut(&room)
            .ok_or_else(|| HuddleError::NotFound(format!("room {room}")))?;
        if !record.members.contains(&user) {
            record.members.push(user);
        }
        Ok(())
    }

    async fn remove_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError> {
        if let Some(record) = lock(&self.state).rooms.get_mut(&room) {
            record.members.retain(|member| *member != user);
        }
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<GroupRecord>, HuddleError> {
        Ok(lock(&self.state).groups.get(&id).cloned())
    }

    async fn list_messages(&self, group: GroupId) -> Result<Vec<MessageInfo>, HuddleError> {
        Ok(lock(&self.state)
            .messages
            .get(&group)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageInfo, HuddleError> {
        let mut state = lock(&self.state);
        if !state.groups.contains_key(&message.group_id) {
            return Err(HuddleError::NotFound(format!("group {}", message.group_id)));
        }
        let info = MessageInfo {
            id: Uuid::new_v4(),
            group_id: message.group_id,
            author: message.author,
            content: message.content,
            client_id: message.client_id,
            sent_at: message.sent_at,
        };
        state
            .messages
            .entry(message.group_id)
            .or_default()
            .push(info.clone());
        Ok(info)
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<UserInfo>, HuddleError> {
        let state = lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn set_user_name(&self, id: UserId, name: String) -> Result<UserInfo, HuddleError> {
        let mut state = lock(&self.state);
        let user = state.users.entry(id).or_insert(UserInfo { id, name: None });
        user.name = Some(name);
        Ok(user.clone())
    }
}

/// Resolves bearer tokens from a fixed table. Unknown tokens are guests.
#[derive(Default)]
pub struct TokenIdentity {
    tokens: Mutex<HashMap<String, UserId>>,
}

impl TokenIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, user: UserId) {
        lock(&self.tokens).insert(token.into(), user);
    }
}

#[async_trait]
impl IdentityService for TokenIdentity {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, HuddleError> {
        Ok(lock(&self.tokens)
            .get(credentials.token.expose_secret())
            .copied())
    }
}

/// Keeps finished recordings in memory.
#[derive(Default)]
pub struct MemoryArchive {
    finished: Mutex<Vec<FinishedRecording>>,
}

impl MemoryArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn finished(&self) -> Vec<FinishedRecording> {
        lock(&self.finished).clone()
    }
}

#[async_trait]
impl RecordingArchive for MemoryArchive {
    async fn archive(&self, recording: FinishedRecording) -> Result<(), HuddleError> {
        tracing::debug!(
            target: "rc.upload",
            recording_id = %recording.info.id,
            chunks = recording.chunks.len(),
            bytes = recording.applied_bytes,
            "Recording archived in memory"
        );
        lock(&self.finished).push(recording);
        Ok(())
    }
}
