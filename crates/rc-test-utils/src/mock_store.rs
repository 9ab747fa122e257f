//! In-memory store mock for RC testing.
//!
//! Wraps the process-local store and adds:
//! - Per-operation failure injection
//! - Per-operation latency injection
//! - Per-operation call counts
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::{MockStore, StoreOp};
//!
//! let store = MockStore::new();
//! let group = store.add_group("friends");
//! store.fail(StoreOp::CreateMessage);
//! // `send` on `group` now reports an internal error to the caller.
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::error::HuddleError;
use common::types::{GroupId, RoomId, UserId};
use room_controller::protocol::{MessageInfo, UserInfo};
use room_controller::services::memory::InMemoryStore;
use room_controller::services::{GroupRecord, NewMessage, RoomRecord, Store};

/// Store operations, for failure and latency injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetRoom,
    AddRoomMember,
    RemoveRoomMember,
    GetGroup,
    ListMessages,
    CreateMessage,
    GetUsers,
    SetUserName,
}

/// Mock store for testing.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<MockStoreInner>,
}

#[derive(Default)]
struct MockStoreInner {
    store: InMemoryStore,
    failing: Mutex<HashSet<StoreOp>>,
    delays: Mutex<HashMap<StoreOp, Duration>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl MockStore {
    /// Create a new empty MockStore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, name: &str) -> RoomId {
        self.inner.store.insert_room(name)
    }

    pub fn add_group(&self, name: &str) -> GroupId {
        self.inner.store.insert_group(name)
    }

    pub fn add_user(&self, name: Option<&str>) -> UserId {
        self.inner.store.insert_user(name)
    }

    /// Make every later call to `op` fail with a store error.
    pub fn fail(&self, op: StoreOp) {
        self.inner.failing.lock().unwrap().insert(op);
    }

    /// Undo [`MockStore::fail`].
    pub fn heal(&self, op: StoreOp) {
        self.inner.failing.lock().unwrap().remove(&op);
    }

    /// Make every later call to `op` take at least `delay`.
    pub fn delay(&self, op: StoreOp, delay: Duration) {
        self.inner.delays.lock().unwrap().insert(op, delay);
    }

    /// How many times `op` was called, failed calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn room_members(&self, room: RoomId) -> Vec<UserId> {
        self.inner.store.room_members(room)
    }

    pub fn message_count(&self, group: GroupId) -> usize {
        self.inner.store.message_count(group)
    }

    async fn enter(&self, op: StoreOp) -> Result<(), HuddleError> {
        *self.inner.calls.lock().unwrap().entry(op).or_default() += 1;
        let delay = self.inner.delays.lock().unwrap().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.failing.lock().unwrap().contains(&op) {
            return Err(HuddleError::Store(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn get_room(&self, id: RoomId) -> Result<Option<RoomRecord>, HuddleError> {
        self.enter(StoreOp::GetRoom).await?;
        self.inner.store.get_room(id).await
    }

    async fn add_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError> {
        self.enter(StoreOp::AddRoomMember).await?;
        self.inner.store.add_room_member(room, user).await
    }

    async fn remove_room_member(&self, room: RoomId, user: UserId) -> Result<(), HuddleError> {
        self.enter(StoreOp::RemoveRoomMember).await?;
        self.inner.store.remove_room_member(room, user).await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<GroupRecord>, HuddleError> {
        self.enter(StoreOp::GetGroup).await?;
        self.inner.store.get_group(id).await
    }

    async fn list_messages(&self, group: GroupId) -> Result<Vec<MessageInfo>, HuddleError> {
        self.enter(StoreOp::ListMessages).await?;
        self.inner.store.list_messages(group).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageInfo, HuddleError> {
        self.enter(StoreOp::CreateMessage).await?;
        self.inner.store.create_message(message).await
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<UserInfo>, HuddleError> {
        self.enter(StoreOp::GetUsers).await?;
        self.inner.store.get_users(ids).await
    }

    async fn set_user_name(&self, id: UserId, name: String) -> Result<UserInfo, HuddleError> {
        self.enter(StoreOp::SetUserName).await?;
        self.inner.store.set_user_name(id, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failure_and_heal() {
        let store = MockStore::new();
        let room = store.add_room("standup");

        store.fail(StoreOp::GetRoom);
        assert!(store.get_room(room).await.is_err());

        store.heal(StoreOp::GetRoom);
        assert!(store.get_room(room).await.unwrap().is_some());
        assert_eq!(store.calls(StoreOp::GetRoom), 2);
        assert_eq!(store.calls(StoreOp::GetGroup), 0);
    }

    #[tokio::test]
    async fn test_injected_delay() {
        let store = MockStore::new();
        let room = store.add_room("standup");
        store.delay(StoreOp::GetRoom, Duration::from_millis(20));

        let started = tokio::time::Instant::now();
        assert!(store.get_room(room).await.unwrap().is_some());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
