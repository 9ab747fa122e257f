//! Scripted client for end-to-end tests.
//!
//! A [`TestClient`] owns one session and the receiving end of its outbound
//! channel. Every `expect_*` helper is bounded by [`EXPECT_TIMEOUT`] and
//! panics with the events it skipped, so a missing notice fails fast with
//! context instead of hanging the test.

use std::time::Duration;

use bytes::Bytes;
use common::types::{GroupId, MessageId, RecordingId, RoomId, SignalId};
use room_controller::actors::{ControllerHandle, SessionHandle};
use room_controller::errors::RcError;
use room_controller::protocol::{
    ClientEvent, GroupNotice, GroupRequest, MemberInfo, MessageInfo, Reply, RoomNotice,
    RoomRequest, ServerEvent, SessionDescription, UserInfo,
};
use room_controller::services::Credentials;
use tokio::sync::mpsc;

/// How long an `expect_*` helper waits for a matching event.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One connected session.
pub struct TestClient {
    session: SessionHandle,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    /// Open a session on `controller`.
    ///
    /// # Panics
    ///
    /// Panics if the controller refuses the session.
    pub async fn connect(controller: &ControllerHandle, credentials: Option<Credentials>) -> Self {
        Self::try_connect(controller, credentials)
            .await
            .expect("session should open")
    }

    /// Open a session, returning the controller's refusal instead of
    /// panicking.
    pub async fn try_connect(
        controller: &ControllerHandle,
        credentials: Option<Credentials>,
    ) -> Result<Self, RcError> {
        let (tx, events) = mpsc::unbounded_channel();
        let session = controller.open_session(credentials, tx).await?;
        Ok(Self { session, events })
    }

    pub fn id(&self) -> SignalId {
        self.session.signal_id()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Push an event without waiting for it to be handled.
    pub async fn send(&self, event: impl Into<ClientEvent>) {
        self.session
            .send(event.into())
            .await
            .expect("session mailbox should be open");
    }

    /// Push an event and wait for the handler result.
    pub async fn request(&self, event: impl Into<ClientEvent>) -> Result<Reply, RcError> {
        self.session.request(event.into()).await
    }

    /// Next outbound event, whatever it is.
    pub async fn next_event(&mut self) -> ServerEvent {
        match tokio::time::timeout(EXPECT_TIMEOUT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("session outbound closed"),
            Err(_) => panic!("no event within {EXPECT_TIMEOUT:?}"),
        }
    }

    /// Skip events until `matcher` accepts one.
    pub async fn expect<T>(
        &mut self,
        what: &str,
        mut matcher: impl FnMut(&ServerEvent) -> Option<T>,
    ) -> T {
        let mut skipped = Vec::new();
        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => {
                    if let Some(found) = matcher(&event) {
                        return found;
                    }
                    skipped.push(event);
                }
                Ok(None) => {
                    panic!("session outbound closed while waiting for {what}; skipped {skipped:?}")
                }
                Err(_) => panic!("timed out waiting for {what}; skipped {skipped:?}"),
            }
        }
    }

    /// Skip events until a room notice matches.
    pub async fn expect_room<T>(
        &mut self,
        what: &str,
        mut matcher: impl FnMut(&RoomNotice) -> Option<T>,
    ) -> T {
        self.expect(what, |event| match event {
            ServerEvent::Room(notice) => matcher(notice),
            ServerEvent::Group(_) => None,
        })
        .await
    }

    /// Skip events until a group notice matches.
    pub async fn expect_group<T>(
        &mut self,
        what: &str,
        mut matcher: impl FnMut(&GroupNotice) -> Option<T>,
    ) -> T {
        self.expect(what, |event| match event {
            ServerEvent::Group(notice) => matcher(notice),
            ServerEvent::Room(_) => None,
        })
        .await
    }

    pub async fn expect_room_users(&mut self) -> Vec<MemberInfo> {
        self.expect_room("room users", |notice| match notice {
            RoomNotice::Users { users } => Some(users.clone()),
            _ => None,
        })
        .await
    }

    /// Wait for a `connect_to` notice, returning `(peer, polite)`.
    pub async fn expect_connect_to(&mut self) -> (SignalId, bool) {
        self.expect_room("connect_to", |notice| match notice {
            RoomNotice::ConnectTo { id, polite } => Some((*id, *polite)),
            _ => None,
        })
        .await
    }

    pub async fn expect_disconnect_from(&mut self) -> SignalId {
        self.expect_room("disconnect_from", |notice| match notice {
            RoomNotice::DisconnectFrom { id } => Some(*id),
            _ => None,
        })
        .await
    }

    /// Wait for a room error, returning its message and cause.
    pub async fn expect_room_error(&mut self) -> (String, Option<String>) {
        self.expect_room("room error", |notice| match notice {
            RoomNotice::Error {
                message,
                cause_event,
            } => Some((message.clone(), cause_event.clone())),
            _ => None,
        })
        .await
    }

    /// Wait for a retransmission request, returning `(recording, start, stop)`.
    pub async fn expect_chunk_request(&mut self) -> (RecordingId, u64, u64) {
        self.expect_room("request_upload_chunk", |notice| match notice {
            RoomNotice::RequestUploadChunk { id, start, stop } => Some((*id, *start, *stop)),
            _ => None,
        })
        .await
    }

    /// Wait for a group message batch, returning `(messages, historical)`.
    pub async fn expect_messages(&mut self) -> (Vec<MessageInfo>, bool) {
        self.expect_group("group messages", |notice| match notice {
            GroupNotice::Messages {
                messages,
                historical,
            } => Some((messages.clone(), *historical)),
            _ => None,
        })
        .await
    }

    pub async fn expect_group_users(&mut self) -> Vec<UserInfo> {
        self.expect_group("group users", |notice| match notice {
            GroupNotice::Users { users } => Some(users.clone()),
            _ => None,
        })
        .await
    }

    /// Assert that nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(quiet, self.events.recv()).await {
            panic!("expected no event, got {event:?}");
        }
    }

    /// Everything that arrives within `window`.
    pub async fn events_within(&mut self, window: Duration) -> Vec<ServerEvent> {
        let deadline = tokio::time::Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            events.push(event);
        }
        events
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the session and wait for its teardown.
    pub async fn close(&self) {
        self.session.close().await.expect("session should close");
    }
}

// ============================================================================
// Event builders
// ============================================================================

pub fn join_room(room: RoomId) -> RoomRequest {
    RoomRequest::JoinRoom {
        id: room.to_string(),
    }
}

pub fn signal_to(peer: SignalId, desc: SessionDescription) -> RoomRequest {
    RoomRequest::Signal {
        to: peer.to_string(),
        desc: Some(desc),
        candidate: None,
    }
}

pub fn upload_start(mime_type: &str) -> RoomRequest {
    RoomRequest::UploadStart {
        mime_type: mime_type.to_string(),
        is_screen: false,
    }
}

pub fn upload_chunk(recording: RecordingId, index: u64, data: &'static [u8]) -> RoomRequest {
    RoomRequest::UploadChunk {
        id: recording.to_string(),
        index,
        data: Bytes::from_static(data),
    }
}

pub fn upload_stop(recording: RecordingId) -> RoomRequest {
    RoomRequest::UploadStop {
        id: recording.to_string(),
    }
}

pub fn subscribe(group: GroupId) -> GroupRequest {
    GroupRequest::Subscribe {
        group_id: group.to_string(),
    }
}

pub fn send_message(group: GroupId, content: &str, msg_id: &str) -> GroupRequest {
    GroupRequest::Send {
        group_id: group.to_string(),
        content: content.to_string(),
        msg_id: MessageId::from(msg_id),
    }
}

pub fn set_name(name: &str) -> GroupRequest {
    GroupRequest::SetName {
        name: name.to_string(),
    }
}
