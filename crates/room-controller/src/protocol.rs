//! Client-facing event surface.
//!
//! The transport decodes frames into [`ClientEvent`]s and encodes
//! [`ServerEvent`]s; framing and encoding live outside this crate. Events are
//! grouped by logical channel (room, group) and tagged by name:
//!
//! ```json
//! {"channel": "room", "event": "join_room", "id": "5f0c..."}
//! {"channel": "room", "event": "connect_to", "id": "a81e...", "polite": true}
//! ```
//!
//! Ids arrive from clients as strings and are parsed by the handlers, so a
//! malformed id surfaces as the matching user error rather than a decode
//! failure.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::{GroupId, MessageId, RecordingId, SignalId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Shared payload types
// ============================================================================

/// Recording toggle relayed between room members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingAction {
    Start,
    Stop,
}

/// Lifecycle of a recording as shown in room recording lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Chunks are still arriving
    Receiving,
    /// Finalized and handed to the archive
    Finished,
}

/// A persisted user as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: Option<String>,
}

/// One live session in a room. Guests have no `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: SignalId,
    pub user: Option<UserInfo>,
}

/// Recording metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub id: RecordingId,
    pub owner: UserId,
    pub mime_type: String,
    pub is_screen: bool,
    pub started_at: DateTime<Utc>,
    pub state: RecordingState,
}

/// A persisted group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: Uuid,
    pub group_id: GroupId,
    pub author: UserId,
    pub content: String,
    /// Client-generated id used for send deduplication
    pub client_id: MessageId,
    pub sent_at: DateTime<Utc>,
}

/// Session description kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Opaque session description produced by the media stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Abandon a pending local offer.
    #[must_use]
    pub fn rollback() -> Self {
        Self {
            kind: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// Opaque ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

// ============================================================================
// Inbound
// ============================================================================

/// Anything a client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ClientEvent {
    Room(RoomRequest),
    Group(GroupRequest),
}

impl ClientEvent {
    /// Event name, reported back as the cause of an error.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Room(request) => request.name(),
            ClientEvent::Group(request) => request.name(),
        }
    }

    /// Whether failures are reported through the request's acknowledgement
    /// instead of an `error` event.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        matches!(
            self,
            ClientEvent::Room(RoomRequest::UploadStart { .. })
                | ClientEvent::Group(GroupRequest::Send { .. })
        )
    }
}

impl From<RoomRequest> for ClientEvent {
    fn from(request: RoomRequest) -> Self {
        ClientEvent::Room(request)
    }
}

impl From<GroupRequest> for ClientEvent {
    fn from(request: GroupRequest) -> Self {
        ClientEvent::Group(request)
    }
}

/// Room channel requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoomRequest {
    JoinRoom {
        id: String,
    },
    LeaveRoom,
    ConnectTo,
    DisconnectFrom,
    Recording {
        action: RecordingAction,
    },
    ScreenShare {
        #[serde(default)]
        stream_id: Option<String>,
    },
    Signal {
        to: String,
        #[serde(default)]
        desc: Option<SessionDescription>,
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },
    UploadStart {
        mime_type: String,
        #[serde(default)]
        is_screen: bool,
    },
    UploadChunk {
        id: String,
        index: u64,
        data: Bytes,
    },
    UploadStop {
        id: String,
    },
}

impl RoomRequest {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RoomRequest::JoinRoom { .. } => "join_room",
            RoomRequest::LeaveRoom => "leave_room",
            RoomRequest::ConnectTo => "connect_to",
            RoomRequest::DisconnectFrom => "disconnect_from",
            RoomRequest::Recording { .. } => "recording",
            RoomRequest::ScreenShare { .. } => "screen_share",
            RoomRequest::Signal { .. } => "signal",
            RoomRequest::UploadStart { .. } => "upload_start",
            RoomRequest::UploadChunk { .. } => "upload_chunk",
            RoomRequest::UploadStop { .. } => "upload_stop",
        }
    }
}

/// Group channel requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupRequest {
    Subscribe {
        group_id: String,
    },
    Unsubscribe {
        group_id: String,
    },
    /// History for one subscribed group, or for every subscribed group.
    RequestMessages {
        #[serde(default)]
        group_id: Option<String>,
    },
    RequestUsers {
        ids: Vec<String>,
    },
    Send {
        group_id: String,
        content: String,
        msg_id: MessageId,
    },
    SetName {
        name: String,
    },
}

impl GroupRequest {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            GroupRequest::Subscribe { .. } => "subscribe",
            GroupRequest::Unsubscribe { .. } => "unsubscribe",
            GroupRequest::RequestMessages { .. } => "request_messages",
            GroupRequest::RequestUsers { .. } => "request_users",
            GroupRequest::Send { .. } => "send",
            GroupRequest::SetName { .. } => "set_name",
        }
    }
}

/// Successful handler result, returned to callers that asked for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    UploadStarted { id: RecordingId },
}

// ============================================================================
// Outbound
// ============================================================================

/// Anything the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ServerEvent {
    Room(RoomNotice),
    Group(GroupNotice),
}

/// Room channel notices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoomNotice {
    Users {
        users: Vec<MemberInfo>,
    },
    Recordings {
        recordings: Vec<RecordingInfo>,
    },
    ConnectTo {
        id: SignalId,
        polite: bool,
    },
    DisconnectFrom {
        id: SignalId,
    },
    Signal {
        from: SignalId,
        desc: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    },
    Recording {
        action: RecordingAction,
        from: SignalId,
    },
    ScreenShare {
        user: SignalId,
        stream_id: Option<String>,
    },
    RequestUploadChunk {
        id: RecordingId,
        start: u64,
        stop: u64,
    },
    Error {
        message: String,
        cause_event: Option<String>,
    },
}

/// Group channel notices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupNotice {
    Messages {
        messages: Vec<MessageInfo>,
        historical: bool,
    },
    Users {
        users: Vec<UserInfo>,
    },
    /// `cause_event` names the group event that failed.
    Error {
        cause_event: String,
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_room_request() {
        let event: ClientEvent = serde_json::from_value(json!({
            "channel": "room",
            "event": "join_room",
            "id": "not-checked-here",
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Room(RoomRequest::JoinRoom {
                id: "not-checked-here".to_string()
            })
        );
        assert_eq!(event.name(), "join_room");
        assert!(!event.is_acknowledged());
    }

    #[test]
    fn test_decode_signal_with_candidate_only() {
        let event: ClientEvent = serde_json::from_value(json!({
            "channel": "room",
            "event": "signal",
            "to": "abc",
            "candidate": {"candidate": "candidate:1 1 udp", "sdpMid": "0", "sdpMLineIndex": 0},
        }))
        .unwrap();
        let ClientEvent::Room(RoomRequest::Signal { desc, candidate, .. }) = event else {
            panic!("expected signal");
        };
        assert!(desc.is_none());
        assert_eq!(candidate.unwrap().sdp_m_line_index, Some(0));
    }

    #[test]
    fn test_send_is_acknowledged() {
        let event: ClientEvent = serde_json::from_value(json!({
            "channel": "group",
            "event": "send",
            "group_id": "g",
            "content": "hi",
            "msg_id": "m-1",
        }))
        .unwrap();
        assert!(event.is_acknowledged());
        assert_eq!(event.name(), "send");
    }

    #[test]
    fn test_encode_connect_to() {
        let id = SignalId(Uuid::nil());
        let value = serde_json::to_value(ServerEvent::Room(RoomNotice::ConnectTo {
            id,
            polite: true,
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({
                "channel": "room",
                "event": "connect_to",
                "id": "00000000-0000-0000-0000-000000000000",
                "polite": true,
            })
        );
    }

    #[test]
    fn test_encode_group_error() {
        let value = serde_json::to_value(ServerEvent::Group(GroupNotice::Error {
            cause_event: "subscribe".to_string(),
            message: "Group not found".to_string(),
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({
                "channel": "group",
                "event": "error",
                "cause_event": "subscribe",
                "message": "Group not found",
            })
        );
    }

    #[test]
    fn test_session_description_wire_shape() {
        let value = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(value, json!({"type": "offer", "sdp": "v=0"}));
    }
}
