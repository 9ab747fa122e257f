//! Typed bus payloads, one family per topic kind.

use std::ops::Range;

use common::types::{RecordingId, SignalId};

use super::topic::TopicKind;
use crate::protocol::{
    IceCandidate, MemberInfo, MessageInfo, RecordingAction, RecordingInfo, SessionDescription,
    UserInfo,
};
use crate::services::FinalizeReason;

/// Room topic payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Full live membership after a join or leave.
    Users { members: Vec<MemberInfo> },
    /// Full recording list after a start or finalize.
    Recordings { recordings: Vec<RecordingInfo> },
    Connected { origin: SignalId },
    Disconnected { origin: SignalId },
    Recording {
        origin: SignalId,
        action: RecordingAction,
    },
    ScreenShare {
        origin: SignalId,
        stream_id: Option<String>,
    },
}

/// Signal topic payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Signal {
        from: SignalId,
        desc: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    },
}

/// Group topic payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Messages { messages: Vec<MessageInfo> },
    Users { users: Vec<UserInfo> },
}

/// Upload topic payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    ChunkAccepted {
        recording: RecordingId,
        index: u64,
        bytes: usize,
    },
    Finalized {
        recording: RecordingId,
        reason: FinalizeReason,
        applied_chunks: u64,
        applied_bytes: u64,
        missing: Option<Range<u64>>,
    },
}

/// Anything carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Room(RoomEvent),
    Peer(PeerEvent),
    Group(GroupEvent),
    Upload(UploadEvent),
}

impl BusEvent {
    /// Name listeners register against with [`Subscription::on`](super::Subscription::on).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            BusEvent::Room(RoomEvent::Users { .. }) | BusEvent::Group(GroupEvent::Users { .. }) => {
                "users"
            }
            BusEvent::Room(RoomEvent::Recordings { .. }) => "recordings",
            BusEvent::Room(RoomEvent::Connected { .. }) => "connected",
            BusEvent::Room(RoomEvent::Disconnected { .. }) => "disconnected",
            BusEvent::Room(RoomEvent::Recording { .. }) => "recording",
            BusEvent::Room(RoomEvent::ScreenShare { .. }) => "screen_share",
            BusEvent::Peer(PeerEvent::Signal { .. }) => "signal",
            BusEvent::Group(GroupEvent::Messages { .. }) => "messages",
            BusEvent::Upload(UploadEvent::ChunkAccepted { .. }) => "chunk_accepted",
            BusEvent::Upload(UploadEvent::Finalized { .. }) => "finalized",
        }
    }

    /// Session that caused the event, when there is one. Used to suppress
    /// self-echo.
    #[must_use]
    pub fn origin(&self) -> Option<SignalId> {
        match self {
            BusEvent::Room(
                RoomEvent::Connected { origin }
                | RoomEvent::Disconnected { origin }
                | RoomEvent::Recording { origin, .. }
                | RoomEvent::ScreenShare { origin, .. },
            ) => Some(*origin),
            BusEvent::Peer(PeerEvent::Signal { from, .. }) => Some(*from),
            _ => None,
        }
    }

    #[must_use]
    pub const fn topic_kind(&self) -> TopicKind {
        match self {
            BusEvent::Room(_) => TopicKind::Room,
            BusEvent::Peer(_) => TopicKind::Signal,
            BusEvent::Group(_) => TopicKind::Group,
            BusEvent::Upload(_) => TopicKind::Upload,
        }
    }
}
