//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use std::time::Duration;

use common::types::{GroupId, RecordingId, RoomId, SignalId, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use upload_protocol::{Chunk, Received};

use super::room::RoomHandle;
use super::session::SessionHandle;
use crate::errors::RcError;
use crate::protocol::{ClientEvent, MemberInfo, RecordingInfo, Reply, ServerEvent, UserInfo};

/// Messages sent to `ControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Register a session whose identity is already resolved.
    OpenSession {
        user: Option<UserInfo>,
        outbound: mpsc::UnboundedSender<ServerEvent>,
        respond_to: oneshot::Sender<Result<SessionHandle, RcError>>,
    },

    /// Get or create the room actor and enqueue the join on it.
    JoinRoom {
        room_id: RoomId,
        member: MemberInfo,
        lease: CancellationToken,
        /// Completed by the room once the join is applied.
        join_reply: oneshot::Sender<Result<(), RcError>>,
        respond_to: oneshot::Sender<Result<RoomHandle, RcError>>,
    },

    /// Look up a live room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting work, close every session, then every room.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// The member stays in the room only while `lease` is live. A join
    /// whose lease is already cancelled is refused.
    Join {
        member: MemberInfo,
        lease: CancellationToken,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Remove a member and finalize every recording it owns.
    Leave {
        session: SignalId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Mark the member connected; replies with the peers already connected.
    ConnectTo {
        session: SignalId,
        respond_to: oneshot::Sender<Result<Vec<SignalId>, RcError>>,
    },

    DisconnectFrom {
        session: SignalId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    StartRecording {
        session: SignalId,
        owner: UserId,
        mime_type: String,
        is_screen: bool,
        respond_to: oneshot::Sender<Result<RecordingId, RcError>>,
    },

    UploadChunk {
        recording: RecordingId,
        user: UserId,
        chunk: Chunk,
        respond_to: oneshot::Sender<Result<Received, RcError>>,
    },

    StopRecording {
        recording: RecordingId,
        user: UserId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },

    /// Stop the actor if it has no members. Replies whether it stopped.
    CloseIfEmpty {
        respond_to: oneshot::Sender<bool>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// An event from the client. `respond_to` is set when the transport
    /// wants the handler result.
    Inbound {
        event: ClientEvent,
        respond_to: Option<oneshot::Sender<Result<Reply, RcError>>>,
    },

    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },

    /// Connection closed. Replies after teardown has finished.
    Close { respond_to: oneshot::Sender<()> },
}

/// Controller status (for `/status` and health checks).
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub instance_id: String,
    pub room_count: usize,
    pub session_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Snapshot of a room actor.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub members: Vec<MemberInfo>,
    pub connected: Vec<SignalId>,
    pub open_recordings: Vec<RecordingInfo>,
    pub finished_recordings: Vec<RecordingInfo>,
}

/// Snapshot of a session actor.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub signal_id: SignalId,
    pub user: Option<UserInfo>,
    pub room_id: Option<RoomId>,
    pub connected: bool,
    pub linked_peers: Vec<SignalId>,
    pub groups: Vec<GroupId>,
    pub open_recordings: Vec<RecordingId>,
}
