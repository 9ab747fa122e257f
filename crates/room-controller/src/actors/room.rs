//! `RoomActor` - one per live room.
//!
//! Owns the live membership view, which members are connected for peer
//! negotiation, and every open recording's reassembly state. Membership is
//! mirrored to the store for identified users, but the actor's own view is
//! authoritative while the room is live.
//!
//! Every chunk for a recording passes through this actor's mailbox, so
//! finalization always sees all chunks handed over before it.
//!
//! # Idle rooms
//!
//! When the last member leaves, the actor notifies the controller. The
//! controller then asks it to close with [`RoomMessage::CloseIfEmpty`]; the
//! room re-checks emptiness at that point because a join may have been queued
//! in between.
//!
//! # Membership leases
//!
//! Every join carries a [`CancellationToken`] owned by the joining session.
//! A member whose lease is cancelled is removed as if it had left, so a
//! session that dies between handing over a join and recording it cannot
//! linger here.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::Utc;
use common::types::{RecordingId, RoomId, SignalId, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use upload_protocol::{Chunk, Reassembler, Received};

use super::messages::{RoomMessage, RoomState};
use super::metrics::{ActorType, MailboxMonitor};
use crate::bus::{EventBus, RoomEvent, UploadEvent};
use crate::errors::RcError;
use crate::observability::metrics;
use crate::protocol::{MemberInfo, RecordingInfo, RecordingState};
use crate::services::{FinalizeReason, FinishedRecording, Services};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Dependencies shared by every room.
#[derive(Clone)]
pub struct RoomContext {
    pub bus: EventBus,
    pub services: Services,
    /// Receives the room id when the room becomes empty.
    pub idle_tx: mpsc::UnboundedSender<RoomId>,
    pub max_chunk_bytes: usize,
}

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Enqueue a raw message. Used by the controller to forward joins.
    pub(crate) async fn send(&self, message: RoomMessage) -> Result<(), RcError> {
        self.sender.send(message).await.map_err(RcError::channel_send)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RcError>>) -> RoomMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(RcError::channel_recv)?
    }

    pub async fn join(&self, member: MemberInfo, lease: CancellationToken) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Join {
            member,
            lease,
            respond_to,
        })
        .await
    }

    pub async fn leave(&self, session: SignalId) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::Leave {
            session,
            respond_to,
        })
        .await
    }

    /// Returns the peers that were already connected.
    pub async fn connect_to(&self, session: SignalId) -> Result<Vec<SignalId>, RcError> {
        self.request(|respond_to| RoomMessage::ConnectTo {
            session,
            respond_to,
        })
        .await
    }

    pub async fn disconnect_from(&self, session: SignalId) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::DisconnectFrom {
            session,
            respond_to,
        })
        .await
    }

    pub async fn start_recording(
        &self,
        session: SignalId,
        owner: UserId,
        mime_type: String,
        is_screen: bool,
    ) -> Result<RecordingId, RcError> {
        self.request(|respond_to| RoomMessage::StartRecording {
            session,
            owner,
            mime_type,
            is_screen,
            respond_to,
        })
        .await
    }

    pub async fn upload_chunk(
        &self,
        recording: RecordingId,
        user: UserId,
        chunk: Chunk,
    ) -> Result<Received, RcError> {
        self.request(|respond_to| RoomMessage::UploadChunk {
            recording,
            user,
            chunk,
            respond_to,
        })
        .await
    }

    pub async fn stop_recording(&self, recording: RecordingId, user: UserId) -> Result<(), RcError> {
        self.request(|respond_to| RoomMessage::StopRecording {
            recording,
            user,
            respond_to,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;
        rx.await.map_err(RcError::channel_recv)
    }

    /// Returns `true` if the room was empty and has stopped.
    pub async fn close_if_empty(&self) -> Result<bool, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::CloseIfEmpty { respond_to: tx })
            .await?;
        rx.await.map_err(RcError::channel_recv)
    }

    /// Cancel the actor. Open recordings are finalized before it stops.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct Member {
    info: MemberInfo,
    connected: bool,
    lease: CancellationToken,
}

struct OpenRecording {
    info: RecordingInfo,
    owner_session: SignalId,
    reassembler: Reassembler,
    chunks: Vec<Bytes>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    context: RoomContext,
    /// Join order
    members: Vec<Member>,
    /// Signal ids whose lease was cancelled.
    expired_tx: mpsc::UnboundedSender<SignalId>,
    expired_rx: mpsc::UnboundedReceiver<SignalId>,
    open: HashMap<RecordingId, OpenRecording>,
    finished: Vec<RecordingInfo>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    #[must_use]
    pub fn spawn(
        room_id: RoomId,
        context: RoomContext,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();

        let actor = Self {
            room_id,
            receiver,
            cancel_token: cancel_token.clone(),
            context,
            members: Vec::new(),
            expired_tx,
            expired_rx,
            open: HashMap::new(),
            finished: Vec::new(),
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string()),
        };

        let task = tokio::spawn(actor.run());

        let handle = RoomHandle {
            room_id,
            sender,
            cancel_token,
        };

        (handle, task)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(target: "rc.actor.room", room_id = %self.room_id, "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.finalize_all(FinalizeReason::RoomClosed).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        self.finalize_all(FinalizeReason::RoomClosed).await;
                        break;
                    };
                    let stop = self.handle_message(message).await;
                    self.mailbox.record_processed(self.receiver.len());
                    if stop {
                        break;
                    }
                }

                Some(session) = self.expired_rx.recv() => {
                    self.expire(session).await;
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            members_remaining = self.members.len(),
            recordings_finished = self.finished.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Returns `true` when the actor should stop.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                member,
                lease,
                respond_to,
            } => {
                let result = self.join(member, lease).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Leave {
                session,
                respond_to,
            } => {
                let result = self.leave(session).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::ConnectTo {
                session,
                respond_to,
            } => {
                let _ = respond_to.send(self.connect_to(session));
            }
            RoomMessage::DisconnectFrom {
                session,
                respond_to,
            } => {
                let _ = respond_to.send(self.disconnect_from(session));
            }
            RoomMessage::StartRecording {
                session,
                owner,
                mime_type,
                is_screen,
                respond_to,
            } => {
                let result = self.start_recording(session, owner, mime_type, is_screen);
                let _ = respond_to.send(result);
            }
            RoomMessage::UploadChunk {
                recording,
                user,
                chunk,
                respond_to,
            } => {
                let _ = respond_to.send(self.upload_chunk(recording, user, chunk));
            }
            RoomMessage::StopRecording {
                recording,
                user,
                respond_to,
            } => {
                let result = self.stop_recording(recording, user).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
            RoomMessage::CloseIfEmpty { respond_to } => {
                let empty = self.members.is_empty();
                if empty {
                    // No members means no owners left, but be thorough.
                    self.finalize_all(FinalizeReason::RoomClosed).await;
                }
                let _ = respond_to.send(empty);
                return empty;
            }
        }
        false
    }

    fn member_index(&self, session: SignalId) -> Option<usize> {
        self.members
            .iter()
            .position(|member| member.info.id == session)
    }

    async fn join(&mut self, member: MemberInfo, lease: CancellationToken) -> Result<(), RcError> {
        if let Some(user) = &member.user {
            self.context
                .services
                .store
                .add_room_member(self.room_id, user.id)
                .await?;
        }

        // The session may have gone away while the store call was pending.
        if lease.is_cancelled() {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                signal_id = %member.id,
                "Join abandoned by its session"
            );
            if let Some(user) = &member.user {
                self.forget_user(user.id).await;
            }
            if self.members.is_empty() {
                let _ = self.context.idle_tx.send(self.room_id);
            }
            return Err(RcError::Cancelled);
        }
        self.watch_lease(member.id, lease.clone());

        // Re-validate after the store call: a duplicate join replaces the entry.
        if let Some(index) = self.member_index(member.id) {
            if let Some(existing) = self.members.get_mut(index) {
                existing.info = member;
                existing.lease = lease;
            }
        } else {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                signal_id = %member.id,
                "Member joined"
            );
            self.members.push(Member {
                info: member,
                connected: false,
                lease,
            });
        }

        self.publish_users();
        self.publish_recordings();
        Ok(())
    }

    async fn leave(&mut self, session: SignalId) -> Result<(), RcError> {
        let Some(index) = self.member_index(session) else {
            return Err(RcError::NotInRoom);
        };
        let member = self.members.remove(index);

        if member.connected {
            self.context
                .bus
                .publish_room(self.room_id, RoomEvent::Disconnected { origin: session });
        }

        let owned: Vec<RecordingId> = self
            .open
            .iter()
            .filter(|(_, recording)| recording.owner_session == session)
            .map(|(id, _)| *id)
            .collect();
        for recording in owned {
            self.finalize(recording, FinalizeReason::OwnerLeft).await;
        }

        if let Some(user) = &member.info.user {
            self.forget_user(user.id).await;
        }

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            signal_id = %session,
            remaining = self.members.len(),
            "Member left"
        );

        self.publish_users();

        if self.members.is_empty() {
            let _ = self.context.idle_tx.send(self.room_id);
        }
        Ok(())
    }

    /// Drop the persisted membership of `user` unless another of its
    /// sessions is still here.
    async fn forget_user(&self, user: UserId) {
        let still_present = self
            .members
            .iter()
            .any(|other| other.info.user.as_ref().is_some_and(|u| u.id == user));
        if still_present {
            return;
        }
        if let Err(e) = self
            .context
            .services
            .store
            .remove_room_member(self.room_id, user)
            .await
        {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                user_id = %user,
                error = %e,
                "Failed to persist membership removal"
            );
        }
    }

    fn watch_lease(&self, session: SignalId, lease: CancellationToken) {
        let expired = self.expired_tx.clone();
        let room_closed = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = lease.cancelled() => {
                    let _ = expired.send(session);
                }
                () = room_closed.cancelled() => {}
            }
        });
    }

    /// Remove a member whose lease ended without a leave.
    async fn expire(&mut self, session: SignalId) {
        let lapsed = self
            .members
            .iter()
            .any(|member| member.info.id == session && member.lease.is_cancelled());
        if !lapsed {
            return;
        }
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            signal_id = %session,
            "Removing member whose session is gone"
        );
        if let Err(e) = self.leave(session).await {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                signal_id = %session,
                error = %e,
                "Lapsed member already gone"
            );
        }
    }

    fn connect_to(&mut self, session: SignalId) -> Result<Vec<SignalId>, RcError> {
        let index = self.member_index(session).ok_or(RcError::NotInRoom)?;

        let peers: Vec<SignalId> = self
            .members
            .iter()
            .filter(|member| member.connected && member.info.id != session)
            .map(|member| member.info.id)
            .collect();

        if let Some(member) = self.members.get_mut(index) {
            if !member.connected {
                member.connected = true;
                self.context
                    .bus
                    .publish_room(self.room_id, RoomEvent::Connected { origin: session });
            }
        }

        Ok(peers)
    }

    fn disconnect_from(&mut self, session: SignalId) -> Result<(), RcError> {
        let index = self.member_index(session).ok_or(RcError::NotInRoom)?;
        if let Some(member) = self.members.get_mut(index) {
            if member.connected {
                member.connected = false;
                self.context
                    .bus
                    .publish_room(self.room_id, RoomEvent::Disconnected { origin: session });
            }
        }
        Ok(())
    }

    fn start_recording(
        &mut self,
        session: SignalId,
        owner: UserId,
        mime_type: String,
        is_screen: bool,
    ) -> Result<RecordingId, RcError> {
        if self.member_index(session).is_none() {
            return Err(RcError::NotInRoom);
        }

        let id = RecordingId::new();
        let info = RecordingInfo {
            id,
            owner,
            mime_type,
            is_screen,
            started_at: Utc::now(),
            state: RecordingState::Receiving,
        };
        self.open.insert(
            id,
            OpenRecording {
                info,
                owner_session: session,
                reassembler: Reassembler::new(self.context.max_chunk_bytes),
                chunks: Vec::new(),
            },
        );

        info!(
            target: "rc.upload",
            room_id = %self.room_id,
            recording_id = %id,
            is_screen,
            "Recording started"
        );

        self.publish_recordings();
        Ok(id)
    }

    fn upload_chunk(
        &mut self,
        recording: RecordingId,
        user: UserId,
        chunk: Chunk,
    ) -> Result<Received, RcError> {
        let open = self
            .open
            .get_mut(&recording)
            .ok_or_else(|| RcError::RecordingNotFound(recording.to_string()))?;
        if open.info.owner != user {
            return Err(RcError::NotRecordingOwner);
        }

        let received = match open.reassembler.receive(chunk) {
            Ok(received) => received,
            Err(e) => {
                metrics::record_upload_chunk("rejected");
                return Err(e.into());
            }
        };

        match &received {
            Received::Accepted(chunk) => {
                metrics::record_upload_chunk("accepted");
                open.chunks.push(chunk.data.clone());
                self.context.bus.publish_upload(UploadEvent::ChunkAccepted {
                    recording,
                    index: chunk.index,
                    bytes: chunk.len(),
                });
            }
            Received::Duplicate { index } => {
                metrics::record_upload_chunk("duplicate");
                debug!(
                    target: "rc.upload",
                    recording_id = %recording,
                    index,
                    "Duplicate chunk discarded"
                );
            }
            Received::Gap { request, discarded } => {
                metrics::record_upload_chunk("gap");
                debug!(
                    target: "rc.upload",
                    recording_id = %recording,
                    discarded,
                    start = request.start,
                    stop = request.stop,
                    "Chunk gap, requesting retransmission"
                );
            }
        }

        Ok(received)
    }

    async fn stop_recording(&mut self, recording: RecordingId, user: UserId) -> Result<(), RcError> {
        if let Some(open) = self.open.get(&recording) {
            if open.info.owner != user {
                return Err(RcError::NotRecordingOwner);
            }
            self.finalize(recording, FinalizeReason::Stopped).await;
            return Ok(());
        }

        // Stopping a finished recording is a no-op for its owner.
        match self.finished.iter().find(|info| info.id == recording) {
            Some(info) if info.owner == user => Ok(()),
            Some(_) => Err(RcError::NotRecordingOwner),
            None => Err(RcError::RecordingNotFound(recording.to_string())),
        }
    }

    async fn finalize_all(&mut self, reason: FinalizeReason) {
        let ids: Vec<RecordingId> = self.open.keys().copied().collect();
        for id in ids {
            self.finalize(id, reason).await;
        }
    }

    /// Hand a recording to the archive. No-op if it is not open.
    async fn finalize(&mut self, recording: RecordingId, reason: FinalizeReason) {
        let Some(mut open) = self.open.remove(&recording) else {
            return;
        };
        let summary = open
            .reassembler
            .finish()
            .unwrap_or_else(|| open.reassembler.summary());
        open.info.state = RecordingState::Finished;

        let finished = FinishedRecording {
            info: open.info.clone(),
            room_id: self.room_id,
            owner_session: open.owner_session,
            chunks: open.chunks,
            applied_bytes: summary.applied_bytes,
            missing: summary.missing.clone(),
            reason,
        };

        if let Err(e) = self.context.services.archive.archive(finished).await {
            error!(
                target: "rc.upload",
                room_id = %self.room_id,
                recording_id = %recording,
                error = %e,
                "Failed to archive recording"
            );
        }

        info!(
            target: "rc.upload",
            room_id = %self.room_id,
            recording_id = %recording,
            reason = reason.as_str(),
            applied_chunks = summary.applied_chunks,
            applied_bytes = summary.applied_bytes,
            complete = summary.is_complete(),
            "Recording finalized"
        );

        metrics::record_recording_finalized(reason.as_str());
        self.finished.push(open.info);
        self.context.bus.publish_upload(UploadEvent::Finalized {
            recording,
            reason,
            applied_chunks: summary.applied_chunks,
            applied_bytes: summary.applied_bytes,
            missing: summary.missing,
        });
        self.publish_recordings();
    }

    fn member_list(&self) -> Vec<MemberInfo> {
        self.members.iter().map(|member| member.info.clone()).collect()
    }

    fn recording_list(&self) -> Vec<RecordingInfo> {
        let mut recordings: Vec<RecordingInfo> = self
            .finished
            .iter()
            .cloned()
            .chain(self.open.values().map(|open| open.info.clone()))
            .collect();
        recordings.sort_by_key(|info| info.started_at);
        recordings
    }

    fn publish_users(&self) {
        self.context.bus.publish_room(
            self.room_id,
            RoomEvent::Users {
                members: self.member_list(),
            },
        );
    }

    fn publish_recordings(&self) {
        self.context.bus.publish_room(
            self.room_id,
            RoomEvent::Recordings {
                recordings: self.recording_list(),
            },
        );
    }

    fn state(&self) -> RoomState {
        let mut open_recordings: Vec<RecordingInfo> =
            self.open.values().map(|open| open.info.clone()).collect();
        open_recordings.sort_by_key(|info| info.started_at);

        RoomState {
            room_id: self.room_id,
            members: self.member_list(),
            connected: self
                .members
                .iter()
                .filter(|member| member.connected)
                .map(|member| member.info.id)
                .collect(),
            open_recordings,
            finished_recordings: self.finished.clone(),
        }
    }
}
