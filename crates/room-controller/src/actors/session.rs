//! `SessionActor` - one per client connection.
//!
//! Owns everything tied to a single connection:
//!
//! - the resolved identity (or none, for guests) and the signaling id
//! - the joined room and its weak room-topic subscription
//! - group subscriptions and the bounded set of seen client message ids
//! - which peers it has been told to negotiate with
//!
//! Inbound client events arrive through [`SessionHandle`]. Bus deliveries are
//! forwarded by listeners into a second channel and turned into outbound
//! [`ServerEvent`]s here, so every piece of session state is touched only by
//! this task.
//!
//! # Teardown
//!
//! Close, cancellation and a dropped handle all run the same teardown: leave
//! the room (which finalizes owned recordings), drop every subscription, then
//! tell the controller the session is gone.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use bytes::Bytes;
use chrono::Utc;
use common::types::{GroupId, MessageId, RecordingId, RoomId, SignalId, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};
use upload_protocol::{Chunk, Received};

use super::controller::ControllerHandle;
use super::messages::{SessionMessage, SessionState};
use super::metrics::{ActorType, MailboxMonitor};
use super::room::RoomHandle;
use crate::bus::{
    BusEvent, EventBus, GroupEvent, ListenerError, PeerEvent, RoomEvent, Strength, Subscription,
    Topic,
};
use crate::errors::{ErrorKind, RcError};
use crate::negotiation::is_polite;
use crate::observability::metrics;
use crate::protocol::{
    ClientEvent, GroupNotice, GroupRequest, IceCandidate, MemberInfo, RecordingAction, Reply,
    RoomNotice, RoomRequest, ServerEvent, SessionDescription, UserInfo,
};
use crate::services::{NewMessage, Services};

/// Dependencies shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub bus: EventBus,
    pub services: Services,
    pub controller: ControllerHandle,
    /// Receives the signaling id once teardown has finished.
    pub closed_tx: mpsc::UnboundedSender<SignalId>,
    pub seen_capacity: usize,
    pub mailbox_buffer: usize,
}

/// Handle to a `SessionActor`, held by the transport.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    signal_id: SignalId,
    user: Option<UserInfo>,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// The session's signaling id.
    #[must_use]
    pub fn signal_id(&self) -> SignalId {
        self.signal_id
    }

    /// Identity resolved when the session opened. `None` for guests.
    #[must_use]
    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    /// Push a client event. Failures are reported as outbound error events.
    pub async fn send(&self, event: ClientEvent) -> Result<(), RcError> {
        self.sender
            .send(SessionMessage::Inbound {
                event,
                respond_to: None,
            })
            .await
            .map_err(RcError::channel_send)
    }

    /// Push a client event and wait for the handler result.
    ///
    /// Acknowledged events (`upload_start`, `send`) report failures only
    /// through this result.
    pub async fn request(&self, event: ClientEvent) -> Result<Reply, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Inbound {
                event,
                respond_to: Some(tx),
            })
            .await
            .map_err(RcError::channel_send)?;
        rx.await.map_err(RcError::channel_recv)?
    }

    pub async fn get_state(&self) -> Result<SessionState, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(RcError::channel_send)?;
        rx.await.map_err(RcError::channel_recv)
    }

    /// Close the session. Returns once teardown has finished.
    pub async fn close(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Close { respond_to: tx })
            .await
            .map_err(RcError::channel_send)?;
        rx.await.map_err(RcError::channel_recv)
    }

    /// Cancel the session. Teardown still runs.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Bounded memory of client message ids, oldest evicted first.
#[derive(Debug)]
struct SeenIds {
    capacity: usize,
    order: VecDeque<MessageId>,
    ids: HashSet<MessageId>,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: MessageId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct JoinedRoom {
    id: RoomId,
    handle: RoomHandle,
    _subscription: Subscription,
    /// Ends the room membership when dropped.
    _lease: DropGuard,
}

/// Channel a failed event is reported on.
#[derive(Clone, Copy)]
enum Channel {
    Room,
    Group,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    signal_id: SignalId,
    user: Option<UserInfo>,
    receiver: mpsc::Receiver<SessionMessage>,
    bus_tx: mpsc::UnboundedSender<(Topic, BusEvent)>,
    bus_rx: mpsc::UnboundedReceiver<(Topic, BusEvent)>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    cancel_token: CancellationToken,
    context: SessionContext,
    room: Option<JoinedRoom>,
    /// Whether this session called `connect_to` in its current room
    connected: bool,
    linked_peers: BTreeSet<SignalId>,
    groups: BTreeMap<GroupId, Subscription>,
    recordings: BTreeSet<RecordingId>,
    seen: SeenIds,
    signal_subscription: Option<Subscription>,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a new session actor.
    #[must_use]
    pub fn spawn(
        signal_id: SignalId,
        user: Option<UserInfo>,
        outbound: mpsc::UnboundedSender<ServerEvent>,
        context: SessionContext,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(context.mailbox_buffer.max(1));
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();

        let mut actor = Self {
            signal_id,
            user: user.clone(),
            receiver,
            bus_tx,
            bus_rx,
            outbound,
            cancel_token: cancel_token.clone(),
            seen: SeenIds::new(context.seen_capacity),
            context,
            room: None,
            connected: false,
            linked_peers: BTreeSet::new(),
            groups: BTreeMap::new(),
            recordings: BTreeSet::new(),
            signal_subscription: None,
            mailbox: MailboxMonitor::new(ActorType::Session, signal_id.to_string()),
        };
        // Subscribed before the handle exists so no relayed signal is missed.
        actor.signal_subscription = Some(actor.subscribe(Topic::Signal(signal_id)));

        let task = tokio::spawn(actor.run());

        let handle = SessionHandle {
            signal_id,
            user,
            sender,
            cancel_token,
        };

        (handle, task)
    }

    #[instrument(skip_all, name = "rc.actor.session", fields(signal_id = %self.signal_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            user_id = ?self.user.as_ref().map(|user| user.id),
            "SessionActor started"
        );

        let mut close_ack = None;
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.session",
                        signal_id = %self.signal_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(SessionMessage::Inbound { event, respond_to }) => {
                            self.handle_inbound(event, respond_to).await;
                        }
                        Some(SessionMessage::GetState { respond_to }) => {
                            let _ = respond_to.send(self.state());
                        }
                        Some(SessionMessage::Close { respond_to }) => {
                            close_ack = Some(respond_to);
                            break;
                        }
                        None => break,
                    }
                    self.mailbox.record_processed(self.receiver.len());
                }

                Some((topic, event)) = self.bus_rx.recv() => {
                    self.handle_bus_event(topic, event);
                }
            }
        }

        self.teardown().await;
        if let Some(ack) = close_ack {
            let _ = ack.send(());
        }
    }

    /// Subscribe weakly to `topic`, forwarding every event into this actor.
    fn subscribe(&self, topic: Topic) -> Subscription {
        let subscription = self.context.bus.subscribe(topic, Strength::Weak);
        let forward = self.bus_tx.clone();
        let own = self.signal_id;
        subscription.on_any(move |event| {
            if event.origin() == Some(own) {
                return Ok(());
            }
            // A closed receiver means the session is tearing down.
            let _ = forward.send((topic, event.clone()));
            Ok::<(), ListenerError>(())
        });
        subscription
    }

    fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event).is_err() {
            debug!(
                target: "rc.actor.session",
                signal_id = %self.signal_id,
                "Outbound channel closed, dropping event"
            );
        }
    }

    fn emit_room(&self, notice: RoomNotice) {
        self.emit(ServerEvent::Room(notice));
    }

    fn emit_group(&self, notice: GroupNotice) {
        self.emit(ServerEvent::Group(notice));
    }

    async fn handle_inbound(
        &mut self,
        event: ClientEvent,
        respond_to: Option<oneshot::Sender<Result<Reply, RcError>>>,
    ) {
        let name = event.name();
        let acknowledged = event.is_acknowledged() && respond_to.is_some();
        let channel = match event {
            ClientEvent::Room(_) => Channel::Room,
            ClientEvent::Group(_) => Channel::Group,
        };

        let cancel = self.cancel_token.clone();
        let result = tokio::select! {
            () = cancel.cancelled() => Err(RcError::Cancelled),
            result = self.dispatch(event) => result,
        };

        if let Err(e) = &result {
            self.report_failure(name, channel, e, !acknowledged);
        }
        if let Some(tx) = respond_to {
            let _ = tx.send(result);
        }
    }

    fn report_failure(&self, event: &'static str, channel: Channel, err: &RcError, emit: bool) {
        let kind = err.kind();
        metrics::record_handler_error(kind.as_str());
        match kind {
            ErrorKind::Cancelled => {
                debug!(
                    target: "rc.actor.session",
                    signal_id = %self.signal_id,
                    event,
                    "Handler cancelled"
                );
                return;
            }
            ErrorKind::User => debug!(
                target: "rc.actor.session",
                signal_id = %self.signal_id,
                event,
                error = %err,
                "Request rejected"
            ),
            ErrorKind::Internal => error!(
                target: "rc.actor.session",
                signal_id = %self.signal_id,
                event,
                error = %err,
                "Handler failed"
            ),
        }

        if !emit {
            return;
        }
        let message = err.client_message();
        match channel {
            Channel::Room => self.emit_room(RoomNotice::Error {
                message,
                cause_event: Some(event.to_string()),
            }),
            Channel::Group => self.emit_group(GroupNotice::Error {
                cause_event: event.to_string(),
                message,
            }),
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<Reply, RcError> {
        match event {
            ClientEvent::Room(request) => self.handle_room(request).await,
            ClientEvent::Group(request) => self.handle_group(request).await,
        }
    }

    // ------------------------------------------------------------------
    // Room channel
    // ------------------------------------------------------------------

    async fn handle_room(&mut self, request: RoomRequest) -> Result<Reply, RcError> {
        match request {
            RoomRequest::JoinRoom { id } => self.join_room(&id).await,
            RoomRequest::LeaveRoom => self.leave_room().await,
            RoomRequest::ConnectTo => self.connect_to().await,
            RoomRequest::DisconnectFrom => self.disconnect_from().await,
            RoomRequest::Recording { action } => self.toggle_recording(action),
            RoomRequest::ScreenShare { stream_id } => self.screen_share(stream_id),
            RoomRequest::Signal {
                to,
                desc,
                candidate,
            } => self.signal(&to, desc, candidate),
            RoomRequest::UploadStart {
                mime_type,
                is_screen,
            } => self.upload_start(mime_type, is_screen).await,
            RoomRequest::UploadChunk { id, index, data } => {
                self.upload_chunk(&id, index, data).await
            }
            RoomRequest::UploadStop { id } => self.upload_stop(&id).await,
        }
    }

    fn joined(&self) -> Result<&JoinedRoom, RcError> {
        self.room.as_ref().ok_or(RcError::NotInRoom)
    }

    fn identity(&self) -> Result<&UserInfo, RcError> {
        self.user.as_ref().ok_or(RcError::AuthenticationRequired)
    }

    async fn join_room(&mut self, id: &str) -> Result<Reply, RcError> {
        let room_id: RoomId = id
            .parse()
            .map_err(|_| RcError::RoomNotFound(id.to_string()))?;
        if self
            .context
            .services
            .store
            .get_room(room_id)
            .await?
            .is_none()
        {
            return Err(RcError::RoomNotFound(id.to_string()));
        }

        if self.room.is_some() {
            self.leave_current().await?;
        }

        // Subscribe first so the room's own membership broadcast arrives.
        let subscription = self.subscribe(Topic::Room(room_id));
        let member = MemberInfo {
            id: self.signal_id,
            user: self.user.clone(),
        };
        // If this future is dropped mid-join the guard cancels the lease and
        // the room drops the member on its own.
        let lease = CancellationToken::new();
        let lease_guard = lease.clone().drop_guard();
        let handle = self
            .context
            .controller
            .join_room(room_id, member, lease)
            .await?;

        info!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            room_id = %room_id,
            "Joined room"
        );
        self.room = Some(JoinedRoom {
            id: room_id,
            handle,
            _subscription: subscription,
            _lease: lease_guard,
        });
        Ok(Reply::Done)
    }

    async fn leave_room(&mut self) -> Result<Reply, RcError> {
        if self.room.is_none() {
            return Err(RcError::NotInRoom);
        }
        self.leave_current().await?;
        Ok(Reply::Done)
    }

    /// Leave the joined room. Local state is only cleared once the room has
    /// applied the leave, so an interrupted leave is retried by teardown.
    async fn leave_current(&mut self) -> Result<(), RcError> {
        let Some(joined) = self.room.as_ref() else {
            return Ok(());
        };
        let room_id = joined.id;
        let handle = joined.handle.clone();

        let result = match handle.leave(self.signal_id).await {
            Err(RcError::NotInRoom) => Ok(()),
            other => other,
        };

        self.room = None;
        self.connected = false;
        self.linked_peers.clear();
        self.recordings.clear();

        info!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            room_id = %room_id,
            "Left room"
        );
        result
    }

    async fn connect_to(&mut self) -> Result<Reply, RcError> {
        let handle = self.joined()?.handle.clone();
        let peers = handle.connect_to(self.signal_id).await?;
        self.connected = true;
        for peer in peers {
            self.link_peer(peer);
        }
        Ok(Reply::Done)
    }

    async fn disconnect_from(&mut self) -> Result<Reply, RcError> {
        let handle = self.joined()?.handle.clone();
        handle.disconnect_from(self.signal_id).await?;
        self.connected = false;
        self.linked_peers.clear();
        Ok(Reply::Done)
    }

    /// Tell the client to negotiate with `peer`, once per pairing.
    fn link_peer(&mut self, peer: SignalId) {
        if peer == self.signal_id || !self.linked_peers.insert(peer) {
            return;
        }
        let polite = is_polite(self.signal_id, peer);
        debug!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            peer = %peer,
            polite,
            "Peer linked"
        );
        self.emit_room(RoomNotice::ConnectTo { id: peer, polite });
    }

    fn toggle_recording(&self, action: RecordingAction) -> Result<Reply, RcError> {
        let room_id = self.joined()?.id;
        self.context.bus.publish_room(
            room_id,
            RoomEvent::Recording {
                origin: self.signal_id,
                action,
            },
        );
        Ok(Reply::Done)
    }

    fn screen_share(&self, stream_id: Option<String>) -> Result<Reply, RcError> {
        let room_id = self.joined()?.id;
        self.context.bus.publish_room(
            room_id,
            RoomEvent::ScreenShare {
                origin: self.signal_id,
                stream_id,
            },
        );
        Ok(Reply::Done)
    }

    fn signal(
        &self,
        to: &str,
        desc: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    ) -> Result<Reply, RcError> {
        let target: SignalId = to
            .parse()
            .map_err(|_| RcError::UnknownTarget(to.to_string()))?;
        if desc.is_none() && candidate.is_none() {
            return Err(RcError::InvalidRequest(
                "signal carries neither desc nor candidate".to_string(),
            ));
        }
        self.context.bus.send_peer(
            target,
            PeerEvent::Signal {
                from: self.signal_id,
                desc,
                candidate,
            },
        );
        Ok(Reply::Done)
    }

    async fn upload_start(&mut self, mime_type: String, is_screen: bool) -> Result<Reply, RcError> {
        let owner = self.identity()?.id;
        let handle = self.joined()?.handle.clone();
        if mime_type.trim().is_empty() {
            return Err(RcError::InvalidRequest("mime_type is empty".to_string()));
        }

        let id = handle
            .start_recording(self.signal_id, owner, mime_type, is_screen)
            .await?;
        self.recordings.insert(id);
        Ok(Reply::UploadStarted { id })
    }

    fn recording_target(&self, id: &str) -> Result<(RecordingId, UserId, RoomHandle), RcError> {
        let recording: RecordingId = id
            .parse()
            .map_err(|_| RcError::RecordingNotFound(id.to_string()))?;
        let user = self.identity()?.id;
        let handle = self.joined()?.handle.clone();
        Ok((recording, user, handle))
    }

    async fn upload_chunk(&mut self, id: &str, index: u64, data: Bytes) -> Result<Reply, RcError> {
        let (recording, user, handle) = self.recording_target(id)?;
        let received = handle
            .upload_chunk(recording, user, Chunk::new(index, data))
            .await?;

        if let Received::Gap { request, .. } = received {
            self.emit_room(RoomNotice::RequestUploadChunk {
                id: recording,
                start: request.start,
                stop: request.stop,
            });
        }
        Ok(Reply::Done)
    }

    async fn upload_stop(&mut self, id: &str) -> Result<Reply, RcError> {
        let (recording, user, handle) = self.recording_target(id)?;
        handle.stop_recording(recording, user).await?;
        self.recordings.remove(&recording);
        Ok(Reply::Done)
    }

    // ------------------------------------------------------------------
    // Group channel
    // ------------------------------------------------------------------

    async fn handle_group(&mut self, request: GroupRequest) -> Result<Reply, RcError> {
        // Guests have no group access.
        self.identity()?;

        match request {
            GroupRequest::Subscribe { group_id } => self.subscribe_group(&group_id).await,
            GroupRequest::Unsubscribe { group_id } => self.unsubscribe_group(&group_id),
            GroupRequest::RequestMessages { group_id } => {
                self.request_messages(group_id.as_deref()).await
            }
            GroupRequest::RequestUsers { ids } => self.request_users(&ids).await,
            GroupRequest::Send {
                group_id,
                content,
                msg_id,
            } => self.send_message(&group_id, content, msg_id).await,
            GroupRequest::SetName { name } => self.set_name(name).await,
        }
    }

    fn subscribed_group(&self, id: &str) -> Result<GroupId, RcError> {
        let group: GroupId = id
            .parse()
            .map_err(|_| RcError::GroupNotFound(id.to_string()))?;
        if self.groups.contains_key(&group) {
            Ok(group)
        } else {
            Err(RcError::NotInGroup(id.to_string()))
        }
    }

    async fn subscribe_group(&mut self, id: &str) -> Result<Reply, RcError> {
        let group: GroupId = id
            .parse()
            .map_err(|_| RcError::GroupNotFound(id.to_string()))?;
        if self
            .context
            .services
            .store
            .get_group(group)
            .await?
            .is_none()
        {
            return Err(RcError::GroupNotFound(id.to_string()));
        }

        if self.groups.contains_key(&group) {
            return Ok(Reply::Done);
        }
        let subscription = self.subscribe(Topic::Group(group));
        self.groups.insert(group, subscription);

        let user = self.identity()?.clone();
        self.context
            .bus
            .publish_group(group, GroupEvent::Users { users: vec![user] });
        debug!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            group_id = %group,
            "Subscribed to group"
        );
        Ok(Reply::Done)
    }

    fn unsubscribe_group(&mut self, id: &str) -> Result<Reply, RcError> {
        let group = self.subscribed_group(id)?;
        self.groups.remove(&group);
        Ok(Reply::Done)
    }

    async fn request_messages(&mut self, id: Option<&str>) -> Result<Reply, RcError> {
        let groups: Vec<GroupId> = match id {
            Some(id) => vec![self.subscribed_group(id)?],
            None => self.groups.keys().copied().collect(),
        };

        let mut messages = Vec::new();
        for group in groups {
            messages.extend(self.context.services.store.list_messages(group).await?);
        }
        self.emit_group(GroupNotice::Messages {
            messages,
            historical: true,
        });
        Ok(Reply::Done)
    }

    async fn request_users(&mut self, ids: &[String]) -> Result<Reply, RcError> {
        let ids = ids
            .iter()
            .map(|id| {
                id.parse::<UserId>()
                    .map_err(|_| RcError::InvalidRequest(format!("malformed user id: {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let users = self.context.services.store.get_users(&ids).await?;
        self.emit_group(GroupNotice::Users { users });
        Ok(Reply::Done)
    }

    async fn send_message(
        &mut self,
        group_id: &str,
        content: String,
        client_id: MessageId,
    ) -> Result<Reply, RcError> {
        let group = self.subscribed_group(group_id)?;
        if self.seen.contains(&client_id) {
            debug!(
                target: "rc.actor.session",
                signal_id = %self.signal_id,
                group_id = %group,
                "Duplicate message id, acknowledging without resending"
            );
            return Ok(Reply::Done);
        }

        let author = self.identity()?.id;
        let message = self
            .context
            .services
            .store
            .create_message(NewMessage {
                group_id: group,
                author,
                content,
                client_id: client_id.clone(),
                sent_at: Utc::now(),
            })
            .await?;
        self.seen.insert(client_id);

        self.context.bus.publish_group(
            group,
            GroupEvent::Messages {
                messages: vec![message],
            },
        );
        Ok(Reply::Done)
    }

    async fn set_name(&mut self, name: String) -> Result<Reply, RcError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(RcError::InvalidRequest("name is empty".to_string()));
        }
        let id = self.identity()?.id;
        let user = self.context.services.store.set_user_name(id, name).await?;
        self.user = Some(user.clone());

        for group in self.groups.keys() {
            self.context.bus.publish_group(
                *group,
                GroupEvent::Users {
                    users: vec![user.clone()],
                },
            );
        }
        Ok(Reply::Done)
    }

    // ------------------------------------------------------------------
    // Bus deliveries
    // ------------------------------------------------------------------

    fn handle_bus_event(&mut self, topic: Topic, event: BusEvent) {
        match (topic, event) {
            (Topic::Room(room_id), BusEvent::Room(event)) => {
                if self.room.as_ref().map(|joined| joined.id) == Some(room_id) {
                    self.handle_room_event(event);
                }
            }
            (
                Topic::Signal(_),
                BusEvent::Peer(PeerEvent::Signal {
                    from,
                    desc,
                    candidate,
                }),
            ) => self.emit_room(RoomNotice::Signal {
                from,
                desc,
                candidate,
            }),
            (Topic::Group(group), BusEvent::Group(event)) => {
                if !self.groups.contains_key(&group) {
                    return;
                }
                match event {
                    GroupEvent::Messages { messages } => self.emit_group(GroupNotice::Messages {
                        messages,
                        historical: false,
                    }),
                    GroupEvent::Users { users } => self.emit_group(GroupNotice::Users { users }),
                }
            }
            (topic, event) => {
                warn!(
                    target: "rc.actor.session",
                    signal_id = %self.signal_id,
                    topic = %topic,
                    event = event.name(),
                    "Unexpected bus delivery"
                );
            }
        }
    }

    fn handle_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Users { members } => self.emit_room(RoomNotice::Users { users: members }),
            RoomEvent::Recordings { recordings } => {
                self.emit_room(RoomNotice::Recordings { recordings });
            }
            RoomEvent::Connected { origin } => {
                if self.connected {
                    self.link_peer(origin);
                }
            }
            RoomEvent::Disconnected { origin } => {
                if self.linked_peers.remove(&origin) {
                    self.emit_room(RoomNotice::DisconnectFrom { id: origin });
                }
            }
            RoomEvent::Recording { origin, action } => {
                self.emit_room(RoomNotice::Recording {
                    action,
                    from: origin,
                });
            }
            RoomEvent::ScreenShare { origin, stream_id } => {
                self.emit_room(RoomNotice::ScreenShare {
                    user: origin,
                    stream_id,
                });
            }
        }
    }

    fn state(&self) -> SessionState {
        SessionState {
            signal_id: self.signal_id,
            user: self.user.clone(),
            room_id: self.room.as_ref().map(|joined| joined.id),
            connected: self.connected,
            linked_peers: self.linked_peers.iter().copied().collect(),
            groups: self.groups.keys().copied().collect(),
            open_recordings: self.recordings.iter().copied().collect(),
        }
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.leave_current().await {
            warn!(
                target: "rc.actor.session",
                signal_id = %self.signal_id,
                error = %e,
                "Room leave failed during teardown"
            );
        }
        self.groups.clear();
        self.signal_subscription = None;
        self.bus_rx.close();

        let _ = self.context.closed_tx.send(self.signal_id);
        info!(
            target: "rc.actor.session",
            signal_id = %self.signal_id,
            messages_processed = self.mailbox.messages_processed(),
            seen_message_ids = self.seen.len(),
            "SessionActor stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_ids_evicts_oldest() {
        let mut seen = SeenIds::new(2);
        seen.insert(MessageId::from("a"));
        seen.insert(MessageId::from("b"));
        seen.insert(MessageId::from("c"));

        assert!(!seen.contains(&MessageId::from("a")));
        assert!(seen.contains(&MessageId::from("b")));
        assert!(seen.contains(&MessageId::from("c")));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_seen_ids_reinsert_does_not_refresh() {
        let mut seen = SeenIds::new(2);
        seen.insert(MessageId::from("a"));
        seen.insert(MessageId::from("a"));
        seen.insert(MessageId::from("b"));
        assert_eq!(seen.len(), 2);

        seen.insert(MessageId::from("c"));
        assert!(!seen.contains(&MessageId::from("a")));
    }

    #[test]
    fn test_seen_ids_zero_capacity_keeps_one() {
        let mut seen = SeenIds::new(0);
        seen.insert(MessageId::from("a"));
        assert!(seen.contains(&MessageId::from("a")));
    }
}
