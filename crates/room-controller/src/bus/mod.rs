//! Topic-keyed publish/subscribe with deferred fan-out.
//!
//! [`EventBus::publish`] only enqueues. A dispatcher task owned by the bus
//! drains the queue and invokes listeners, so delivery always happens after
//! the publisher has yielded and never runs on the publisher's stack.
//!
//! Listeners are plain synchronous callbacks. Actors register listeners that
//! forward into their own mailbox; nothing heavier belongs inside one.
//!
//! # Subscription lifetimes
//!
//! - [`Strength::Weak`]: detached when the [`Subscription`] handle is dropped.
//!   Sessions hold these and release them on every teardown path.
//! - [`Strength::Strong`]: survives its handle; removed only by
//!   [`EventBus::unsubscribe`]. Used by process-wide consumers.
//!
//! A topic exists while it has at least one subscription.

pub mod events;
pub mod topic;

pub use events::{BusEvent, GroupEvent, PeerEvent, RoomEvent, UploadEvent};
pub use topic::{Topic, TopicKind};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::types::{GroupId, RoomId, SignalId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::observability::metrics;

/// Callback invoked by the dispatcher.
pub type Listener = Arc<dyn Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Failure reported by a listener. Logged and counted, never propagated.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// Payload family does not belong on this topic.
    #[error("{event} cannot be published on a {topic} topic")]
    TopicMismatch {
        event: &'static str,
        topic: &'static str,
    },

    /// Dispatcher has stopped.
    #[error("Event bus is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    /// `None` matches every event on the topic.
    event: Option<&'static str>,
    callback: Listener,
}

struct SubscriptionEntry {
    listeners: Vec<ListenerEntry>,
}

#[derive(Default)]
struct BusState {
    /// Subscription ids are allocated increasing, so map order is insertion order.
    topics: HashMap<Topic, BTreeMap<SubscriptionId, SubscriptionEntry>>,
    next_subscription: u64,
    next_listener: u64,
}

enum Dispatch {
    Event { topic: Topic, event: BusEvent },
    Flush(oneshot::Sender<()>),
}

/// Counters kept by the bus itself.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    listener_failures: AtomicU64,
}

impl BusStats {
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Successful listener invocations.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Listener invocations that returned an error or panicked.
    #[must_use]
    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    sender: mpsc::UnboundedSender<Dispatch>,
    stats: Arc<BusStats>,
}

impl EventBus {
    /// Start the dispatcher and return a handle to the bus.
    ///
    /// The dispatcher stops when `cancel_token` fires; later publishes fail
    /// with [`BusError::Stopped`].
    #[must_use]
    pub fn spawn(cancel_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(BusState::default()));
        let stats = Arc::new(BusStats::default());

        let dispatcher = Dispatcher {
            state: Arc::clone(&state),
            receiver,
            stats: Arc::clone(&stats),
            cancel_token,
        };
        let task = tokio::spawn(dispatcher.run());

        (
            Self {
                state,
                sender,
                stats,
            },
            task,
        )
    }

    /// Attach a new subscription to `topic`, creating the topic if needed.
    #[must_use]
    pub fn subscribe(&self, topic: Topic, strength: Strength) -> Subscription {
        let mut state = lock(&self.state);
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.topics.entry(topic).or_default().insert(
            id,
            SubscriptionEntry {
                listeners: Vec::new(),
            },
        );
        drop(state);

        debug!(target: "rc.bus", topic = %topic, ?strength, "Subscribed");

        Subscription {
            bus: self.clone(),
            topic,
            id,
            strength,
            detached: false,
        }
    }

    /// Remove a subscription. The topic is dropped with its last subscription.
    ///
    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut state = lock(&self.state);
        let Some(subscriptions) = state.topics.get_mut(&topic) else {
            return false;
        };
        let removed = subscriptions.remove(&id).is_some();
        if subscriptions.is_empty() {
            state.topics.remove(&topic);
        }
        removed
    }

    fn add_listener(
        &self,
        topic: Topic,
        subscription: SubscriptionId,
        event: Option<&'static str>,
        callback: Listener,
    ) -> ListenerId {
        let mut state = lock(&self.state);
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        if let Some(entry) = state
            .topics
            .get_mut(&topic)
            .and_then(|subscriptions| subscriptions.get_mut(&subscription))
        {
            entry.listeners.push(ListenerEntry {
                id,
                event,
                callback,
            });
        }
        id
    }

    fn remove_listener(&self, topic: Topic, subscription: SubscriptionId, id: ListenerId) -> bool {
        let mut state = lock(&self.state);
        let Some(entry) = state
            .topics
            .get_mut(&topic)
            .and_then(|subscriptions| subscriptions.get_mut(&subscription))
        else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|listener| listener.id != id);
        entry.listeners.len() != before
    }

    /// Schedule `event` for delivery to the subscribers of `topic`.
    ///
    /// Returns before any listener runs. Publishing to a topic nobody
    /// subscribes to is a no-op.
    pub fn publish(&self, topic: Topic, event: BusEvent) -> Result<(), BusError> {
        let kind = topic.kind();
        if event.topic_kind() != kind {
            return Err(BusError::TopicMismatch {
                event: event.name(),
                topic: kind.as_str(),
            });
        }

        self.sender
            .send(Dispatch::Event { topic, event })
            .map_err(|_| BusError::Stopped)?;

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_bus_event_published(kind.as_str());
        Ok(())
    }

    fn publish_typed(&self, topic: Topic, event: BusEvent) {
        if let Err(e) = self.publish(topic, event) {
            debug!(target: "rc.bus", topic = %topic, error = %e, "Event dropped");
        }
    }

    /// Broadcast to a room's members.
    pub fn publish_room(&self, room: RoomId, event: RoomEvent) {
        self.publish_typed(Topic::Room(room), BusEvent::Room(event));
    }

    /// Relay to one session.
    pub fn send_peer(&self, to: SignalId, event: PeerEvent) {
        self.publish_typed(Topic::Signal(to), BusEvent::Peer(event));
    }

    /// Broadcast to a group's subscribers.
    pub fn publish_group(&self, group: GroupId, event: GroupEvent) {
        self.publish_typed(Topic::Group(group), BusEvent::Group(event));
    }

    pub fn publish_upload(&self, event: UploadEvent) {
        self.publish_typed(Topic::Upload, BusEvent::Upload(event));
    }

    /// Wait until every event published before this call has been delivered.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Dispatch::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        lock(&self.state).topics.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        lock(&self.state).topics.get(&topic).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

/// A subscription to one topic.
///
/// Weak subscriptions detach when this handle drops.
pub struct Subscription {
    bus: EventBus,
    topic: Topic,
    id: SubscriptionId,
    strength: Strength,
    detached: bool,
}

impl Subscription {
    /// Register `callback` for events named `event`.
    pub fn on<F>(&self, event: &'static str, callback: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.bus
            .add_listener(self.topic, self.id, Some(event), Arc::new(callback))
    }

    /// Register `callback` for every event on the topic.
    pub fn on_any<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.bus
            .add_listener(self.topic, self.id, None, Arc::new(callback))
    }

    pub fn off(&self, listener: ListenerId) -> bool {
        self.bus.remove_listener(self.topic, self.id, listener)
    }

    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn strength(&self) -> Strength {
        self.strength
    }

    /// Detach now, regardless of strength.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.bus.unsubscribe(self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.strength == Strength::Weak {
            self.detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("strength", &self.strength)
            .finish_non_exhaustive()
    }
}

struct Dispatcher {
    state: Arc<Mutex<BusState>>,
    receiver: mpsc::UnboundedReceiver<Dispatch>,
    stats: Arc<BusStats>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    #[instrument(skip_all, name = "rc.bus.dispatch")]
    async fn run(mut self) {
        debug!(target: "rc.bus", "Event bus dispatcher started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                next = self.receiver.recv() => {
                    match next {
                        Some(Dispatch::Event { topic, event }) => self.deliver(topic, &event),
                        Some(Dispatch::Flush(done)) => {
                            let _ = done.send(());
                        }
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "rc.bus",
            published = self.stats.published(),
            delivered = self.stats.delivered(),
            listener_failures = self.stats.listener_failures(),
            "Event bus dispatcher stopped"
        );
    }

    fn deliver(&self, topic: Topic, event: &BusEvent) {
        let name = event.name();

        // Snapshot so listeners may (un)subscribe without holding the lock.
        let listeners: Vec<Listener> = {
            let state = lock(&self.state);
            state
                .topics
                .get(&topic)
                .map(|subscriptions| {
                    subscriptions
                        .values()
                        .flat_map(|entry| entry.listeners.iter())
                        .filter(|listener| listener.event.is_none() || listener.event == Some(name))
                        .map(|listener| Arc::clone(&listener.callback))
                        .collect()
                })
                .unwrap_or_default()
        };

        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_bus_listener_failure();
                    warn!(
                        target: "rc.bus",
                        topic = %topic,
                        event = name,
                        error = %e,
                        "Listener failed"
                    );
                }
                Err(_) => {
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_bus_listener_failure();
                    warn!(
                        target: "rc.bus",
                        topic = %topic,
                        event = name,
                        "Listener panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&BusEvent) -> Result<(), ListenerError>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_: &BusEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn connected() -> RoomEvent {
        RoomEvent::Connected {
            origin: SignalId::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_is_deferred() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room = RoomId::new();
        let subscription = bus.subscribe(Topic::Room(room), Strength::Weak);
        let (count, listener) = counter();
        subscription.on_any(listener);

        bus.publish_room(room, connected());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        let sub_b = bus.subscribe(Topic::Room(room_b), Strength::Weak);
        let (count_b, listener) = counter();
        sub_b.on_any(listener);

        bus.publish_room(room_a, connected());
        bus.flush().await;
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_siblings() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room = RoomId::new();
        let subscription = bus.subscribe(Topic::Room(room), Strength::Weak);

        subscription.on("connected", |_| Err(ListenerError("boom".to_string())));
        subscription.on("connected", |_| panic!("listener bug"));
        let (count, listener) = counter();
        subscription.on("connected", listener);

        bus.publish_room(room, connected());
        bus.flush().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().listener_failures(), 2);
        assert_eq!(bus.stats().delivered(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        bus.publish(Topic::Upload, BusEvent::Upload(UploadEvent::ChunkAccepted {
            recording: common::types::RecordingId::new(),
            index: 0,
            bytes: 4,
        }))
        .unwrap();
        bus.flush().await;
        assert_eq!(bus.topic_count(), 0);
        assert_eq!(bus.stats().listener_failures(), 0);
    }

    #[tokio::test]
    async fn test_listeners_filter_by_event_name() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room = RoomId::new();
        let subscription = bus.subscribe(Topic::Room(room), Strength::Weak);
        let (count, listener) = counter();
        subscription.on("screen_share", listener);

        bus.publish_room(room, connected());
        bus.publish_room(
            room,
            RoomEvent::ScreenShare {
                origin: SignalId::new(),
                stream_id: Some("s1".to_string()),
            },
        );
        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_off_removes_listener() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room = RoomId::new();
        let subscription = bus.subscribe(Topic::Room(room), Strength::Weak);
        let (count, listener) = counter();
        let id = subscription.on_any(listener);

        assert!(subscription.off(id));
        assert!(!subscription.off(id));

        bus.publish_room(room, connected());
        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delivery_follows_subscription_order() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let group = GroupId::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subscriptions = Vec::new();
        for n in 0..4 {
            let subscription = bus.subscribe(Topic::Group(group), Strength::Weak);
            let order = Arc::clone(&order);
            subscription.on_any(move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
            subscriptions.push(subscription);
        }

        bus.publish_group(group, GroupEvent::Users { users: Vec::new() });
        bus.flush().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_weak_subscription_detaches_on_drop() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let topic = Topic::Signal(SignalId::new());

        let first = bus.subscribe(topic, Strength::Weak);
        let second = bus.subscribe(topic, Strength::Weak);
        assert_eq!(bus.subscriber_count(topic), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(topic), 1);

        second.unsubscribe();
        assert_eq!(bus.subscriber_count(topic), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_strong_subscription_outlives_handle() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let subscription = bus.subscribe(Topic::Upload, Strength::Strong);
        let (count, listener) = counter();
        subscription.on_any(listener);
        let id = subscription.id();
        drop(subscription);

        bus.publish_upload(UploadEvent::ChunkAccepted {
            recording: common::types::RecordingId::new(),
            index: 0,
            bytes: 1,
        });
        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(Topic::Upload, id));
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_topic_mismatch_is_rejected() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let err = bus
            .publish(
                Topic::Group(GroupId::new()),
                BusEvent::Room(connected()),
            )
            .unwrap_err();
        assert_eq!(
            err,
            BusError::TopicMismatch {
                event: "connected",
                topic: "group"
            }
        );
    }

    #[tokio::test]
    async fn test_publish_after_stop_fails() {
        let cancel = CancellationToken::new();
        let (bus, task) = EventBus::spawn(cancel.clone());
        cancel.cancel();
        task.await.unwrap();

        let err = bus
            .publish(Topic::Room(RoomId::new()), BusEvent::Room(connected()))
            .unwrap_err();
        assert_eq!(err, BusError::Stopped);

        // Must not hang once the dispatcher is gone.
        bus.flush().await;
    }

    #[tokio::test]
    async fn test_listener_may_subscribe_during_delivery() {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let room = RoomId::new();
        let subscription = bus.subscribe(Topic::Room(room), Strength::Weak);
        let inner_bus = bus.clone();
        let late = Arc::new(Mutex::new(Vec::new()));
        let late_handles = Arc::clone(&late);
        subscription.on_any(move |_| {
            let sub = inner_bus.subscribe(Topic::Upload, Strength::Weak);
            late_handles.lock().unwrap().push(sub);
            Ok(())
        });

        bus.publish_room(room, connected());
        bus.flush().await;
        assert_eq!(bus.subscriber_count(Topic::Upload), 1);
        late.lock().unwrap().clear();
        assert_eq!(bus.subscriber_count(Topic::Upload), 0);
    }
}
