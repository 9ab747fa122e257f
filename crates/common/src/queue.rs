//! Async-aware FIFO queue.
//!
//! `AsyncQueue` is the ordering primitive the rest of Huddle leans on: values
//! are pushed without ever blocking, popped either immediately or by
//! suspending until a value arrives, and can be re-inserted at the front to
//! jump ahead of everything already buffered.
//!
//! Values are handed to suspended poppers in the order the poppers started
//! waiting. A pending pop driven by a [`CancellationToken`] settles exactly
//! once and removes its waiter entry whichever way it settles, including when
//! the pop future is simply dropped.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Smallest backing store allocated once the buffer is first written.
const MIN_CAPACITY: usize = 8;

/// Why an async pop ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The cancellation token fired before a value arrived
    #[error("queue wait cancelled")]
    Cancelled,

    /// The queue was closed while empty
    #[error("queue closed")]
    Closed,
}

/// Growable ring buffer backing the queue.
///
/// Grows to `max(2 * capacity, required)` on overflow, copying unread entries
/// in logical order so the head always restarts at slot zero.
pub(crate) struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        let capacity = self.capacity();
        if required <= capacity {
            return;
        }

        let new_capacity = (capacity * 2).max(required).max(MIN_CAPACITY);
        let mut slots = Vec::with_capacity(new_capacity);
        for offset in 0..self.len {
            let index = (self.head + offset) % capacity;
            slots.push(self.slots.get_mut(index).and_then(Option::take));
        }
        slots.resize_with(new_capacity, || None);

        self.slots = slots;
        self.head = 0;
    }

    pub(crate) fn push_back(&mut self, value: T) {
        self.reserve(1);
        let index = (self.head + self.len) % self.capacity();
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value);
            self.len += 1;
        }
    }

    pub(crate) fn push_front(&mut self, value: T) {
        self.reserve(1);
        let capacity = self.capacity();
        let index = (self.head + capacity - 1) % capacity;
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value);
            self.head = index;
            self.len += 1;
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots.get_mut(self.head).and_then(Option::take);
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(value) = self.pop_front() {
            out.push(value);
        }
        self.head = 0;
        out
    }
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<T>,
}

struct Inner<T> {
    buffer: RingBuffer<T>,
    waiters: VecDeque<Waiter<T>>,
    next_waiter_id: u64,
    closed: bool,
}

impl<T> Inner<T> {
    /// Hand `value` to the oldest live waiter, or give it back.
    fn hand_to_waiter(&mut self, mut value: T) -> Option<T> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(value) {
                Ok(()) => return None,
                Err(returned) => value = returned,
            }
        }
        Some(value)
    }

    /// Feed waiters first, buffer the remainder. Returns how many waiters
    /// were resolved.
    fn deliver(&mut self, values: Vec<T>, front: bool) -> usize {
        let mut woken = 0;
        let mut rest = Vec::new();
        for value in values {
            if !rest.is_empty() {
                rest.push(value);
                continue;
            }
            match self.hand_to_waiter(value) {
                None => woken += 1,
                Some(value) => rest.push(value),
            }
        }

        self.buffer.reserve(rest.len());
        if front {
            for value in rest.into_iter().rev() {
                self.buffer.push_front(value);
            }
        } else {
            for value in rest {
                self.buffer.push_back(value);
            }
        }
        woken
    }
}

/// Options for [`AsyncQueue::consume`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Number of concurrent pull/handle loops. One keeps strict order.
    pub workers: usize,
    /// Stops every worker when fired.
    pub cancel_token: Option<CancellationToken>,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            cancel_token: None,
        }
    }
}

/// Unbounded FIFO with blocking consumption and front re-insertion.
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("AsyncQueue")
            .field("len", &inner.buffer.len())
            .field("waiters", &inner.waiters.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> AsyncQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: RingBuffer::new(),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append values in order. Pending poppers are served first, oldest first.
    ///
    /// Returns the number of pending poppers resolved by this call.
    pub fn push<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        self.lock().deliver(values, false)
    }

    /// Insert values ahead of everything buffered, keeping their given order.
    pub fn push_front<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        self.lock().deliver(values, true)
    }

    /// Take the head value without waiting.
    pub fn pop(&self) -> Option<T> {
        self.lock().buffer.pop_front()
    }

    /// Take the head value, suspending until one is pushed.
    ///
    /// # Errors
    ///
    /// `QueueError::Cancelled` if `cancel` fires first (or had already fired),
    /// `QueueError::Closed` if the queue is closed while empty.
    pub async fn async_pop(&self, cancel: Option<&CancellationToken>) -> Result<T, QueueError> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(QueueError::Cancelled);
        }

        let (id, rx) = {
            let mut inner = self.lock();
            if let Some(value) = inner.buffer.pop_front() {
                return Ok(value);
            }
            if inner.closed {
                return Err(QueueError::Closed);
            }
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        let mut pending = PendingPop {
            queue: self,
            id,
            rx,
            settled: false,
        };

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    received = &mut pending.rx => received.map_err(|_| QueueError::Closed),
                    () = token.cancelled() => Err(QueueError::Cancelled),
                }
            }
            None => (&mut pending.rx).await.map_err(|_| QueueError::Closed),
        };

        if outcome.is_ok() {
            pending.settled = true;
        }
        outcome
    }

    /// Number of buffered values
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Whether no values are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of suspended `async_pop` calls
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Drop every buffered value, returning them in queue order.
    pub fn clear(&self) -> Vec<T> {
        self.lock().buffer.drain()
    }

    /// Close the queue. Suspended poppers fail with `Closed`; buffered values
    /// remain poppable and later pushes are still accepted.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.waiters.clear();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T: Send + 'static> AsyncQueue<T> {
    /// Run `options.workers` pull/handle loops until the queue is closed and
    /// drained, or the cancel token fires.
    ///
    /// # Errors
    ///
    /// `QueueError::Cancelled` when the loops were stopped by the token.
    pub async fn consume<F, Fut>(
        self: &Arc<Self>,
        handler: F,
        options: ConsumeOptions,
    ) -> Result<(), QueueError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let workers = options.workers.max(1);
        let mut tasks = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let token = options.cancel_token.clone();
            tasks.spawn(async move {
                loop {
                    match queue.async_pop(token.as_ref()).await {
                        Ok(value) => (*handler)(value).await,
                        Err(reason) => {
                            debug!(target: "common.queue", worker, %reason, "Consumer loop stopped");
                            return reason;
                        }
                    }
                }
            });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(QueueError::Cancelled) => result = Err(QueueError::Cancelled),
                Ok(QueueError::Closed) => {}
                Err(e) => error!(target: "common.queue", error = %e, "Consumer worker aborted"),
            }
        }
        result
    }
}

/// Registration of a suspended pop. Removes the waiter when dropped before
/// settling, and puts back a value that raced in after the pop gave up.
struct PendingPop<'a, T> {
    queue: &'a AsyncQueue<T>,
    id: u64,
    rx: oneshot::Receiver<T>,
    settled: bool,
}

impl<T> Drop for PendingPop<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.queue.lock();
        if let Some(position) = inner.waiters.iter().position(|w| w.id == self.id) {
            inner.waiters.remove(position);
            return;
        }
        if let Ok(value) = self.rx.try_recv() {
            inner.deliver(vec![value], true);
        }
    }
}
