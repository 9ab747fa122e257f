//! Producer side: sequence-numbered payloads held until applied.
//!
//! Payloads are futures so encoding can finish after the chunk is queued. A
//! payload stays held after it is put on the wire, since a retransmission
//! request may ask for it again; it is released once the consumer's requests
//! show everything below it was applied, or when [`ChunkProducer::acknowledge`]
//! is called. After [`ChunkProducer::finish`] nothing is held past its last
//! trip onto the wire.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use common::queue::{AsyncQueue, ConsumeOptions, QueueError};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunk::{Chunk, RetransmitRequest};

type Payload = Shared<BoxFuture<'static, Bytes>>;

struct Held {
    payload: Payload,
    /// Waiting in the outbound queue
    queued: bool,
}

struct ProducerState {
    next_index: u64,
    held: BTreeMap<u64, Held>,
    finished: bool,
}

/// Outbound chunk buffer for one upload.
pub struct ChunkProducer {
    state: Mutex<ProducerState>,
    outbound: Arc<AsyncQueue<u64>>,
}

impl Default for ChunkProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkProducer {
    /// Create an empty producer starting at index zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProducerState {
                next_index: 0,
                held: BTreeMap::new(),
                finished: false,
            }),
            outbound: Arc::new(AsyncQueue::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProducerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a payload, returning its assigned index.
    pub fn push<F>(&self, payload: F) -> u64
    where
        F: Future<Output = Bytes> + Send + 'static,
    {
        let mut state = self.lock();
        let index = state.next_index;
        state.next_index += 1;
        state.held.insert(
            index,
            Held {
                payload: payload.boxed().shared(),
                queued: true,
            },
        );
        self.outbound.push([index]);
        index
    }

    /// Queue an already-encoded payload.
    pub fn push_bytes(&self, data: impl Into<Bytes>) -> u64 {
        let data = data.into();
        self.push(async move { data })
    }

    /// Handle a retransmission request from the consumer.
    ///
    /// Everything below `request.start` is released. Held indices in
    /// `start..=stop` are re-queued ahead of newer chunks, merged with what is
    /// still queued so the wire order stays ascending. Returns the number of
    /// indices re-queued.
    pub fn request_retransmit(&self, request: RetransmitRequest) -> usize {
        let mut state = self.lock();
        state.held = state.held.split_off(&request.start);

        let mut queued = self.outbound.clear();
        let before = queued.len();
        for (index, held) in state.held.range_mut(request.start..=request.stop) {
            held.queued = true;
            queued.push(*index);
        }
        queued.sort_unstable();
        queued.dedup();
        let requeued = queued.len() - before;

        debug!(
            target: "upload.producer",
            start = request.start,
            stop = request.stop,
            requeued,
            "Retransmission requested"
        );
        self.outbound.push_front(queued);
        requeued
    }

    /// Release every payload below `below`.
    pub fn acknowledge(&self, below: u64) {
        let mut state = self.lock();
        state.held = state.held.split_off(&below);
    }

    /// Number of payloads still held
    pub fn pending(&self) -> usize {
        self.lock().held.len()
    }

    /// Number of indices waiting to go on the wire
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Index the next pushed payload will get
    pub fn next_index(&self) -> u64 {
        self.lock().next_index
    }

    /// Stop accepting waits once the queue drains.
    ///
    /// Payloads already on the wire are released now; the rest are released
    /// as they go out.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.finished = true;
        state.held.retain(|_, held| held.queued);
        self.outbound.close();
    }

    /// Wait for the next chunk to put on the wire.
    ///
    /// # Errors
    ///
    /// `QueueError::Closed` once finished and drained, or `Cancelled`.
    pub async fn next_chunk(&self, cancel: Option<&CancellationToken>) -> Result<Chunk, QueueError> {
        loop {
            let index = self.outbound.async_pop(cancel).await?;
            if let Some(chunk) = self.resolve(index).await {
                return Ok(chunk);
            }
        }
    }

    async fn resolve(&self, index: u64) -> Option<Chunk> {
        let payload = {
            let mut state = self.lock();
            if state.finished {
                state.held.remove(&index)?.payload
            } else {
                let held = state.held.get_mut(&index)?;
                held.queued = false;
                held.payload.clone()
            }
        };
        Some(Chunk {
            index,
            data: payload.await,
        })
    }

    /// Send chunks to `sink` in queue order until finished or cancelled.
    ///
    /// # Errors
    ///
    /// `QueueError::Cancelled` if `cancel` fired.
    pub async fn drain<S, Fut>(
        self: &Arc<Self>,
        sink: S,
        cancel: Option<CancellationToken>,
    ) -> Result<(), QueueError>
    where
        S: Fn(Chunk) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let producer = Arc::clone(self);
        let sink = Arc::new(sink);
        self.outbound
            .consume(
                move |index| {
                    let producer = Arc::clone(&producer);
                    let sink = Arc::clone(&sink);
                    async move {
                        if let Some(chunk) = producer.resolve(index).await {
                            (*sink)(chunk).await;
                        }
                    }
                },
                ConsumeOptions {
                    workers: 1,
                    cancel_token: cancel,
                },
            )
            .await
    }
}
