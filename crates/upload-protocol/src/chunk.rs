//! Chunk and retransmission-request types.

use std::ops::Range;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One slice of a streamed recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Producer-assigned sequence number, starting at zero
    pub index: u64,
    /// Raw payload
    pub data: Bytes,
}

impl Chunk {
    /// Create a chunk
    #[must_use]
    pub fn new(index: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }

    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ask the producer to resend chunks `start..stop`.
///
/// `stop` is the index of the chunk that revealed the gap. It was discarded,
/// so the producer resends it after the missing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitRequest {
    /// First missing index
    pub start: u64,
    /// Index of the discarded out-of-order chunk
    pub stop: u64,
}

impl RetransmitRequest {
    /// The missing indices
    #[must_use]
    pub fn missing(&self) -> Range<u64> {
        self.start..self.stop
    }
}
