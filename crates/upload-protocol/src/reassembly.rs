//! Consumer side: in-order application with gap detection.

use std::cmp::Ordering;
use std::ops::Range;

use crate::chunk::{Chunk, RetransmitRequest};
use crate::error::UploadError;

/// Outcome of offering a chunk to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The chunk was next in line and has been applied.
    Accepted(Chunk),
    /// The chunk was applied earlier; dropped.
    Duplicate {
        /// Index of the dropped chunk
        index: u64,
    },
    /// Chunks are missing ahead of this one. It was dropped and the
    /// producer should resend `request`.
    Gap {
        /// Range the producer should resend
        request: RetransmitRequest,
        /// Index of the dropped chunk
        discarded: u64,
    },
}

/// What a finalized upload actually contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblySummary {
    /// Number of chunks applied, which are exactly `0..applied_chunks`
    pub applied_chunks: u64,
    /// Total payload bytes applied
    pub applied_bytes: u64,
    /// Indices seen past the applied prefix but never applied
    pub missing: Option<Range<u64>>,
}

impl ReassemblySummary {
    /// Whether every chunk the producer was seen sending was applied
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_none()
    }
}

/// Tracks the next expected index for one recording.
#[derive(Debug, Clone)]
pub struct Reassembler {
    next_expected: u64,
    highest_seen: Option<u64>,
    applied_bytes: u64,
    max_chunk_bytes: usize,
    finished: bool,
}

impl Reassembler {
    /// Create a reassembler rejecting chunks larger than `max_chunk_bytes`
    #[must_use]
    pub fn new(max_chunk_bytes: usize) -> Self {
        Self {
            next_expected: 0,
            highest_seen: None,
            applied_bytes: 0,
            max_chunk_bytes,
            finished: false,
        }
    }

    /// Index the next accepted chunk must carry
    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Whether [`finish`](Self::finish) has run
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Offer a chunk.
    ///
    /// # Errors
    ///
    /// `UploadError::Finished` once finalized, `UploadError::ChunkTooLarge`
    /// for oversized payloads. Neither changes the expected index.
    pub fn receive(&mut self, chunk: Chunk) -> Result<Received, UploadError> {
        if self.finished {
            return Err(UploadError::Finished);
        }
        if chunk.len() > self.max_chunk_bytes {
            return Err(UploadError::ChunkTooLarge {
                len: chunk.len(),
                max: self.max_chunk_bytes,
            });
        }

        self.highest_seen = Some(self.highest_seen.map_or(chunk.index, |h| h.max(chunk.index)));

        match chunk.index.cmp(&self.next_expected) {
            Ordering::Less => Ok(Received::Duplicate { index: chunk.index }),
            Ordering::Equal => {
                self.next_expected += 1;
                self.applied_bytes += chunk.len() as u64;
                Ok(Received::Accepted(chunk))
            }
            Ordering::Greater => Ok(Received::Gap {
                request: RetransmitRequest {
                    start: self.next_expected,
                    stop: chunk.index,
                },
                discarded: chunk.index,
            }),
        }
    }

    /// Finalize. Returns the summary on the first call only.
    pub fn finish(&mut self) -> Option<ReassemblySummary> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.summary())
    }

    /// Current accounting, whether or not finalized
    #[must_use]
    pub fn summary(&self) -> ReassemblySummary {
        let missing = self
            .highest_seen
            .filter(|highest| *highest >= self.next_expected)
            .map(|highest| self.next_expected..highest + 1);
        ReassemblySummary {
            applied_chunks: self.next_expected,
            applied_bytes: self.applied_bytes,
            missing,
        }
    }
}
