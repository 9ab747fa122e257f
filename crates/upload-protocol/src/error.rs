//! Upload protocol errors.

use thiserror::Error;

/// Failures applying a chunk. Gaps and duplicates are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The recording was already finalized
    #[error("upload already finished")]
    Finished,

    /// Chunk exceeds the configured size limit
    #[error("chunk of {len} bytes exceeds the {max} byte limit")]
    ChunkTooLarge {
        /// Received payload size
        len: usize,
        /// Configured limit
        max: usize,
    },
}
