//! Room Controller error types.
//!
//! Every inbound handler returns `Result<_, RcError>`. The session actor
//! classifies failures with [`RcError::kind`] and reports them to the
//! originating connection using [`RcError::client_message`], which never
//! carries internal detail.

use common::error::HuddleError;
use thiserror::Error;
use upload_protocol::UploadError;

/// Coarse classification used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recoverable, caused by the request; reported to the client.
    User,
    /// Collaborator failure or broken invariant; logged with context.
    Internal,
    /// A cancellation token fired. Expected, not logged as an error.
    Cancelled,
}

impl ErrorKind {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::User => "user",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Room Controller error type.
#[derive(Debug, Error)]
pub enum RcError {
    /// The handler needs a joined room.
    #[error("Session is not in a room")]
    NotInRoom,

    /// Room id malformed or unknown to the store.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Acting identity does not own the recording.
    #[error("Not the recording owner")]
    NotRecordingOwner,

    /// Recording id malformed, unknown, or already finalized.
    #[error("Recording not found: {0}")]
    RecordingNotFound(String),

    /// Signal target is not a well-formed signaling id.
    #[error("Unknown signal target: {0}")]
    UnknownTarget(String),

    /// Session is not subscribed to the group.
    #[error("Not subscribed to group: {0}")]
    NotInGroup(String),

    /// Group id malformed or unknown to the store.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Guest sessions cannot perform this operation.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Room or session limit reached.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Controller is shutting down.
    #[error("Controller is draining")]
    Draining,

    /// Upload chunk larger than the configured limit.
    #[error("Chunk of {len} bytes exceeds the {max} byte limit")]
    ChunkTooLarge {
        /// Received size
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Request payload failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Identity service failure.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Recording archive failure.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RcError::Store(_) | RcError::Identity(_) | RcError::Archive(_) | RcError::Internal(_) => {
                ErrorKind::Internal
            }
            RcError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::User,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Store(_) | RcError::Identity(_) | RcError::Archive(_) | RcError::Internal(_) => {
                "Internal error".to_string()
            }
            RcError::NotInRoom => "Not in a room".to_string(),
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::NotRecordingOwner => "Not the recording owner".to_string(),
            RcError::RecordingNotFound(_) => "Recording not found".to_string(),
            RcError::UnknownTarget(_) => "Unknown signal target".to_string(),
            RcError::NotInGroup(_) => "Not subscribed to group".to_string(),
            RcError::GroupNotFound(_) => "Group not found".to_string(),
            RcError::AuthenticationRequired => "Authentication required".to_string(),
            RcError::CapacityExceeded(_) => "Server is at capacity, please try again".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
            RcError::ChunkTooLarge { max, .. } => format!("Chunk exceeds {max} bytes"),
            RcError::InvalidRequest(_) => "Invalid request".to_string(),
            RcError::Cancelled => "Request cancelled".to_string(),
        }
    }

    /// Map a failed mailbox send to an internal error.
    pub(crate) fn channel_send(e: impl std::fmt::Display) -> Self {
        RcError::Internal(format!("channel send failed: {e}"))
    }

    /// Map a dropped response channel to an internal error.
    pub(crate) fn channel_recv(e: impl std::fmt::Display) -> Self {
        RcError::Internal(format!("response receive failed: {e}"))
    }
}

impl From<HuddleError> for RcError {
    fn from(err: HuddleError) -> Self {
        match err {
            HuddleError::Store(msg) => RcError::Store(msg),
            HuddleError::Identity(msg) => RcError::Identity(msg),
            HuddleError::Archive(msg) => RcError::Archive(msg),
            err @ (HuddleError::Serialization(_) | HuddleError::NotFound(_)) => {
                RcError::Internal(err.to_string())
            }
        }
    }
}

impl From<UploadError> for RcError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Finished => RcError::RecordingNotFound("recording finished".to_string()),
            UploadError::ChunkTooLarge { len, max } => RcError::ChunkTooLarge { len, max },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_opaque() {
        let errors = [
            RcError::Store("connection refused to 10.0.0.5".to_string()),
            RcError::Identity("token service timeout".to_string()),
            RcError::Archive("bucket missing".to_string()),
            RcError::Internal("channel send failed".to_string()),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Internal);
            assert_eq!(err.client_message(), "Internal error");
        }
    }

    #[test]
    fn test_user_errors_do_not_echo_ids() {
        let err = RcError::RoomNotFound("8d1f-secret-room".to_string());
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(!err.client_message().contains("8d1f"));
    }

    #[test]
    fn test_cancelled_kind() {
        assert_eq!(RcError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ErrorKind::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_from_huddle_error() {
        let err: RcError = HuddleError::Store("down".to_string()).into();
        assert!(matches!(err, RcError::Store(ref m) if m == "down"));

        let err: RcError = HuddleError::Serialization("bad".to_string()).into();
        assert!(matches!(err, RcError::Internal(_)));

        let err: RcError = HuddleError::NotFound("room 42".to_string()).into();
        assert!(matches!(err, RcError::Internal(ref m) if m == "Not found: room 42"));
        assert_eq!(err.client_message(), "Internal error");
    }

    #[test]
    fn test_from_upload_error() {
        let err: RcError = UploadError::ChunkTooLarge { len: 10, max: 4 }.into();
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.client_message(), "Chunk exceeds 4 bytes");

        let err: RcError = UploadError::Finished.into();
        assert!(matches!(err, RcError::RecordingNotFound(_)));
    }
}
