//! Common error types for Huddle components.

use thiserror::Error;

/// Failures reported by the collaborators Huddle talks to (store, identity,
/// archive) plus the shared plumbing around them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HuddleError {
    /// Persistent store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Identity service failed to resolve credentials
    #[error("Identity error: {0}")]
    Identity(String),

    /// Recording archive rejected or failed a hand-off
    #[error("Archive error: {0}")]
    Archive(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}
