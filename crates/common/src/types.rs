//! Common data types for Huddle components.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A string could not be parsed as one of the UUID-backed ids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseIdError {
    /// Which id type was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Borrow the underlying UUID
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|_| ParseIdError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

uuid_id!(
    /// Ephemeral per-connection id used to address point-to-point signaling.
    ///
    /// Ordering follows UUID byte order and decides which side of a peer pair
    /// is polite.
    SignalId,
    "signal id"
);

uuid_id!(
    /// Unique identifier for a room
    RoomId,
    "room id"
);

uuid_id!(
    /// Unique identifier for a messaging group
    GroupId,
    "group id"
);

uuid_id!(
    /// Persistent user identity
    UserId,
    "user id"
);

uuid_id!(
    /// Unique identifier for a recording upload
    RecordingId,
    "recording id"
);

/// Client-generated message id used for send deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
