//! Bus topic keys.

use std::fmt;

use common::types::{GroupId, RoomId, SignalId};

/// Addressable bus channel.
///
/// Each variant carries exactly one payload family (see
/// [`BusEvent::topic_kind`](super::BusEvent::topic_kind)), so a room topic can
/// never be handed a group message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Point-to-point relay to one session
    Signal(SignalId),
    /// Presence and toggles for one room
    Room(RoomId),
    /// Messages and names for one group
    Group(GroupId),
    /// Process-wide upload progress
    Upload,
}

/// The payload family a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Signal,
    Room,
    Group,
    Upload,
}

impl TopicKind {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Signal => "signal",
            TopicKind::Room => "room",
            TopicKind::Group => "group",
            TopicKind::Upload => "upload",
        }
    }
}

impl Topic {
    #[must_use]
    pub const fn kind(&self) -> TopicKind {
        match self {
            Topic::Signal(_) => TopicKind::Signal,
            Topic::Room(_) => TopicKind::Room,
            Topic::Group(_) => TopicKind::Group,
            Topic::Upload => TopicKind::Upload,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Signal(id) => write!(f, "signal:{id}"),
            Topic::Room(id) => write!(f, "room:{id}"),
            Topic::Group(id) => write!(f, "group:{id}"),
            Topic::Upload => f.write_str("upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_display() {
        let room = Topic::Room(RoomId(Uuid::nil()));
        assert_eq!(
            room.to_string(),
            "room:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Topic::Upload.to_string(), "upload");
    }

    #[test]
    fn test_kind() {
        assert_eq!(Topic::Signal(SignalId::new()).kind(), TopicKind::Signal);
        assert_eq!(Topic::Group(GroupId::new()).kind().as_str(), "group");
    }
}
