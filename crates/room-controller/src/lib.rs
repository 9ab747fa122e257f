//! Room Controller (RC) Service Library
//!
//! The coordination core behind Huddle's browser calling app:
//!
//! - Room presence, WebRTC signaling relay and screen-share/recording toggles
//! - Collision-safe offer/answer negotiation between peers
//! - Ordered reassembly of streamed recording uploads with selective
//!   retransmission
//! - Group chat fan-out with client-id deduplication
//!
//! # Architecture
//!
//! ```text
//! ControllerActor (singleton)
//! ├── owns the room-by-id and session-by-signal-id registries
//! ├── RoomActor (one per live room)
//! │   └── owns members, connected peers and open recordings
//! └── SessionActor (one per client connection)
//!     └── owns identity, room/group subscriptions, seen message ids
//!
//! EventBus (dispatcher task)
//! └── deferred, topic-keyed fan-out to session subscriptions
//! ```
//!
//! Sessions talk to rooms by message; rooms and sessions publish on the
//! [`bus::EventBus`], which delivers from its own task so a publish never
//! re-enters the publisher.
//!
//! # Modules
//!
//! - [`actors`] - Controller, room and session actors
//! - [`bus`] - Topic-keyed event bus
//! - [`negotiation`] - Polite/impolite offer collision handling
//! - [`peer_client`] - Client-side driver for negotiation over the room channel
//! - [`protocol`] - Inbound and outbound client events
//! - [`services`] - Identity, store and recording archive collaborators
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy and client-safe messages
//! - [`observability`] - Health endpoints and Prometheus metrics

pub mod actors;
pub mod bus;
pub mod config;
pub mod errors;
pub mod negotiation;
pub mod observability;
pub mod peer_client;
pub mod protocol;
pub mod services;
