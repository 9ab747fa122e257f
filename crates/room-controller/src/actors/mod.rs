//! Actor hierarchy for the Room Controller.
//!
//! ```text
//! ControllerActor (singleton)
//! ├── RoomActor (one per live room)
//! └── SessionActor (one per connection)
//! ```
//!
//! Each actor owns its state exclusively and is reached through a cloneable
//! handle wrapping an `mpsc::Sender`. Requests that need an answer carry a
//! `oneshot::Sender`. Cancellation flows through `CancellationToken`s owned
//! by the controller.

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;
pub mod session;

pub use controller::{ControllerActor, ControllerHandle};
pub use messages::{ControllerStatus, RoomState, SessionState};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomContext, RoomHandle};
pub use session::{SessionActor, SessionContext, SessionHandle};
