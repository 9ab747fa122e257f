//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC) service.
//!
//! This crate provides mock implementations of the external collaborators
//! and a scripted client, so room, group and upload flows can be driven end
//! to end without a transport or a real store.
//!
//! ## Modules
//!
//! - `mock_store` - In-memory store with per-operation failure injection
//! - `mock_identity` - Token table identity service
//! - `mock_archive` - Recording archive that records every hand-off
//! - `fake_media` - Signaling state machine standing in for a media stack
//! - `test_client` - One connected session with timeout-bounded expectations
//! - `fixtures` - A wired controller plus mocks (`TestHarness`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new();
//!     let room = harness.store.add_room("standup");
//!
//!     let mut alice = harness.connect_user("alice").await;
//!     alice.send(join_room(room)).await;
//!     let users = alice.expect_room_users().await;
//!     assert_eq!(users.len(), 1);
//! }
//! ```

pub mod fake_media;
pub mod fixtures;
pub mod mock_archive;
pub mod mock_identity;
pub mod mock_store;
pub mod test_client;

// Re-export commonly used items
pub use fake_media::*;
pub use fixtures::*;
pub use mock_archive::*;
pub use mock_identity::*;
pub use mock_store::*;
pub use test_client::*;
