//! Pre-wired controller for RC testing.
//!
//! [`TestHarness`] spawns an event bus and a controller over the mocks in
//! this crate, and keeps the mocks reachable so tests can seed data, inject
//! failures and inspect what was persisted.

use std::sync::Arc;

use common::types::UserId;
use room_controller::actors::{ActorMetrics, ControllerHandle};
use room_controller::bus::EventBus;
use room_controller::config::Config;
use room_controller::services::{Credentials, Services};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mock_archive::MockArchive;
use crate::mock_identity::MockIdentity;
use crate::mock_store::MockStore;
use crate::test_client::TestClient;

/// Controller, bus and mocks for one test.
pub struct TestHarness {
    pub controller: ControllerHandle,
    pub bus: EventBus,
    pub store: MockStore,
    pub identity: MockIdentity,
    pub archive: MockArchive,
    pub metrics: Arc<ActorMetrics>,
    bus_token: CancellationToken,
    _bus_task: JoinHandle<()>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let store = MockStore::new();
        let identity = MockIdentity::new();
        let archive = MockArchive::new();
        let services = Services {
            identity: Arc::new(identity.clone()),
            store: Arc::new(store.clone()),
            archive: Arc::new(archive.clone()),
        };

        let bus_token = CancellationToken::new();
        let (bus, bus_task) = EventBus::spawn(bus_token.clone());
        let metrics = ActorMetrics::new();
        let controller =
            ControllerHandle::spawn(&config, bus.clone(), services, Arc::clone(&metrics));

        Self {
            controller,
            bus,
            store,
            identity,
            archive,
            metrics,
            bus_token,
            _bus_task: bus_task,
        }
    }

    /// Seed a named user with a bearer token equal to its name.
    pub fn add_user(&self, name: &str) -> UserId {
        let user = self.store.add_user(Some(name));
        self.identity.register(name, user);
        user
    }

    /// Connect as `name`, seeding the user first.
    pub async fn connect_user(&self, name: &str) -> TestClient {
        self.add_user(name);
        TestClient::connect(&self.controller, Some(Credentials::bearer(name))).await
    }

    /// Connect without credentials.
    pub async fn connect_guest(&self) -> TestClient {
        TestClient::connect(&self.controller, None).await
    }

    /// Wait until everything published so far was delivered.
    pub async fn settle(&self) {
        self.bus.flush().await;
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.controller.cancel();
        self.bus_token.cancel();
    }
}

/// Config with small limits and a short shutdown deadline.
#[must_use]
pub fn test_config() -> Config {
    Config {
        instance_id: "rc-test".to_string(),
        max_rooms: 16,
        max_sessions: 64,
        seen_message_capacity: 8,
        max_chunk_bytes: 64,
        shutdown_deadline: std::time::Duration::from_secs(2),
        ..Config::default()
    }
}
