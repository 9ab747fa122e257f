//! Mock identity service.
//!
//! Maps bearer tokens to users from a fixed table. Unknown tokens resolve to
//! guests, and the whole service can be switched to failing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::error::HuddleError;
use common::secret::ExposeSecret;
use common::types::UserId;
use room_controller::services::{Credentials, IdentityService};

/// Mock identity service for testing.
#[derive(Clone, Default)]
pub struct MockIdentity {
    tokens: Arc<Mutex<HashMap<String, UserId>>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for `user`.
    #[must_use]
    pub fn with_token(self, token: &str, user: UserId) -> Self {
        self.register(token, user);
        self
    }

    pub fn register(&self, token: &str, user: UserId) {
        self.tokens.lock().unwrap().insert(token.to_string(), user);
    }

    /// Make every later authentication fail with an identity error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityService for MockIdentity {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, HuddleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(HuddleError::Identity("identity service unavailable".to_string()));
        }
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .get(credentials.token.expose_secret())
            .copied())
    }
}
