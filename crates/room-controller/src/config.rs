//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::config::parse_bool_flag;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default RC instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Default maximum concurrent rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Default number of client message ids remembered per session.
pub const DEFAULT_SEEN_MESSAGE_CAPACITY: usize = 256;

/// Default session inbound mailbox size.
pub const DEFAULT_SESSION_MAILBOX_BUFFER: usize = 256;

/// Default largest accepted upload chunk (1 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Default graceful shutdown deadline in seconds.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECONDS: u64 = 10;

/// Room Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Health endpoint bind address (default: "0.0.0.0:8090").
    pub health_bind_address: String,

    /// Unique identifier for this RC instance.
    pub instance_id: String,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Maximum concurrent sessions.
    pub max_sessions: usize,

    /// Bounded dedup set size for client message ids, per session.
    pub seen_message_capacity: usize,

    /// Session inbound mailbox size.
    pub session_mailbox_buffer: usize,

    /// Largest accepted upload chunk in bytes.
    pub max_chunk_bytes: usize,

    /// How long graceful shutdown waits for sessions and rooms.
    pub shutdown_deadline: Duration,

    /// Emit JSON-formatted logs.
    pub log_json: bool,

    /// Token required to read `/status`, if set.
    pub admin_token: Option<SecretString>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("max_rooms", &self.max_rooms)
            .field("max_sessions", &self.max_sessions)
            .field("seen_message_capacity", &self.seen_message_capacity)
            .field("session_mailbox_buffer", &self.session_mailbox_buffer)
            .field("max_chunk_bytes", &self.max_chunk_bytes)
            .field("shutdown_deadline", &self.shutdown_deadline)
            .field("log_json", &self.log_json)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            instance_id: format!("{DEFAULT_INSTANCE_ID_PREFIX}-local"),
            max_rooms: DEFAULT_MAX_ROOMS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            seen_message_capacity: DEFAULT_SEEN_MESSAGE_CAPACITY,
            session_mailbox_buffer: DEFAULT_SESSION_MAILBOX_BUFFER,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            shutdown_deadline: Duration::from_secs(DEFAULT_SHUTDOWN_DEADLINE_SECONDS),
            log_json: false,
            admin_token: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse a positive number, falling back to `default` when unset.
fn positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!("{key} must be a valid integer, got '{raw}': {e}"))
    })?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be positive, got '{raw}'"
        )));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = positive(vars, "RC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_sessions = positive(vars, "RC_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?;
        let seen_message_capacity =
            positive(vars, "RC_SEEN_MESSAGE_CAPACITY", DEFAULT_SEEN_MESSAGE_CAPACITY)?;
        let session_mailbox_buffer =
            positive(vars, "RC_SESSION_MAILBOX_BUFFER", DEFAULT_SESSION_MAILBOX_BUFFER)?;
        let max_chunk_bytes = positive(vars, "RC_MAX_CHUNK_BYTES", DEFAULT_MAX_CHUNK_BYTES)?;
        let shutdown_deadline_seconds = positive(
            vars,
            "RC_SHUTDOWN_DEADLINE_SECONDS",
            DEFAULT_SHUTDOWN_DEADLINE_SECONDS,
        )?;

        let log_json = match vars.get("RC_LOG_JSON") {
            None => false,
            Some(raw) => parse_bool_flag(raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!("RC_LOG_JSON must be a boolean, got '{raw}'"))
            })?,
        };

        let admin_token = vars
            .get("RC_ADMIN_TOKEN")
            .filter(|token| !token.is_empty())
            .map(|token| SecretString::from(token.clone()));

        // Generate RC instance ID
        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            health_bind_address,
            instance_id,
            max_rooms,
            max_sessions,
            seen_message_capacity,
            session_mailbox_buffer,
            max_chunk_bytes,
            shutdown_deadline: Duration::from_secs(shutdown_deadline_seconds),
            log_json,
            admin_token,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.health_bind_address, "0.0.0.0:8090");
        assert_eq!(config.max_rooms, 1000);
        assert_eq!(config.max_sessions, 10_000);
        assert_eq!(config.seen_message_capacity, 256);
        assert_eq!(config.max_chunk_bytes, 1024 * 1024);
        assert_eq!(config.shutdown_deadline, Duration::from_secs(10));
        assert!(!config.log_json);
        assert!(config.admin_token.is_none());
        assert!(config.instance_id.starts_with("rc-"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("RC_INSTANCE_ID", "rc-test-1"),
            ("RC_MAX_ROOMS", "5"),
            ("RC_MAX_CHUNK_BYTES", "4096"),
            ("RC_LOG_JSON", "true"),
            ("RC_ADMIN_TOKEN", "op-secret"),
        ]))
        .unwrap();

        assert_eq!(config.instance_id, "rc-test-1");
        assert_eq!(config.max_rooms, 5);
        assert_eq!(config.max_chunk_bytes, 4096);
        assert!(config.log_json);
        assert_eq!(config.admin_token.unwrap().expose_secret(), "op-secret");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_vars(&vars(&[("RC_MAX_SESSIONS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref m) if m.contains("RC_MAX_SESSIONS")));
    }

    #[test]
    fn test_zero_is_rejected() {
        let err = Config::from_vars(&vars(&[("RC_SESSION_MAILBOX_BUFFER", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let err = Config::from_vars(&vars(&[("RC_LOG_JSON", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_debug_redacts_admin_token() {
        let config = Config::from_vars(&vars(&[("RC_ADMIN_TOKEN", "op-secret")])).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("op-secret"));
    }
}
