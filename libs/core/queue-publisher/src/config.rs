//! Broker and publisher configuration
//!
//! Connection parameters come from the environment (or are built in code);
//! the retry count is applied uniformly to both the connect and publish
//! retry policies.

use crate::error::PublishError;
use std::env;
use std::time::Duration;

/// Retry attempts applied to both connect and publish policies.
pub const DEFAULT_RETRY_COUNT: u32 = 5;

/// Default bound on the wait for a publish confirmation.
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 30_000;

/// Broker connection and publisher settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host address.
    pub host: String,

    /// Optional username.
    pub username: Option<String>,

    /// Optional password.
    pub password: Option<String>,

    /// Retry attempts for connect and publish.
    pub retry_count: u32,

    /// Bound on the wait for a publish confirmation, in milliseconds.
    pub confirm_timeout_ms: u64,
}

impl BrokerConfig {
    /// Create a config for the given host with default retry settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
            retry_count: DEFAULT_RETRY_COUNT,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
        }
    }

    /// Load from the environment.
    ///
    /// `BROKER_HOST` is required; `BROKER_USERNAME` and `BROKER_PASSWORD`
    /// are optional and map strictly to their own fields.
    /// `BROKER_RETRY_COUNT` and `BROKER_CONFIRM_TIMEOUT_MS` override the
    /// defaults.
    pub fn from_env() -> Result<Self, PublishError> {
        Ok(Self {
            host: env_required("BROKER_HOST")?,
            username: env_optional("BROKER_USERNAME"),
            password: env_optional("BROKER_PASSWORD"),
            retry_count: env_parsed("BROKER_RETRY_COUNT", DEFAULT_RETRY_COUNT)?,
            confirm_timeout_ms: env_parsed(
                "BROKER_CONFIRM_TIMEOUT_MS",
                DEFAULT_CONFIRM_TIMEOUT_MS,
            )?,
        })
    }

    /// Set the credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the confirm timeout in milliseconds.
    pub fn with_confirm_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.confirm_timeout_ms = timeout_ms;
        self
    }

    /// The confirm timeout as a [`Duration`].
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Load an environment variable or return a config error naming it.
fn env_required(key: &str) -> Result<String, PublishError> {
    env::var(key)
        .map_err(|_| PublishError::config(format!("environment variable '{key}' is required but not set")))
}

/// Load an optional environment variable.
fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Load and parse an environment variable, falling back to a default.
fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, PublishError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            PublishError::config(format!("failed to parse environment variable '{key}': '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}
