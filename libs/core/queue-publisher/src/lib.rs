//! Resilient Queue Publisher
//!
//! A client-side resilience layer for publishing domain events to a message
//! broker over an unreliable network.
//!
//! ## Features
//!
//! - **Connection lifecycle**: one shared connection, auto-reconnected when
//!   the broker signals shutdown, blocking, or a callback exception
//! - **Confirmed publishing**: persistent + mandatory delivery with publish
//!   confirmation and a bounded confirm wait
//! - **Bounded retry**: one exponential-backoff policy shared by connect and
//!   publish paths
//! - **Transport seam**: object-safe broker traits, so the wire driver stays
//!   pluggable and the core is testable against an in-memory broker
//! - **Prometheus metrics**: publish outcomes and reconnects
//!
//! ## Example
//!
//! ```ignore
//! use queue_publisher::{BrokerConfig, ConnectionManager, EventMeta, Publisher};
//!
//! #[derive(serde::Serialize)]
//! struct SettingChanged {
//!     #[serde(flatten)]
//!     meta: EventMeta,
//!     name: String,
//!     value: String,
//! }
//!
//! impl queue_publisher::PublishableEvent for SettingChanged {
//!     fn event_id(&self) -> uuid::Uuid { self.meta.id() }
//!     fn created_at(&self) -> chrono::DateTime<chrono::Utc> { self.meta.created() }
//! }
//!
//! let config = BrokerConfig::from_env()?;
//! let connection = ConnectionManager::from_config(connector, &config);
//! let publisher = Publisher::from_config(connection, &config);
//!
//! let event = SettingChanged {
//!     meta: EventMeta::new(),
//!     name: "polling_interval".into(),
//!     value: "30s".into(),
//! };
//! publisher.publish("settings:events", &event).await?;
//! ```

mod config;
mod connection;
mod error;
mod event;
pub mod metrics;
mod publisher;
mod retry;
pub mod transport;

// Re-export main types
pub use config::{BrokerConfig, DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_RETRY_COUNT};
pub use connection::ConnectionManager;
pub use error::PublishError;
pub use event::{EventMeta, PublishableEvent};
pub use metrics::{PublisherMetrics, init_metrics, render_metrics};
pub use publisher::Publisher;
pub use retry::{RetryError, RetryPolicy};
pub use transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, Confirm, ConnectedBroker, FailureSignal,
    MessageProperties, QueueProperties,
};
