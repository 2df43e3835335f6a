//! Broker transport seam
//!
//! The publisher core never talks to a wire protocol directly; it goes
//! through these object-safe traits. The real driver (and anything else that
//! owns sockets) lives behind them, which is also what makes the
//! reconnect/retry logic testable against a scripted in-memory broker.
//!
//! A connection additionally delivers three asynchronous failure signals
//! (unexpected shutdown, connection blocked, protocol callback exception) on
//! a single channel; the connection manager reacts to them without any caller
//! involvement.

use crate::error::PublishError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Asynchronous broker-failure signals, delivered outside any caller's
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// The connection shut down unexpectedly.
    Shutdown,
    /// The broker blocked the connection (e.g. resource alarm).
    Blocked,
    /// A protocol callback raised an exception.
    CallbackException,
}

impl FailureSignal {
    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureSignal::Shutdown => "shutdown",
            FailureSignal::Blocked => "blocked",
            FailureSignal::CallbackException => "callback_exception",
        }
    }
}

/// Queue declaration properties.
///
/// Defaults reproduce a declaration with default settings and no special
/// arguments: durable, non-exclusive, non-auto-delete.
#[derive(Debug, Clone, Copy)]
pub struct QueueProperties {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Default for QueueProperties {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Delivery properties for a published message.
///
/// `persistent` is the single authoritative durability flag for the message;
/// `mandatory` requires the broker to route it or report failure. Both
/// default to true.
#[derive(Debug, Clone, Copy)]
pub struct MessageProperties {
    pub persistent: bool,
    pub mandatory: bool,
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self {
            persistent: true,
            mandatory: true,
        }
    }
}

/// Broker acknowledgment of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    /// The message was accepted for routing/storage.
    Ack,
    /// The broker refused the message.
    Nack,
}

/// A freshly established connection together with its failure-signal stream.
pub struct ConnectedBroker {
    pub connection: Box<dyn BrokerConnection>,
    pub failures: mpsc::Receiver<FailureSignal>,
}

/// Factory for broker connections. The connection parameters (host,
/// credentials) are the implementation's concern.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a single connection attempt. Transient failures are reported as
    /// [`PublishError::Socket`] or [`PublishError::Unreachable`] so the
    /// connection manager can classify them for retry.
    async fn connect(&self) -> Result<ConnectedBroker, PublishError>;
}

/// A long-lived broker connection. Owned exclusively by the connection
/// manager; callers only ever see channels derived from it.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Endpoint identity, for logging.
    fn endpoint(&self) -> &str;

    /// Derive a new short-lived channel from this connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, PublishError>;

    /// Close the connection, releasing broker-side resources.
    async fn close(&mut self) -> Result<(), PublishError>;
}

/// A single-use communication channel. Not safe for concurrent use: each
/// publish call derives its own channel and drops it at the end of the call,
/// which releases the broker-side resources.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Idempotently ensure the named queue exists. Declaring the same name
    /// twice is a no-op.
    async fn declare_queue(
        &mut self,
        name: &str,
        properties: QueueProperties,
    ) -> Result<(), PublishError>;

    /// Put the channel into publish-confirmation mode.
    async fn enable_confirms(&mut self) -> Result<(), PublishError>;

    /// Publish a message to the named queue.
    async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), PublishError>;

    /// Block until the broker acknowledges the outstanding publish.
    async fn wait_for_confirm(&mut self) -> Result<Confirm, PublishError>;
}
