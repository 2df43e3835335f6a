//! Scriptable in-memory broker
//!
//! Implements the `queue_publisher` transport traits entirely in memory so
//! connection-lifecycle and publish tests can script broker behavior per
//! test: refuse the first N connects, nack the first K confirms, stall
//! confirms, kill the live connection, or fire failure signals.
//!
//! Counters expose what the code under test actually did: connect attempts,
//! channels opened and released, queue declarations, publish attempts, and
//! the messages the broker accepted.

use async_trait::async_trait;
use queue_publisher::PublishError;
use queue_publisher::transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, Confirm, ConnectedBroker, FailureSignal,
    MessageProperties, QueueProperties,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// How the fake broker answers confirmation waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmBehavior {
    /// Acknowledge every publish.
    AlwaysAck,
    /// Nack the first `n` publishes, then acknowledge.
    NackFirst(u32),
    /// Nack every publish.
    AlwaysNack,
}

/// A message the broker accepted (acked).
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

#[derive(Default)]
struct BrokerState {
    // Scripting
    connect_failures_remaining: u32,
    confirm: Option<ConfirmBehavior>,
    confirm_stall: bool,
    close_error: bool,

    // Observations
    connect_attempts: u32,
    channels_opened: u32,
    channels_released: u32,
    declare_calls: u32,
    queues: BTreeSet<String>,
    publish_attempts: u32,
    nacks_issued: u32,
    confirms_enabled: u32,
    messages: Vec<PublishedMessage>,

    // Current connection
    signal_tx: Option<mpsc::Sender<FailureSignal>>,
    current_open: Option<Arc<AtomicBool>>,
}

/// In-memory broker whose behavior is scripted per test.
///
/// Clones share state; use [`FakeBroker::connector`] to hand it to a
/// `ConnectionManager`.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector handle for the code under test.
    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(self.clone())
    }

    // Scripting

    /// Refuse the next `n` connect attempts with a broker-unreachable error.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().connect_failures_remaining = n;
    }

    /// Refuse every connect attempt.
    pub fn refuse_connections(&self) {
        self.fail_next_connects(u32::MAX);
    }

    /// Nack the first `n` confirmation waits, then ack.
    pub fn nack_first(&self, n: u32) {
        self.state.lock().unwrap().confirm = Some(ConfirmBehavior::NackFirst(n));
    }

    /// Nack every confirmation wait.
    pub fn always_nack(&self) {
        self.state.lock().unwrap().confirm = Some(ConfirmBehavior::AlwaysNack);
    }

    /// Never answer confirmation waits (forces the confirm timeout).
    pub fn stall_confirms(&self) {
        self.state.lock().unwrap().confirm_stall = true;
    }

    /// Make connection close report an I/O error (the connection still
    /// transitions to closed).
    pub fn fail_close(&self) {
        self.state.lock().unwrap().close_error = true;
    }

    /// Mark the current connection as no longer open, as a broker-side
    /// disconnect would.
    pub fn kill_current_connection(&self) {
        if let Some(open) = self.state.lock().unwrap().current_open.as_ref() {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Deliver a failure signal on the current connection's signal channel.
    /// Returns false when no connection is live.
    pub fn fire(&self, signal: FailureSignal) -> bool {
        let state = self.state.lock().unwrap();
        match state.signal_tx.as_ref() {
            Some(tx) => tx.try_send(signal).is_ok(),
            None => false,
        }
    }

    // Observations

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn channels_opened(&self) -> u32 {
        self.state.lock().unwrap().channels_opened
    }

    pub fn channels_released(&self) -> u32 {
        self.state.lock().unwrap().channels_released
    }

    pub fn declare_calls(&self) -> u32 {
        self.state.lock().unwrap().declare_calls
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state.lock().unwrap().queues.iter().cloned().collect()
    }

    pub fn publish_attempts(&self) -> u32 {
        self.state.lock().unwrap().publish_attempts
    }

    pub fn confirms_enabled(&self) -> u32 {
        self.state.lock().unwrap().confirms_enabled
    }

    /// Messages the broker accepted.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    async fn connect(&self) -> Result<ConnectedBroker, PublishError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;

        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(PublishError::unreachable("fake broker refused connection"));
        }

        let (signal_tx, failures) = mpsc::channel(8);
        let open = Arc::new(AtomicBool::new(true));
        state.signal_tx = Some(signal_tx);
        state.current_open = Some(open.clone());

        Ok(ConnectedBroker {
            connection: Box::new(FakeConnection {
                state: self.state.clone(),
                open,
                endpoint: "fake-broker:5672".to_string(),
            }),
            failures,
        })
    }
}

struct FakeConnection {
    state: Arc<Mutex<BrokerState>>,
    open: Arc<AtomicBool>,
    endpoint: String,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, PublishError> {
        if !self.is_open() {
            return Err(PublishError::socket("connection is closed"));
        }

        self.state.lock().unwrap().channels_opened += 1;
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
            open: self.open.clone(),
            confirms_enabled: false,
            pending: None,
        }))
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        self.open.store(false, Ordering::SeqCst);
        if self.state.lock().unwrap().close_error {
            return Err(PublishError::socket("broken pipe while closing"));
        }
        Ok(())
    }
}

struct FakeChannel {
    state: Arc<Mutex<BrokerState>>,
    open: Arc<AtomicBool>,
    confirms_enabled: bool,
    pending: Option<PublishedMessage>,
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_queue(
        &mut self,
        name: &str,
        _properties: QueueProperties,
    ) -> Result<(), PublishError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(PublishError::socket("connection is closed"));
        }

        let mut state = self.state.lock().unwrap();
        state.declare_calls += 1;
        // Redeclaring an existing queue is a no-op.
        state.queues.insert(name.to_string());
        Ok(())
    }

    async fn enable_confirms(&mut self) -> Result<(), PublishError> {
        self.confirms_enabled = true;
        self.state.lock().unwrap().confirms_enabled += 1;
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), PublishError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(PublishError::socket("connection is closed"));
        }

        self.state.lock().unwrap().publish_attempts += 1;
        self.pending = Some(PublishedMessage {
            queue: queue.to_string(),
            payload: payload.to_vec(),
            properties,
        });
        Ok(())
    }

    async fn wait_for_confirm(&mut self) -> Result<Confirm, PublishError> {
        if !self.confirms_enabled {
            return Err(PublishError::socket("confirms were not enabled"));
        }

        let stalled = self.state.lock().unwrap().confirm_stall;
        if stalled {
            std::future::pending::<()>().await;
        }

        let message = self
            .pending
            .take()
            .ok_or_else(|| PublishError::socket("no publish outstanding"))?;

        let mut state = self.state.lock().unwrap();
        let behavior = state.confirm.unwrap_or(ConfirmBehavior::AlwaysAck);
        let confirm = match behavior {
            ConfirmBehavior::AlwaysAck => Confirm::Ack,
            ConfirmBehavior::AlwaysNack => Confirm::Nack,
            ConfirmBehavior::NackFirst(n) => {
                if state.nacks_issued < n {
                    Confirm::Nack
                } else {
                    Confirm::Ack
                }
            }
        };

        match confirm {
            Confirm::Ack => state.messages.push(message),
            Confirm::Nack => state.nacks_issued += 1,
        }
        Ok(confirm)
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.state.lock().unwrap().channels_released += 1;
    }
}
