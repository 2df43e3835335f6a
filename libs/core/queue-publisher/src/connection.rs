//! Broker connection lifecycle management
//!
//! One `ConnectionManager` owns one logical broker connection for the whole
//! process. It establishes the connection under the retry policy, listens for
//! the broker's asynchronous failure signals, and reconnects without caller
//! involvement. Callers only ever obtain short-lived channels from it.
//!
//! The connection slot is guarded by a single mutex and stamped with a
//! generation number. Every reconnect path runs under that mutex, and
//! failure-signal handlers compare generations before acting, so overlapping
//! signals produce exactly one winning reconnect; the losers observe the
//! winner's fresh connection and stand down.

use crate::config::BrokerConfig;
use crate::error::PublishError;
use crate::metrics;
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, ConnectedBroker, FailureSignal,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

struct ConnectionSlot {
    connection: Option<Box<dyn BrokerConnection>>,
    /// Bumped on every successful (re)connect; failure signals carry the
    /// generation they were subscribed under and are dropped when stale.
    generation: u64,
}

/// Owns the single long-lived broker connection and its recovery.
///
/// Cheap to clone: clones share the same connection slot and lifecycle state,
/// so the whole process observes one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    retry: RetryPolicy,
    slot: Arc<Mutex<ConnectionSlot>>,
    disposed: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Create a manager in the disconnected state.
    pub fn new(connector: Arc<dyn BrokerConnector>, retry_count: u32) -> Self {
        Self {
            connector,
            retry: RetryPolicy::new(retry_count),
            slot: Arc::new(Mutex::new(ConnectionSlot {
                connection: None,
                generation: 0,
            })),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a manager using the configured retry count.
    pub fn from_config(connector: Arc<dyn BrokerConnector>, config: &BrokerConfig) -> Self {
        Self::new(connector, config.retry_count)
    }

    /// Whether the manager has been permanently shut down.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// True iff an open connection exists and the manager has not been
    /// disposed. Reads the connection slot under the same mutex writers use,
    /// so it never observes a half-replaced connection.
    pub async fn is_connected(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let slot = self.slot.lock().await;
        matches!(slot.connection.as_ref(), Some(connection) if connection.is_open())
    }

    /// Attempt to establish a connection under the retry policy.
    ///
    /// Serialized on the connection mutex: a caller that loses the race to a
    /// concurrent reconnect observes the winner's open connection and returns
    /// true without connecting again. On exhaustion the manager stays
    /// disconnected and returns false; there is no background retry loop.
    pub async fn try_connect(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        let mut slot = self.slot.lock().await;
        if matches!(slot.connection.as_ref(), Some(connection) if connection.is_open()) {
            return true;
        }

        self.connect_locked(&mut slot).await
    }

    /// Derive a new channel from the current connection.
    ///
    /// Fails fast with [`PublishError::NotConnected`] while disconnected,
    /// including when a concurrent disconnect wins the race, and with
    /// [`PublishError::Disposed`] after shutdown.
    pub async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, PublishError> {
        if self.is_disposed() {
            return Err(PublishError::Disposed);
        }

        let slot = self.slot.lock().await;
        match slot.connection.as_ref() {
            Some(connection) if connection.is_open() => connection.open_channel().await,
            _ => Err(PublishError::NotConnected),
        }
    }

    /// Permanently shut the manager down and release the connection.
    ///
    /// Idempotent; a second call is a no-op. Teardown I/O errors are logged
    /// and suppressed, so disposal always completes.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut slot = self.slot.lock().await;
        if let Some(mut connection) = slot.connection.take() {
            if let Err(err) = connection.close().await {
                error!(error = %err, "error closing broker connection during dispose");
            }
        }
        info!("broker connection manager disposed");
    }

    /// Connect with the slot mutex held. Closes and discards any dead
    /// connection left in the slot first.
    async fn connect_locked(&self, slot: &mut ConnectionSlot) -> bool {
        if let Some(mut dead) = slot.connection.take() {
            if let Err(err) = dead.close().await {
                warn!(error = %err, "error closing dead broker connection");
            }
        }

        info!("broker client is trying to connect");

        let connector = self.connector.clone();
        let execute = self.retry.execute(
            move || {
                let connector = connector.clone();
                Box::pin(async move { connector.connect().await })
                    as Pin<Box<dyn Future<Output = Result<ConnectedBroker, PublishError>> + Send>>
            },
            PublishError::is_transient,
            |err, wait| {
                warn!(
                    wait = ?wait,
                    error = %err,
                    "broker client could not connect, retrying"
                );
            },
        );
        // Erase the retry future to a `Send` trait object here, where the proof
        // is local, so the recursive failure-listener spawn need not re-derive
        // `Send` through the `AsyncFnMut` operation bound.
        let execute: Pin<
            Box<dyn Future<Output = Result<ConnectedBroker, RetryError<PublishError>>> + Send>,
        > = Box::pin(execute);
        let result = execute.await;

        match result {
            Ok(ConnectedBroker {
                connection,
                failures,
            }) => {
                slot.generation += 1;
                info!(
                    endpoint = %connection.endpoint(),
                    "broker client acquired a persistent connection and subscribed to failure signals"
                );
                slot.connection = Some(connection);
                metrics::connection_established();
                self.spawn_failure_listener(slot.generation, failures);
                true
            }
            Err(err) => {
                error!(error = %err, "broker connection could not be created and opened");
                metrics::connect_failed();
                false
            }
        }
    }

    /// Drain one connection's failure-signal stream. The task ends when the
    /// connection (and with it the signal sender) is dropped.
    fn spawn_failure_listener(&self, generation: u64, mut failures: mpsc::Receiver<FailureSignal>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = failures.recv().await {
                manager.clone().handle_failure_signal(generation, signal).await;
            }
        });
    }

    // Returns a boxed future so the `Send` proof for the spawned failure
    // listener terminates at a trait-object boundary: reconnecting here spawns
    // a new listener whose future calls back into this method, and rustc
    // cannot otherwise prove that mutually recursive `async` chain is `Send`.
    fn handle_failure_signal(
        self,
        generation: u64,
        signal: FailureSignal,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(async move {
            if self.is_disposed() {
                return;
            }

            let mut slot = self.slot.lock().await;

            // Disposal may have won the lock while the signal waited.
            if self.is_disposed() {
                return;
            }

            // A newer connection already replaced the one this signal belongs to.
            if slot.generation != generation {
                return;
            }

            warn!(
                signal = signal.as_str(),
                "broker connection failure signal received, trying to re-connect"
            );
            metrics::reconnect_triggered(signal.as_str());

            self.connect_locked(&mut slot).await;
        })
    }
}
