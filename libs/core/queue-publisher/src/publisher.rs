//! Confirmed event publishing
//!
//! Each publish call ensures connectivity, derives a private channel,
//! idempotently declares the destination queue, serializes the event to JSON
//! bytes, and publishes persistent + mandatory with publish confirmation
//! under the shared retry policy. Exhaustion surfaces to the caller; the
//! event is never silently dropped.

use crate::config::{BrokerConfig, DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_RETRY_COUNT};
use crate::connection::ConnectionManager;
use crate::error::PublishError;
use crate::event::PublishableEvent;
use crate::metrics::PublisherMetrics;
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::{Confirm, MessageProperties, QueueProperties};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Publishes events to named queues with delivery confirmation and bounded
/// retry. Safe to share across concurrent callers; every call uses its own
/// channel.
#[derive(Clone)]
pub struct Publisher {
    connection: ConnectionManager,
    retry: RetryPolicy,
    confirm_timeout: Duration,
}

impl Publisher {
    /// Create a publisher with the default retry count and confirm timeout.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            retry: RetryPolicy::new(DEFAULT_RETRY_COUNT),
            confirm_timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
        }
    }

    /// Create a publisher using the configured retry count and confirm
    /// timeout, the same settings the connection manager connects with.
    pub fn from_config(connection: ConnectionManager, config: &BrokerConfig) -> Self {
        Self {
            connection,
            retry: RetryPolicy::new(config.retry_count),
            confirm_timeout: config.confirm_timeout(),
        }
    }

    /// Set the publish retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry = RetryPolicy::new(retry_count);
        self
    }

    /// Set the bound on the wait for a publish confirmation.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Publish `event` to the queue named `queue_name` and wait for the
    /// broker to confirm delivery.
    ///
    /// Transport failures, nacks and confirm timeouts are retried with
    /// exponential backoff; when retries are exhausted the final error is
    /// surfaced as [`PublishError::Exhausted`] and the event must be treated
    /// as undelivered.
    pub async fn publish<E: PublishableEvent>(
        &self,
        queue_name: &str,
        event: &E,
    ) -> Result<(), PublishError> {
        self.publish_inner(queue_name, event, None).await
    }

    /// Like [`publish`](Self::publish), but abandons the call when `cancel`
    /// turns true at a retry boundary. An in-flight publish attempt is never
    /// interrupted; only subsequent retries are skipped.
    pub async fn publish_cancellable<E: PublishableEvent>(
        &self,
        queue_name: &str,
        event: &E,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), PublishError> {
        self.publish_inner(queue_name, event, Some(cancel)).await
    }

    async fn publish_inner<E: PublishableEvent>(
        &self,
        queue_name: &str,
        event: &E,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<(), PublishError> {
        if queue_name.is_empty() {
            return Err(PublishError::EmptyDestination);
        }

        let metrics = PublisherMetrics::new(queue_name);
        let started = Instant::now();

        match self.deliver(queue_name, event, cancel, &metrics).await {
            Ok(()) => {
                metrics.published(started.elapsed());
                info!(
                    queue = %queue_name,
                    event_id = %event.event_id(),
                    "event published to broker"
                );
                Ok(())
            }
            Err(err) => {
                metrics.failed();
                Err(err)
            }
        }
    }

    async fn deliver<E: PublishableEvent>(
        &self,
        queue_name: &str,
        event: &E,
        cancel: Option<watch::Receiver<bool>>,
        metrics: &PublisherMetrics,
    ) -> Result<(), PublishError> {
        if !self.connection.is_connected().await {
            // Best effort: if this fails, channel creation below fails fast.
            self.connection.try_connect().await;
        }

        // One private channel per call, released on drop on every exit path.
        let mut channel = self.connection.create_channel().await?;

        channel
            .declare_queue(queue_name, QueueProperties::default())
            .await?;

        let payload = serde_json::to_string(event)?.into_bytes();

        channel.enable_confirms().await?;

        let confirm_timeout = self.confirm_timeout;
        let operation = async || {
            channel
                .publish(queue_name, &payload, MessageProperties::default())
                .await?;

            match tokio::time::timeout(confirm_timeout, channel.wait_for_confirm()).await {
                Ok(Ok(Confirm::Ack)) => Ok(()),
                Ok(Ok(Confirm::Nack)) => Err(PublishError::nacked("broker refused the message")),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(PublishError::ConfirmTimeout(confirm_timeout)),
            }
        };
        let on_retry = |err: &PublishError, wait: Duration| {
            warn!(
                queue = %queue_name,
                event_id = %event.event_id(),
                wait = ?wait,
                error = %err,
                "event publish failed, retrying"
            );
            metrics.retried();
        };

        // Erase the retry future to a `Send` trait object so `publish` yields a
        // `Send` future; rustc cannot otherwise prove the `AsyncFnMut`
        // operation's future `Send`, which callers that spawn `publish` need.
        let result = match cancel {
            None => {
                let fut = self.retry.execute(
                    operation,
                    PublishError::is_retryable_publish,
                    on_retry,
                );
                let fut: Pin<Box<dyn Future<Output = Result<(), RetryError<PublishError>>> + Send>> =
                    Box::pin(fut);
                fut.await
            }
            Some(rx) => {
                let fut = self.retry.execute_cancellable(
                    operation,
                    PublishError::is_retryable_publish,
                    on_retry,
                    rx,
                );
                let fut: Pin<Box<dyn Future<Output = Result<(), RetryError<PublishError>>> + Send>> =
                    Box::pin(fut);
                fut.await
            }
        };

        result.map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => PublishError::Exhausted {
                attempts,
                source: Box::new(last),
            },
            RetryError::Aborted(err) => err,
            RetryError::Cancelled => PublishError::Cancelled,
        })
    }
}
