//! End-to-end publish tests against the scriptable in-memory broker.

use chrono::{DateTime, Utc};
use queue_publisher::{
    ConnectionManager, EventMeta, PublishError, PublishableEvent, Publisher,
};
use serde::Serialize;
use std::time::Duration;
use test_utils::FakeBroker;
use tokio::sync::watch;
use uuid::Uuid;

const QUEUE: &str = "settings:events";

#[derive(Debug, Clone, Serialize)]
struct SettingChanged {
    #[serde(flatten)]
    meta: EventMeta,
    name: String,
    value: String,
    is_active: bool,
}

impl SettingChanged {
    fn sample() -> Self {
        Self {
            meta: EventMeta::new(),
            name: "polling_interval".to_string(),
            value: "30s".to_string(),
            is_active: true,
        }
    }
}

impl PublishableEvent for SettingChanged {
    fn event_id(&self) -> Uuid {
        self.meta.id()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.meta.created()
    }
}

fn publisher_with(broker: &FakeBroker, retry_count: u32) -> Publisher {
    let manager = ConnectionManager::new(broker.connector(), retry_count);
    Publisher::new(manager).with_retry_count(retry_count)
}

#[tokio::test]
async fn publish_succeeds_first_attempt_with_one_channel_and_declaration() {
    let broker = FakeBroker::new();
    let publisher = publisher_with(&broker, 5);
    let event = SettingChanged::sample();

    publisher.publish(QUEUE, &event).await.unwrap();

    assert_eq!(broker.channels_opened(), 1);
    assert_eq!(broker.channels_released(), 1);
    assert_eq!(broker.declare_calls(), 1);
    assert_eq!(broker.declared_queues(), vec![QUEUE.to_string()]);
    assert_eq!(broker.confirms_enabled(), 1);
    assert_eq!(broker.publish_attempts(), 1);

    let messages = broker.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].queue, QUEUE);
    assert!(messages[0].properties.persistent);
    assert!(messages[0].properties.mandatory);
}

#[tokio::test]
async fn wire_payload_carries_identity_timestamp_and_fields() {
    let broker = FakeBroker::new();
    let publisher = publisher_with(&broker, 5);
    let event = SettingChanged::sample();

    publisher.publish(QUEUE, &event).await.unwrap();

    let messages = broker.messages();
    let json: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
    assert_eq!(json["id"].as_str().unwrap(), event.event_id().to_string());
    assert!(json["created"].as_str().unwrap().contains('T'));
    assert_eq!(json["name"], "polling_interval");
    assert_eq!(json["value"], "30s");
    assert_eq!(json["is_active"], true);
}

#[tokio::test]
async fn declaring_the_same_queue_twice_is_idempotent() {
    let broker = FakeBroker::new();
    let publisher = publisher_with(&broker, 5);

    publisher.publish(QUEUE, &SettingChanged::sample()).await.unwrap();
    publisher.publish(QUEUE, &SettingChanged::sample()).await.unwrap();

    assert_eq!(broker.declare_calls(), 2);
    assert_eq!(broker.declared_queues().len(), 1); // No duplicate resource
    assert_eq!(broker.messages().len(), 2);
    // Each call opened and released exactly one private channel.
    assert_eq!(broker.channels_opened(), 2);
    assert_eq!(broker.channels_released(), 2);
}

#[tokio::test]
async fn empty_destination_is_rejected_without_broker_contact() {
    let broker = FakeBroker::new();
    let publisher = publisher_with(&broker, 5);

    let result = publisher.publish("", &SettingChanged::sample()).await;

    assert!(matches!(result, Err(PublishError::EmptyDestination)));
    assert_eq!(broker.connect_attempts(), 0);
    assert_eq!(broker.channels_opened(), 0);
}

#[tokio::test]
async fn publish_connects_on_demand() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::new(broker.connector(), 5);
    let publisher = Publisher::new(manager.clone());

    assert!(!manager.is_connected().await);
    publisher.publish(QUEUE, &SettingChanged::sample()).await.unwrap();

    assert!(manager.is_connected().await);
    assert_eq!(broker.connect_attempts(), 1);
}

#[tokio::test]
async fn publish_reconnects_after_broker_side_disconnect() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::new(broker.connector(), 5);
    let publisher = Publisher::new(manager.clone());

    assert!(manager.try_connect().await);
    broker.kill_current_connection();

    publisher.publish(QUEUE, &SettingChanged::sample()).await.unwrap();

    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(broker.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn nacked_publishes_are_retried_with_backoff_until_accepted() {
    let broker = FakeBroker::new();
    broker.nack_first(2);
    let publisher = publisher_with(&broker, 5);

    let start = tokio::time::Instant::now();
    publisher.publish(QUEUE, &SettingChanged::sample()).await.unwrap();

    // Rejected twice, accepted on the third attempt.
    assert_eq!(broker.publish_attempts(), 3);
    assert_eq!(broker.messages().len(), 1);
    // Cumulative backoff before the two retries: 1s + 2s.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn always_nacking_broker_exhausts_retries() {
    let broker = FakeBroker::new();
    broker.always_nack();
    let publisher = publisher_with(&broker, 3);

    let result = publisher.publish(QUEUE, &SettingChanged::sample()).await;

    assert_eq!(broker.publish_attempts(), 3);
    assert!(broker.messages().is_empty()); // Never falsely marked delivered
    match result {
        Err(PublishError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, PublishError::Nacked(_)));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_confirms_hit_the_bounded_timeout() {
    let broker = FakeBroker::new();
    broker.stall_confirms();
    let manager = ConnectionManager::new(broker.connector(), 2);
    let publisher = Publisher::new(manager)
        .with_retry_count(2)
        .with_confirm_timeout(Duration::from_secs(5));

    let result = publisher.publish(QUEUE, &SettingChanged::sample()).await;

    match result {
        Err(PublishError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, PublishError::ConfirmTimeout(_)));
        }
        other => panic!("expected exhaustion on confirm timeout, got {other:?}"),
    }
    assert!(broker.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_broker_fails_fast_after_best_effort_connect() {
    let broker = FakeBroker::new();
    broker.refuse_connections();
    let publisher = publisher_with(&broker, 3);

    let result = publisher.publish(QUEUE, &SettingChanged::sample()).await;

    // The best-effort connect burns its retries, then channel creation
    // fails fast with the unavailable error.
    assert!(matches!(result, Err(PublishError::NotConnected)));
    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(broker.channels_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_at_a_retry_boundary_abandons_the_publish() {
    let broker = FakeBroker::new();
    broker.always_nack();
    let publisher = publisher_with(&broker, 5);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let task = tokio::spawn({
        let publisher = publisher.clone();
        async move {
            publisher
                .publish_cancellable(QUEUE, &SettingChanged::sample(), cancel_rx)
                .await
        }
    });

    // Let the first attempt fail and the backoff begin, then cancel.
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel_tx.send(true).unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(PublishError::Cancelled)));
    assert_eq!(broker.publish_attempts(), 1);
}

#[tokio::test]
async fn concurrent_publishes_use_private_channels() {
    let broker = FakeBroker::new();
    let publisher = publisher_with(&broker, 5);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish(QUEUE, &SettingChanged::sample()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(broker.messages().len(), 4);
    assert_eq!(broker.channels_opened(), 4);
    assert_eq!(broker.channels_released(), 4);
}
