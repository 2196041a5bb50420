//! Domain event contract for the CoreBank platform.
//!
//! Every event is a self-describing envelope with a partition key; events
//! sharing a partition key are delivered in publish order. Domain crates
//! never publish directly while holding state locks — they enqueue into the
//! [`Outbox`] inside the write path and the pump forwards rows afterwards.

#![deny(unsafe_code)]

pub mod outbox;

pub use outbox::{Outbox, OutboxPump, OutboxRow};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Event bus topics.
pub mod topics {
    pub const ACCOUNT_EVENTS: &str = "account.events";
    pub const TRANSFER_EVENTS: &str = "transfer.events";
    pub const SEPA_EVENTS: &str = "sepa.events";
    pub const SWIFT_EVENTS: &str = "swift.events";
    pub const AML_EVENTS: &str = "aml.events";
    pub const USER_EVENTS: &str = "user.events";
}

/// Versioned event type names.
pub mod event_types {
    pub const ACCOUNT_POSTED: &str = "account.posted.v1";
    pub const ACCOUNT_STATUS_CHANGED: &str = "account.status_changed.v1";
    pub const TRANSFER_INITIATED: &str = "transfer.initiated.v1";
    pub const TRANSFER_COMPLETED: &str = "transfer.completed.v1";
    pub const TRANSFER_COMPENSATED: &str = "transfer.compensated.v1";
    pub const TRANSFER_FAILED: &str = "transfer.failed.v1";
    pub const TRANSFER_COMPENSATION_FAILED: &str = "transfer.compensation_failed.v1";
    pub const SEPA_BATCH_SUBMITTED: &str = "sepa.batch_submitted.v1";
    pub const SEPA_RETURN_REFUNDED: &str = "sepa.return_refunded.v1";
    pub const SWIFT_SUBMITTED: &str = "swift.submitted.v1";
    pub const AML_ALERT_CREATED: &str = "aml.alert.created.v1";
    pub const AML_CASE_ESCALATED: &str = "aml.case.escalated.v1";
    pub const CUSTOMER_STATUS_CHANGED: &str = "customer.status_changed.v1";
    pub const USER_LOCKED: &str = "user.locked.v1";
}

/// Self-describing domain event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub partition_key: String,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        partition_key: impl Into<String>,
        payload: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            occurred_at,
            partition_key: partition_key.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event publish failed: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EventError {
    pub fn error_kind(&self) -> corebank_types::ErrorKind {
        corebank_types::ErrorKind::Dependency
    }
}

/// Publisher seam; the broker behind it is immaterial to domain code.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: EventEnvelope) -> Result<(), EventError>;
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

#[derive(Default)]
struct BusState {
    log: HashMap<String, Vec<EventEnvelope>>,
    subscribers: HashMap<String, Vec<UnboundedSender<EventEnvelope>>>,
}

/// In-process event bus with a per-topic append log.
///
/// A single publish path per topic gives per-partition-key FIFO delivery;
/// the log doubles as the assertion surface in tests.
#[derive(Default)]
pub struct InMemoryEventBus {
    state: RwLock<BusState>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, topic: &str) -> UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// All events published to `topic`, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        let state = self.state.read().await;
        state.log.get(topic).cloned().unwrap_or_default()
    }

    pub async fn published_of_type(&self, topic: &str, event_type: &str) -> Vec<EventEnvelope> {
        self.published(topic)
            .await
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: EventEnvelope) -> Result<(), EventError> {
        let mut state = self.state.write().await;
        state
            .log
            .entry(topic.to_string())
            .or_default()
            .push(event.clone());
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        tracing::debug!(topic, event_type = %event.event_type, "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn publishes_in_order_per_topic() {
        let bus = InMemoryEventBus::new();
        for n in 0..3 {
            let event = EventEnvelope::new(
                event_types::ACCOUNT_POSTED,
                "ACC-1",
                json!({ "n": n }),
                Utc::now(),
            );
            bus.publish(topics::ACCOUNT_EVENTS, event).await.unwrap();
        }

        let seen = bus.published(topics::ACCOUNT_EVENTS).await;
        assert_eq!(seen.len(), 3);
        let order: Vec<i64> = seen
            .iter()
            .map(|e| e.payload.get("n").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = InMemoryEventBus::new();
        let mut rx = bus.subscribe(topics::TRANSFER_EVENTS).await;

        let event = EventEnvelope::new(
            event_types::TRANSFER_COMPLETED,
            "TRF-1",
            json!({}),
            Utc::now(),
        );
        bus.publish(topics::TRANSFER_EVENTS, event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, event_types::TRANSFER_COMPLETED);
        assert_eq!(received.partition_key, "TRF-1");
    }
}
