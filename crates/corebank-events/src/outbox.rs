use crate::{EventEnvelope, EventError, SharedPublisher};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One undelivered event, written in the same critical section as the domain
/// change it describes.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub row_id: u64,
    pub topic: String,
    pub event: EventEnvelope,
    pub enqueued_at: DateTime<Utc>,
}

/// Transactional outbox.
///
/// Writers call [`Outbox::enqueue`] while still holding their state lock, so
/// a domain change and its event become visible together. Row locks are a
/// plain mutex: enqueue never awaits.
#[derive(Default)]
pub struct Outbox {
    rows: Mutex<VecDeque<OutboxRow>>,
    next_row_id: AtomicU64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, topic: impl Into<String>, event: EventEnvelope) {
        let row = OutboxRow {
            row_id: self.next_row_id.fetch_add(1, Ordering::Relaxed),
            topic: topic.into(),
            enqueued_at: event.occurred_at,
            event,
        };
        self.rows.lock().expect("outbox lock poisoned").push_back(row);
    }

    pub fn pending(&self) -> usize {
        self.rows.lock().expect("outbox lock poisoned").len()
    }

    fn take_batch(&self, max: usize) -> Vec<OutboxRow> {
        let mut rows = self.rows.lock().expect("outbox lock poisoned");
        let take = rows.len().min(max);
        rows.drain(..take).collect()
    }

    fn requeue_front(&self, pending: Vec<OutboxRow>) {
        let mut rows = self.rows.lock().expect("outbox lock poisoned");
        for row in pending.into_iter().rev() {
            rows.push_front(row);
        }
    }
}

/// Forwards outbox rows to the event bus in enqueue order.
pub struct OutboxPump {
    outbox: Arc<Outbox>,
    publisher: SharedPublisher,
    interval: Duration,
    batch_size: usize,
}

impl OutboxPump {
    pub fn new(outbox: Arc<Outbox>, publisher: SharedPublisher, interval: Duration) -> Self {
        Self {
            outbox,
            publisher,
            interval,
            batch_size: 256,
        }
    }

    /// Drain one batch. Rows that could not be published stay queued in
    /// their original order.
    pub async fn run_once(&self) -> Result<usize, EventError> {
        let batch = self.outbox.take_batch(self.batch_size);
        let total = batch.len();
        let mut remaining = batch.into_iter();

        while let Some(row) = remaining.next() {
            if let Err(err) = self.publisher.publish(&row.topic, row.event.clone()).await {
                let mut unpublished = vec![row];
                unpublished.extend(remaining);
                let requeued = unpublished.len();
                self.outbox.requeue_front(unpublished);
                tracing::warn!(error = %err, requeued, "outbox publish failed");
                return Err(err);
            }
        }

        Ok(total)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::warn!(error = %err, "outbox pump iteration failed");
                }
            }
        })
    }
}
