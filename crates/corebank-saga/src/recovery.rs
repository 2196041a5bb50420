use crate::{SagaError, SagaRecord, SharedSagaStore};
use chrono::Duration;
use corebank_types::{Clock, SharedClock};

/// Finds sagas that stopped making progress.
///
/// A saga is stuck when it is non-terminal and its record has not been
/// touched for longer than the configured threshold. The owner of the saga's
/// step list decides how to resume it; this scan only surfaces candidates.
pub struct RecoveryScan {
    store: SharedSagaStore,
    clock: SharedClock,
    stuck_threshold: Duration,
}

impl RecoveryScan {
    pub fn new(store: SharedSagaStore, clock: SharedClock, stuck_threshold: Duration) -> Self {
        Self {
            store,
            clock,
            stuck_threshold,
        }
    }

    pub async fn stuck_sagas(&self) -> Result<Vec<SagaRecord>, SagaError> {
        let now = self.clock.now();
        let mut stuck: Vec<SagaRecord> = self
            .store
            .non_terminal()
            .await?
            .into_iter()
            .filter(|record| now - record.updated_at > self.stuck_threshold)
            .collect();
        stuck.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        if !stuck.is_empty() {
            tracing::warn!(count = stuck.len(), "stuck sagas detected");
        }
        Ok(stuck)
    }
}
