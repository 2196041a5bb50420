use crate::{SagaError, SagaRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable home of saga progress records.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn save(&self, record: SagaRecord) -> Result<(), SagaError>;

    async fn load(&self, saga_id: &str) -> Result<Option<SagaRecord>, SagaError>;

    /// Records not yet in a terminal state, for the recovery scan.
    async fn non_terminal(&self) -> Result<Vec<SagaRecord>, SagaError>;
}

pub type SharedSagaStore = Arc<dyn SagaStore>;

#[derive(Default)]
pub struct InMemorySagaStore {
    records: RwLock<HashMap<String, SagaRecord>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, record: SagaRecord) -> Result<(), SagaError> {
        let mut records = self.records.write().await;
        records.insert(record.saga_id.clone(), record);
        Ok(())
    }

    async fn load(&self, saga_id: &str) -> Result<Option<SagaRecord>, SagaError> {
        let records = self.records.read().await;
        Ok(records.get(saga_id).cloned())
    }

    async fn non_terminal(&self) -> Result<Vec<SagaRecord>, SagaError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| !record.state.is_terminal())
            .cloned()
            .collect())
    }
}
