use crate::steps::{
    ConfirmStep, CreditDestinationStep, DebitSourceStep, ValidateStep, VALIDATE_STEP,
};
use crate::transfer::{Transfer, TransferStatus};
use crate::TransferError;
use chrono::Duration;
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_ledger::Ledger;
use corebank_saga::{
    SagaContext, SagaOrchestrator, SagaOutcome, SagaRecord, SagaStep, SharedSagaStore,
};
use corebank_types::{new_reference, Clock, Money, SharedClock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TransferServiceConfig {
    /// Budget per saga step; the saga deadline is steps × this.
    pub step_timeout: Duration,
    /// Age after which an in-flight transfer is considered stuck.
    pub stuck_threshold: Duration,
}

impl Default for TransferServiceConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::seconds(30),
            stuck_threshold: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitiateTransferRequest {
    pub from_account: String,
    pub to_account: String,
    pub amount: Money,
    pub idempotency_key: Option<String>,
}

/// Result of an initiation; `replayed` marks an idempotency-key hit.
#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub transfer: Transfer,
    pub replayed: bool,
}

#[derive(Default)]
struct TransferState {
    transfers: HashMap<String, Transfer>,
    by_idempotency_key: HashMap<String, String>,
}

/// Owns the `Transfer` aggregate and drives its saga against the ledger.
pub struct TransferService {
    ledger: Arc<Ledger>,
    saga_store: SharedSagaStore,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    config: TransferServiceConfig,
    state: RwLock<TransferState>,
}

impl TransferService {
    pub fn new(
        ledger: Arc<Ledger>,
        saga_store: SharedSagaStore,
        outbox: Arc<Outbox>,
        clock: SharedClock,
        config: TransferServiceConfig,
    ) -> Self {
        Self {
            ledger,
            saga_store,
            outbox,
            clock,
            config,
            state: RwLock::new(TransferState::default()),
        }
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.ledger.clone()
    }

    pub fn config(&self) -> &TransferServiceConfig {
        &self.config
    }

    /// Initiate a transfer. A request whose idempotency key matches an
    /// existing transfer returns that aggregate unchanged; no new saga runs.
    pub async fn initiate_transfer(
        &self,
        request: InitiateTransferRequest,
    ) -> Result<InitiateOutcome, TransferError> {
        let idempotency_key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(existing) = self.find_by_idempotency_key(&idempotency_key).await {
            tracing::info!(
                transfer = %existing.transfer_reference,
                key = %idempotency_key,
                "idempotency replay, returning existing transfer"
            );
            return Ok(InitiateOutcome {
                transfer: existing,
                replayed: true,
            });
        }

        let now = self.clock.now();
        let transfer = Transfer {
            transfer_reference: new_reference("TRF"),
            from_account: request.from_account,
            to_account: request.to_account,
            amount: request.amount,
            status: TransferStatus::Pending,
            idempotency_key: idempotency_key.clone(),
            debit_posting_id: None,
            credit_posting_id: None,
            initiated_at: now,
            completed_at: None,
            failure_reason: None,
            version: 0,
        };

        {
            let mut state = self.state.write().await;
            // Double-check under the write lock so two racing requests with
            // the same key cannot both create an aggregate.
            if let Some(reference) = state.by_idempotency_key.get(&idempotency_key) {
                let existing = state.transfers[reference].clone();
                return Ok(InitiateOutcome {
                    transfer: existing,
                    replayed: true,
                });
            }
            state
                .by_idempotency_key
                .insert(idempotency_key, transfer.transfer_reference.clone());
            state
                .transfers
                .insert(transfer.transfer_reference.clone(), transfer.clone());
        }

        self.outbox.enqueue(
            topics::TRANSFER_EVENTS,
            EventEnvelope::new(
                event_types::TRANSFER_INITIATED,
                transfer.transfer_reference.clone(),
                json!({
                    "transferReference": transfer.transfer_reference,
                    "fromAccount": transfer.from_account,
                    "toAccount": transfer.to_account,
                    "amountMinor": transfer.amount.minor_units,
                    "currency": transfer.amount.currency.as_str(),
                }),
                now,
            ),
        );
        tracing::info!(transfer = %transfer.transfer_reference, "transfer initiated");

        let ctx = self.saga_context(&transfer.transfer_reference);
        let orchestrator = self.orchestrator();
        let mut aggregate = transfer.clone();
        let outcome = orchestrator
            .run(&ctx, &transfer.transfer_reference, &mut aggregate)
            .await?;
        let finished = self.finalize(aggregate, outcome).await;

        Ok(InitiateOutcome {
            transfer: finished,
            replayed: false,
        })
    }

    /// Resume a transfer from its persisted saga record; used by the
    /// recovery loop for transfers stuck in an in-flight state.
    pub async fn resume_transfer(&self, record: SagaRecord) -> Result<Transfer, TransferError> {
        let transfer = self
            .get_transfer(&record.aggregate_ref)
            .await?;
        if transfer.status.is_terminal() {
            return Ok(transfer);
        }

        let ctx = self.saga_context(&record.saga_id);
        let orchestrator = self.orchestrator();
        let mut aggregate = transfer;
        let outcome = orchestrator.resume(&ctx, record, &mut aggregate).await?;
        Ok(self.finalize(aggregate, outcome).await)
    }

    pub async fn get_transfer(&self, reference: &str) -> Result<Transfer, TransferError> {
        let state = self.state.read().await;
        state
            .transfers
            .get(reference)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(reference.to_string()))
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<Transfer> {
        let state = self.state.read().await;
        let reference = state.by_idempotency_key.get(key)?;
        state.transfers.get(reference).cloned()
    }

    pub async fn list_transfers(&self) -> Vec<Transfer> {
        let state = self.state.read().await;
        let mut transfers: Vec<Transfer> = state.transfers.values().cloned().collect();
        transfers.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at));
        transfers
    }

    fn saga_context(&self, saga_id: &str) -> SagaContext {
        let deadline = self.clock.now() + self.config.step_timeout * 4;
        SagaContext::new(saga_id, self.clock.clone()).with_deadline(deadline)
    }

    fn orchestrator(&self) -> SagaOrchestrator<Transfer> {
        let steps: Vec<Arc<dyn SagaStep<Transfer>>> = vec![
            Arc::new(ValidateStep {
                ledger: self.ledger.clone(),
            }),
            Arc::new(DebitSourceStep {
                ledger: self.ledger.clone(),
            }),
            Arc::new(CreditDestinationStep {
                ledger: self.ledger.clone(),
            }),
            Arc::new(ConfirmStep {
                outbox: self.outbox.clone(),
                clock: self.clock.clone(),
            }),
        ];
        SagaOrchestrator::new(steps, self.saga_store.clone(), self.clock.clone())
    }

    async fn finalize(&self, mut transfer: Transfer, outcome: SagaOutcome) -> Transfer {
        let now = self.clock.now();
        match outcome {
            SagaOutcome::Completed => {}
            SagaOutcome::Compensated {
                failed_step,
                reason,
            } => {
                if failed_step == VALIDATE_STEP {
                    // Nothing executed, nothing to compensate: plain failure.
                    transfer.status = TransferStatus::Failed;
                } else {
                    transfer.status = TransferStatus::Compensated;
                }
                transfer.failure_reason = Some(reason.clone());
                let (event_type, status) = match transfer.status {
                    TransferStatus::Failed => (event_types::TRANSFER_FAILED, "FAILED"),
                    _ => (event_types::TRANSFER_COMPENSATED, "COMPENSATED"),
                };
                self.outbox.enqueue(
                    topics::TRANSFER_EVENTS,
                    EventEnvelope::new(
                        event_type,
                        transfer.transfer_reference.clone(),
                        json!({
                            "transferReference": transfer.transfer_reference,
                            "status": status,
                            "reason": reason,
                        }),
                        now,
                    ),
                );
            }
            SagaOutcome::Failed { reason } => {
                transfer.status = TransferStatus::Failed;
                transfer.failure_reason = Some(reason.clone());
                // Compensation went wrong: raise the operational alert.
                self.outbox.enqueue(
                    topics::TRANSFER_EVENTS,
                    EventEnvelope::new(
                        event_types::TRANSFER_COMPENSATION_FAILED,
                        transfer.transfer_reference.clone(),
                        json!({
                            "transferReference": transfer.transfer_reference,
                            "reason": reason,
                        }),
                        now,
                    ),
                );
                tracing::error!(
                    transfer = %transfer.transfer_reference,
                    reason = %reason,
                    "transfer compensation failed, manual intervention required"
                );
            }
        }

        transfer.version += 1;
        let snapshot = transfer.clone();
        let mut state = self.state.write().await;
        state
            .transfers
            .insert(snapshot.transfer_reference.clone(), snapshot);
        transfer
    }

    #[cfg(test)]
    pub(crate) async fn insert_transfer_for_test(&self, transfer: Transfer) {
        let mut state = self.state.write().await;
        state
            .by_idempotency_key
            .insert(transfer.idempotency_key.clone(), transfer.transfer_reference.clone());
        state
            .transfers
            .insert(transfer.transfer_reference.clone(), transfer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_ledger::{AccountType, JournalStorageConfig, LedgerConfig, PostingDirection};
    use corebank_saga::{InMemorySagaStore, SagaState, SagaStore};
    use corebank_types::{Currency, SystemClock};

    fn try_money(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("TRY").unwrap())
    }

    struct Harness {
        service: TransferService,
        ledger: Arc<Ledger>,
        saga_store: SharedSagaStore,
    }

    async fn harness() -> Harness {
        let outbox = Arc::new(Outbox::new());
        let clock: SharedClock = Arc::new(SystemClock);
        let ledger = Arc::new(
            Ledger::bootstrap(
                JournalStorageConfig::Memory,
                outbox.clone(),
                clock.clone(),
                LedgerConfig::default(),
            )
            .await
            .unwrap(),
        );
        let saga_store: SharedSagaStore = Arc::new(InMemorySagaStore::new());
        let service = TransferService::new(
            ledger.clone(),
            saga_store.clone(),
            outbox,
            clock,
            TransferServiceConfig::default(),
        );
        Harness {
            service,
            ledger,
            saga_store,
        }
    }

    fn request(from: &str, to: &str, minor: i64, key: Option<&str>) -> InitiateTransferRequest {
        InitiateTransferRequest {
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount: try_money(minor),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn happy_transfer_moves_money_and_replays_idempotently() {
        let h = harness().await;
        let a = h
            .ledger
            .open_account("CUST-A", AccountType::Checking, try_money(100_000))
            .await
            .unwrap();
        let b = h
            .ledger
            .open_account("CUST-B", AccountType::Checking, try_money(0))
            .await
            .unwrap();

        let outcome = h
            .service
            .initiate_transfer(request(&a.account_number, &b.account_number, 30_000, Some("k1")))
            .await
            .unwrap();
        assert!(!outcome.replayed);
        let transfer = outcome.transfer;
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.completed_at.is_some());
        assert!(transfer.debit_posting_id.is_some());
        assert!(transfer.credit_posting_id.is_some());

        assert_eq!(
            h.ledger.balance(&a.account_number).await.unwrap().minor_units,
            70_000
        );
        assert_eq!(
            h.ledger.balance(&b.account_number).await.unwrap().minor_units,
            30_000
        );

        // Exactly one debit on A and one credit on B under the reference.
        let debit_lines = h.ledger.history(&a.account_number, None, None).await.unwrap();
        assert_eq!(
            debit_lines
                .iter()
                .filter(|l| l.reference_id == transfer.transfer_reference
                    && l.direction == PostingDirection::Debit)
                .count(),
            1
        );

        let replay = h
            .service
            .initiate_transfer(request(&a.account_number, &b.account_number, 30_000, Some("k1")))
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.transfer.transfer_reference, transfer.transfer_reference);
        assert_eq!(
            h.ledger.balance(&a.account_number).await.unwrap().minor_units,
            70_000
        );
    }

    #[tokio::test]
    async fn validate_failure_leaves_a_failed_transfer_without_postings() {
        let h = harness().await;
        let a = h
            .ledger
            .open_account("CUST-A", AccountType::Checking, try_money(10_000))
            .await
            .unwrap();
        let b = h
            .ledger
            .open_account("CUST-B", AccountType::Checking, try_money(0))
            .await
            .unwrap();

        let outcome = h
            .service
            .initiate_transfer(request(&a.account_number, &b.account_number, 15_000, None))
            .await
            .unwrap();
        assert_eq!(outcome.transfer.status, TransferStatus::Failed);
        assert!(outcome
            .transfer
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("below transfer amount"));

        assert_eq!(
            h.ledger.balance(&a.account_number).await.unwrap().minor_units,
            10_000
        );
        // Only the opening credit exists.
        assert_eq!(
            h.ledger.history(&a.account_number, None, None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn debit_failure_after_validation_compensates_cleanly() {
        let h = harness().await;
        let clock: SharedClock = Arc::new(SystemClock);
        let a = h
            .ledger
            .open_account("CUST-A", AccountType::Checking, try_money(10_000))
            .await
            .unwrap();
        let b = h
            .ledger
            .open_account("CUST-B", AccountType::Checking, try_money(0))
            .await
            .unwrap();

        // A transfer that passed validation while funds were still there,
        // persisted mid-flight; a concurrent drain then empties the account.
        let transfer = Transfer {
            transfer_reference: "TRF-stuck-debit".to_string(),
            from_account: a.account_number.clone(),
            to_account: b.account_number.clone(),
            amount: try_money(10_000),
            status: TransferStatus::Validating,
            idempotency_key: "k-stuck-debit".to_string(),
            debit_posting_id: None,
            credit_posting_id: None,
            initiated_at: clock.now(),
            completed_at: None,
            failure_reason: None,
            version: 0,
        };
        h.service.insert_transfer_for_test(transfer).await;

        let mut record = SagaRecord::new("TRF-stuck-debit", "TRF-stuck-debit", clock.now());
        record.executed_step_ids.push(VALIDATE_STEP.to_string());
        h.saga_store.save(record.clone()).await.unwrap();

        h.ledger
            .debit(&a.account_number, try_money(9_000), "REF-drain", "concurrent drain")
            .await
            .unwrap();

        let resumed = h.service.resume_transfer(record).await.unwrap();
        assert_eq!(resumed.status, TransferStatus::Compensated);
        assert_eq!(
            h.ledger.balance(&a.account_number).await.unwrap().minor_units,
            1_000
        );
        assert_eq!(
            h.ledger.balance(&b.account_number).await.unwrap().minor_units,
            0
        );
        // No transfer postings: the debit never happened.
        let lines = h.ledger.history(&a.account_number, None, None).await.unwrap();
        assert!(lines.iter().all(|l| l.reference_id != "TRF-stuck-debit"));
    }

    #[tokio::test]
    async fn credit_failure_reverses_the_debit() {
        let h = harness().await;
        let clock: SharedClock = Arc::new(SystemClock);
        let a = h
            .ledger
            .open_account("CUST-A", AccountType::Checking, try_money(50_000))
            .await
            .unwrap();
        let b = h
            .ledger
            .open_account("CUST-B", AccountType::Checking, try_money(0))
            .await
            .unwrap();

        let transfer = Transfer {
            transfer_reference: "TRF-frozen-dest".to_string(),
            from_account: a.account_number.clone(),
            to_account: b.account_number.clone(),
            amount: try_money(10_000),
            status: TransferStatus::Validating,
            idempotency_key: "k-frozen-dest".to_string(),
            debit_posting_id: None,
            credit_posting_id: None,
            initiated_at: clock.now(),
            completed_at: None,
            failure_reason: None,
            version: 0,
        };
        h.service.insert_transfer_for_test(transfer).await;

        let mut record = SagaRecord::new("TRF-frozen-dest", "TRF-frozen-dest", clock.now());
        record.executed_step_ids.push(VALIDATE_STEP.to_string());
        h.saga_store.save(record.clone()).await.unwrap();

        // Destination freezes between validation and the credit.
        h.ledger.freeze(&b.account_number).await.unwrap();

        let resumed = h.service.resume_transfer(record).await.unwrap();
        assert_eq!(resumed.status, TransferStatus::Compensated);
        assert_eq!(
            h.ledger.balance(&a.account_number).await.unwrap().minor_units,
            50_000
        );

        // History shows the debit and its reversal.
        let lines = h.ledger.history(&a.account_number, None, None).await.unwrap();
        assert!(lines
            .iter()
            .any(|l| l.reference_id == "TRF-frozen-dest" && l.direction == PostingDirection::Debit));
        assert!(lines
            .iter()
            .any(|l| l.reference_id == "TRF-frozen-dest:REVERSAL"
                && l.direction == PostingDirection::Credit));

        let record = h.saga_store.load("TRF-frozen-dest").await.unwrap().unwrap();
        assert_eq!(record.state, SagaState::Compensated);
    }
}
