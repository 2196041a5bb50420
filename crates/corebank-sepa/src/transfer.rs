use crate::batch::{SepaBatch, SepaBatchStatus, SepaBatchType};
use crate::iso20022;
use crate::SepaError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_ledger::Ledger;
use corebank_saga::{
    SagaContext, SagaOrchestrator, SagaOutcome, SagaStep, SharedSagaStore, StepFailure,
};
use corebank_types::{new_reference, Clock, Money, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SepaTransferStatus {
    Pending,
    Validating,
    DebitPending,
    Submitted,
    AwaitingSettlement,
    Settled,
    Compensated,
    Failed,
}

impl SepaTransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Compensated | Self::Failed)
    }
}

impl fmt::Display for SepaTransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::DebitPending => "DEBIT_PENDING",
            Self::Submitted => "SUBMITTED",
            Self::AwaitingSettlement => "AWAITING_SETTLEMENT",
            Self::Settled => "SETTLED",
            Self::Compensated => "COMPENSATED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outgoing SEPA credit transfer. The debtor side is an internal ledger
/// account; the creditor side lives behind the settlement network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SepaCreditTransfer {
    pub sepa_reference: String,
    pub end_to_end_id: String,
    pub debtor_account: String,
    pub debtor_iban: String,
    pub debtor_name: String,
    pub creditor_iban: String,
    pub creditor_name: String,
    pub amount: Money,
    pub instant: bool,
    pub status: SepaTransferStatus,
    pub batch_id: Option<String>,
    pub network_reference: Option<String>,
    pub remittance_info: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl SepaCreditTransfer {
    pub fn reversal_reference(&self) -> String {
        format!("{}:REVERSAL", self.sepa_reference)
    }
}

/// Settlement acknowledgment from the network.
#[derive(Debug, Clone)]
pub struct SettlementAck {
    pub network_reference: String,
    pub accepted: bool,
    pub reason: Option<String>,
}

/// Opaque acknowledger standing in for the SEPA clearing network.
#[async_trait]
pub trait SettlementNetwork: Send + Sync {
    async fn submit(&self, xml: &str, message_id: &str) -> Result<String, SepaError>;

    async fn await_acknowledgment(&self, network_reference: &str) -> Result<SettlementAck, SepaError>;
}

/// Network double that acknowledges (or rejects) everything.
pub struct MockSettlementNetwork {
    pub accept_all: bool,
}

#[async_trait]
impl SettlementNetwork for MockSettlementNetwork {
    async fn submit(&self, _xml: &str, message_id: &str) -> Result<String, SepaError> {
        Ok(format!("NET-{message_id}"))
    }

    async fn await_acknowledgment(
        &self,
        network_reference: &str,
    ) -> Result<SettlementAck, SepaError> {
        Ok(SettlementAck {
            network_reference: network_reference.to_string(),
            accepted: self.accept_all,
            reason: if self.accept_all {
                None
            } else {
                Some("rejected by clearing".to_string())
            },
        })
    }
}

pub(crate) fn iban_plausible(iban: &str) -> bool {
    let len = iban.len();
    if !(15..=34).contains(&len) {
        return false;
    }
    let bytes = iban.as_bytes();
    bytes[0].is_ascii_uppercase()
        && bytes[1].is_ascii_uppercase()
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && iban.chars().all(|c| c.is_ascii_alphanumeric())
}

const VALIDATE_STEP: &str = "sct-validate";
const DEBIT_STEP: &str = "sct-debit-debtor";
const SUBMIT_STEP: &str = "sct-submit";
const AWAIT_ACK_STEP: &str = "sct-await-ack";

struct ValidateSctStep {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl SagaStep<SepaCreditTransfer> for ValidateSctStep {
    fn step_id(&self) -> &'static str {
        VALIDATE_STEP
    }

    async fn execute(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        transfer.status = SepaTransferStatus::Validating;
        validate_sct(transfer).map_err(|e| StepFailure::new(e.to_string()))?;
        let debtor = self
            .ledger
            .account(&transfer.debtor_account)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        if !debtor.status.accepts_postings() {
            return Err(StepFailure::new(format!(
                "debtor account is {}",
                debtor.status
            )));
        }
        if debtor.balance.minor_units < transfer.amount.minor_units {
            return Err(StepFailure::new("debtor balance below transfer amount"));
        }
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        _transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        Ok(())
    }
}

struct DebitDebtorStep {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl SagaStep<SepaCreditTransfer> for DebitDebtorStep {
    fn step_id(&self) -> &'static str {
        DEBIT_STEP
    }

    async fn execute(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        transfer.status = SepaTransferStatus::DebitPending;
        self.ledger
            .debit(
                &transfer.debtor_account,
                transfer.amount.clone(),
                &transfer.sepa_reference,
                "SEPA credit transfer",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        self.ledger
            .credit(
                &transfer.debtor_account,
                transfer.amount.clone(),
                &transfer.reversal_reference(),
                "SEPA transfer reversal",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        Ok(())
    }
}

struct SubmitStep {
    network: Arc<dyn SettlementNetwork>,
    clock: SharedClock,
}

#[async_trait]
impl SagaStep<SepaCreditTransfer> for SubmitStep {
    fn step_id(&self) -> &'static str {
        SUBMIT_STEP
    }

    async fn execute(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        let xml = iso20022::build_pacs008(
            &transfer.sepa_reference,
            std::slice::from_ref(transfer),
            self.clock.now(),
        );
        let network_reference = self
            .network
            .submit(&xml, &transfer.sepa_reference)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        transfer.network_reference = Some(network_reference);
        transfer.status = SepaTransferStatus::Submitted;
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        // The network owns cancellation of an already submitted message; a
        // recall is an R-transaction, not a local rollback.
        tracing::warn!(
            transfer = %transfer.sepa_reference,
            "submitted SEPA message left for recall handling"
        );
        Ok(())
    }
}

struct AwaitAckStep {
    network: Arc<dyn SettlementNetwork>,
    clock: SharedClock,
}

#[async_trait]
impl SagaStep<SepaCreditTransfer> for AwaitAckStep {
    fn step_id(&self) -> &'static str {
        AWAIT_ACK_STEP
    }

    async fn execute(
        &self,
        _ctx: &SagaContext,
        transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        transfer.status = SepaTransferStatus::AwaitingSettlement;
        let network_reference = transfer
            .network_reference
            .clone()
            .ok_or_else(|| StepFailure::new("missing network reference"))?;
        let ack = self
            .network
            .await_acknowledgment(&network_reference)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        if !ack.accepted {
            return Err(StepFailure::new(format!(
                "settlement rejected: {}",
                ack.reason.unwrap_or_else(|| "no reason given".to_string())
            )));
        }
        transfer.status = SepaTransferStatus::Settled;
        transfer.settled_at = Some(self.clock.now());
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        _transfer: &mut SepaCreditTransfer,
    ) -> Result<(), StepFailure> {
        Ok(())
    }
}

fn validate_sct(transfer: &SepaCreditTransfer) -> Result<(), SepaError> {
    if !transfer.amount.is_positive() {
        return Err(SepaError::Validation("amount must be positive".to_string()));
    }
    if !iban_plausible(&transfer.debtor_iban) {
        return Err(SepaError::Validation(format!(
            "implausible debtor IBAN '{}'",
            transfer.debtor_iban
        )));
    }
    if !iban_plausible(&transfer.creditor_iban) {
        return Err(SepaError::Validation(format!(
            "implausible creditor IBAN '{}'",
            transfer.creditor_iban
        )));
    }
    if transfer.debtor_iban == transfer.creditor_iban {
        return Err(SepaError::Validation(
            "debtor and creditor IBAN must differ".to_string(),
        ));
    }
    if transfer.debtor_name.trim().is_empty() || transfer.creditor_name.trim().is_empty() {
        return Err(SepaError::Validation(
            "debtor and creditor names are required".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SubmitCreditTransferRequest {
    pub debtor_account: String,
    pub debtor_iban: String,
    pub debtor_name: String,
    pub creditor_iban: String,
    pub creditor_name: String,
    pub amount: Money,
    pub instant: bool,
    pub remittance_info: String,
}

#[derive(Default)]
struct GatewayState {
    transfers: HashMap<String, SepaCreditTransfer>,
    batches: HashMap<String, SepaBatch>,
}

/// SEPA gateway: owns credit transfers and batches, drives the settlement
/// saga and keeps batch counters in lockstep with member results.
pub struct SepaGateway {
    ledger: Arc<Ledger>,
    network: Arc<dyn SettlementNetwork>,
    saga_store: SharedSagaStore,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    state: RwLock<GatewayState>,
}

impl SepaGateway {
    pub fn new(
        ledger: Arc<Ledger>,
        network: Arc<dyn SettlementNetwork>,
        saga_store: SharedSagaStore,
        outbox: Arc<Outbox>,
        clock: SharedClock,
    ) -> Self {
        Self {
            ledger,
            network,
            saga_store,
            outbox,
            clock,
            state: RwLock::new(GatewayState::default()),
        }
    }

    fn build_transfer(&self, request: SubmitCreditTransferRequest) -> SepaCreditTransfer {
        SepaCreditTransfer {
            sepa_reference: new_reference("SCT"),
            end_to_end_id: new_reference("E2E"),
            debtor_account: request.debtor_account,
            debtor_iban: request.debtor_iban,
            debtor_name: request.debtor_name,
            creditor_iban: request.creditor_iban,
            creditor_name: request.creditor_name,
            amount: request.amount,
            instant: request.instant,
            status: SepaTransferStatus::Pending,
            batch_id: None,
            network_reference: None,
            remittance_info: request.remittance_info,
            failure_reason: None,
            created_at: self.clock.now(),
            settled_at: None,
        }
    }

    /// Stage a transfer for batch processing without moving money.
    pub async fn stage_credit_transfer(
        &self,
        request: SubmitCreditTransferRequest,
    ) -> Result<SepaCreditTransfer, SepaError> {
        let transfer = self.build_transfer(request);
        validate_sct(&transfer)?;
        let mut state = self.state.write().await;
        state
            .transfers
            .insert(transfer.sepa_reference.clone(), transfer.clone());
        Ok(transfer)
    }

    /// Run a single transfer through the full settlement saga (the
    /// SCT_INST path, and SCT outside a batch).
    pub async fn submit_credit_transfer(
        &self,
        request: SubmitCreditTransferRequest,
    ) -> Result<SepaCreditTransfer, SepaError> {
        let transfer = self.build_transfer(request);
        {
            let mut state = self.state.write().await;
            state
                .transfers
                .insert(transfer.sepa_reference.clone(), transfer.clone());
        }

        let steps: Vec<Arc<dyn SagaStep<SepaCreditTransfer>>> = vec![
            Arc::new(ValidateSctStep {
                ledger: self.ledger.clone(),
            }),
            Arc::new(DebitDebtorStep {
                ledger: self.ledger.clone(),
            }),
            Arc::new(SubmitStep {
                network: self.network.clone(),
                clock: self.clock.clone(),
            }),
            Arc::new(AwaitAckStep {
                network: self.network.clone(),
                clock: self.clock.clone(),
            }),
        ];
        let orchestrator =
            SagaOrchestrator::new(steps, self.saga_store.clone(), self.clock.clone());
        let ctx = SagaContext::new(transfer.sepa_reference.clone(), self.clock.clone());

        let mut aggregate = transfer.clone();
        let outcome = orchestrator
            .run(&ctx, &transfer.sepa_reference, &mut aggregate)
            .await?;

        match outcome {
            SagaOutcome::Completed => {}
            SagaOutcome::Compensated {
                failed_step,
                reason,
            } => {
                aggregate.status = if failed_step == VALIDATE_STEP {
                    SepaTransferStatus::Failed
                } else {
                    SepaTransferStatus::Compensated
                };
                aggregate.failure_reason = Some(reason);
            }
            SagaOutcome::Failed { reason } => {
                aggregate.status = SepaTransferStatus::Failed;
                aggregate.failure_reason = Some(reason);
            }
        }

        let snapshot = aggregate.clone();
        {
            let mut state = self.state.write().await;
            state
                .transfers
                .insert(snapshot.sepa_reference.clone(), snapshot);
        }
        Ok(aggregate)
    }

    pub async fn get_transfer(&self, reference: &str) -> Result<SepaCreditTransfer, SepaError> {
        let state = self.state.read().await;
        state
            .transfers
            .get(reference)
            .cloned()
            .ok_or_else(|| SepaError::TransferNotFound(reference.to_string()))
    }

    pub async fn create_batch(
        &self,
        batch_type: SepaBatchType,
        transfer_references: Vec<String>,
    ) -> Result<SepaBatch, SepaError> {
        if transfer_references.is_empty() {
            return Err(SepaError::Validation(
                "a batch needs at least one transfer".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let mut total: Option<Money> = None;
        for reference in &transfer_references {
            let transfer = state
                .transfers
                .get(reference)
                .ok_or_else(|| SepaError::TransferNotFound(reference.clone()))?;
            if transfer.batch_id.is_some() {
                return Err(SepaError::Validation(format!(
                    "transfer '{reference}' already belongs to a batch"
                )));
            }
            total = Some(match total {
                None => transfer.amount.clone(),
                Some(sum) => sum
                    .checked_add(&transfer.amount)
                    .map_err(|e| SepaError::Validation(e.to_string()))?,
            });
        }

        let batch = SepaBatch {
            message_id: new_reference("MSG"),
            batch_type,
            status: SepaBatchStatus::Pending,
            transfer_references: transfer_references.clone(),
            number_of_transactions: transfer_references.len() as u32,
            total_amount: total.expect("batch is non-empty"),
            successful_count: 0,
            failed_count: 0,
            rejection_reason: None,
            canonical_xml: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        for reference in &transfer_references {
            if let Some(transfer) = state.transfers.get_mut(reference) {
                transfer.batch_id = Some(batch.message_id.clone());
            }
        }
        state.batches.insert(batch.message_id.clone(), batch.clone());
        tracing::info!(batch = %batch.message_id, members = batch.number_of_transactions, "batch created");
        Ok(batch)
    }

    /// Validate every member against the SCT preconditions. Any failing
    /// member rejects the whole batch.
    pub async fn validate_batch(&self, message_id: &str) -> Result<SepaBatch, SepaError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let GatewayState {
            transfers, batches, ..
        } = &mut *state;
        let batch = batches
            .get_mut(message_id)
            .ok_or_else(|| SepaError::BatchNotFound(message_id.to_string()))?;

        Self::transition_batch(batch, SepaBatchStatus::Validating, now)?;

        let mut rejection = None;
        for reference in &batch.transfer_references {
            let transfer = transfers
                .get(reference)
                .ok_or_else(|| SepaError::TransferNotFound(reference.clone()))?;
            if let Err(err) = validate_sct(transfer) {
                rejection = Some(format!("transfer '{reference}': {err}"));
                break;
            }
        }

        match rejection {
            Some(reason) => {
                Self::transition_batch(batch, SepaBatchStatus::Rejected, now)?;
                batch.rejection_reason = Some(reason.clone());
                tracing::warn!(batch = %message_id, reason = %reason, "batch rejected");
            }
            None => {
                Self::transition_batch(batch, SepaBatchStatus::Validated, now)?;
            }
        }
        Ok(batch.clone())
    }

    /// Submit a validated batch: debit every member, persist the canonical
    /// pain.001 XML and hand the message to the network.
    pub async fn submit_batch(&self, message_id: &str) -> Result<SepaBatch, SepaError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let GatewayState {
            transfers, batches, ..
        } = &mut *state;
        let batch = batches
            .get_mut(message_id)
            .ok_or_else(|| SepaError::BatchNotFound(message_id.to_string()))?;

        Self::transition_batch(batch, SepaBatchStatus::Submitted, now)?;

        let references = batch.transfer_references.clone();
        let mut members = Vec::with_capacity(references.len());
        for reference in &references {
            let transfer = transfers
                .get_mut(reference)
                .ok_or_else(|| SepaError::TransferNotFound(reference.clone()))?;
            match self
                .ledger
                .debit(
                    &transfer.debtor_account,
                    transfer.amount.clone(),
                    &transfer.sepa_reference,
                    "SEPA batch debit",
                )
                .await
            {
                Ok(_) => {
                    transfer.status = SepaTransferStatus::AwaitingSettlement;
                }
                Err(err) => {
                    transfer.status = SepaTransferStatus::Failed;
                    transfer.failure_reason = Some(err.to_string());
                    batch.failed_count += 1;
                }
            }
            members.push(transfer.clone());
        }

        let xml = iso20022::build_pain001(&batch.message_id, &members, now);
        batch.canonical_xml = Some(xml.clone());
        self.network.submit(&xml, &batch.message_id).await?;
        Self::transition_batch(batch, SepaBatchStatus::Processing, now)?;

        self.outbox.enqueue(
            topics::SEPA_EVENTS,
            EventEnvelope::new(
                event_types::SEPA_BATCH_SUBMITTED,
                batch.message_id.clone(),
                json!({
                    "messageId": batch.message_id,
                    "numberOfTransactions": batch.number_of_transactions,
                    "totalAmountMinor": batch.total_amount.minor_units,
                }),
                now,
            ),
        );
        tracing::info!(batch = %message_id, "batch submitted");
        Ok(batch.clone())
    }

    /// Record one member's settlement result and roll the counters; a failed
    /// member gets its debit refunded in the same critical section.
    pub async fn record_transfer_result(
        &self,
        message_id: &str,
        reference: &str,
        success: bool,
    ) -> Result<SepaBatch, SepaError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let GatewayState {
            transfers, batches, ..
        } = &mut *state;
        let batch = batches
            .get_mut(message_id)
            .ok_or_else(|| SepaError::BatchNotFound(message_id.to_string()))?;

        if batch.status != SepaBatchStatus::Processing {
            return Err(SepaError::IllegalStateTransition {
                from: batch.status.to_string(),
                to: "result recording".to_string(),
            });
        }
        if !batch.transfer_references.iter().any(|r| r == reference) {
            return Err(SepaError::TransferNotFound(reference.to_string()));
        }
        let transfer = transfers
            .get_mut(reference)
            .ok_or_else(|| SepaError::TransferNotFound(reference.to_string()))?;
        if transfer.status != SepaTransferStatus::AwaitingSettlement {
            return Err(SepaError::IllegalStateTransition {
                from: transfer.status.to_string(),
                to: "settlement result".to_string(),
            });
        }

        if success {
            transfer.status = SepaTransferStatus::Settled;
            transfer.settled_at = Some(now);
            batch.successful_count += 1;
        } else {
            transfer.status = SepaTransferStatus::Compensated;
            self.ledger
                .credit(
                    &transfer.debtor_account,
                    transfer.amount.clone(),
                    &transfer.reversal_reference(),
                    "SEPA batch member refund",
                )
                .await?;
            batch.failed_count += 1;
        }
        batch.updated_at = now;
        batch.version += 1;

        if batch.all_resolved() {
            let terminal = batch.resolution_status();
            Self::transition_batch(batch, terminal, now)?;
        }
        Ok(batch.clone())
    }

    pub async fn get_batch(&self, message_id: &str) -> Result<SepaBatch, SepaError> {
        let state = self.state.read().await;
        state
            .batches
            .get(message_id)
            .cloned()
            .ok_or_else(|| SepaError::BatchNotFound(message_id.to_string()))
    }

    pub async fn list_batches(&self) -> Vec<SepaBatch> {
        let state = self.state.read().await;
        let mut all: Vec<SepaBatch> = state.batches.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn transition_batch(
        batch: &mut SepaBatch,
        to: SepaBatchStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SepaError> {
        if !batch.status.can_transition_to(to) {
            return Err(SepaError::IllegalStateTransition {
                from: batch.status.to_string(),
                to: to.to_string(),
            });
        }
        batch.status = to;
        batch.updated_at = now;
        batch.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_ledger::{AccountType, JournalStorageConfig, LedgerConfig};
    use corebank_saga::InMemorySagaStore;
    use corebank_types::{Currency, SystemClock};

    fn eur(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("EUR").unwrap())
    }

    async fn gateway(accept_all: bool) -> (SepaGateway, Arc<Ledger>) {
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
        let gateway = SepaGateway::new(
            ledger.clone(),
            Arc::new(MockSettlementNetwork { accept_all }),
            Arc::new(InMemorySagaStore::new()),
            outbox,
            clock,
        );
        (gateway, ledger)
    }

    fn request(debtor_account: &str, minor: i64) -> SubmitCreditTransferRequest {
        SubmitCreditTransferRequest {
            debtor_account: debtor_account.to_string(),
            debtor_iban: "DE89370400440532013000".to_string(),
            debtor_name: "Acme GmbH".to_string(),
            creditor_iban: "FR1420041010050500013M02606".to_string(),
            creditor_name: "Fournisseur SA".to_string(),
            amount: eur(minor),
            instant: false,
            remittance_info: "invoice 4711".to_string(),
        }
    }

    #[tokio::test]
    async fn accepted_transfer_settles_and_debits_the_debtor() {
        let (gateway, ledger) = gateway(true).await;
        let account = ledger
            .open_account("CUST-1", AccountType::Checking, eur(100_000))
            .await
            .unwrap();

        let transfer = gateway
            .submit_credit_transfer(request(&account.account_number, 25_000))
            .await
            .unwrap();
        assert_eq!(transfer.status, SepaTransferStatus::Settled);
        assert!(transfer.network_reference.is_some());
        assert_eq!(
            ledger.balance(&account.account_number).await.unwrap().minor_units,
            75_000
        );
    }

    #[tokio::test]
    async fn rejected_settlement_refunds_the_debit() {
        let (gateway, ledger) = gateway(false).await;
        let account = ledger
            .open_account("CUST-1", AccountType::Checking, eur(100_000))
            .await
            .unwrap();

        let transfer = gateway
            .submit_credit_transfer(request(&account.account_number, 25_000))
            .await
            .unwrap();
        assert_eq!(transfer.status, SepaTransferStatus::Compensated);
        assert_eq!(
            ledger.balance(&account.account_number).await.unwrap().minor_units,
            100_000
        );
    }

    #[tokio::test]
    async fn batch_counters_conserve_and_resolve() {
        let (gateway, ledger) = gateway(true).await;
        let account = ledger
            .open_account("CUST-1", AccountType::Checking, eur(100_000))
            .await
            .unwrap();

        let t1 = gateway
            .stage_credit_transfer(request(&account.account_number, 10_000))
            .await
            .unwrap();
        let t2 = gateway
            .stage_credit_transfer(request(&account.account_number, 15_000))
            .await
            .unwrap();

        let batch = gateway
            .create_batch(
                SepaBatchType::Sct,
                vec![t1.sepa_reference.clone(), t2.sepa_reference.clone()],
            )
            .await
            .unwrap();
        assert_eq!(batch.total_amount.minor_units, 25_000);
        assert_eq!(batch.number_of_transactions, 2);

        let batch = gateway.validate_batch(&batch.message_id).await.unwrap();
        assert_eq!(batch.status, SepaBatchStatus::Validated);

        let batch = gateway.submit_batch(&batch.message_id).await.unwrap();
        assert_eq!(batch.status, SepaBatchStatus::Processing);
        assert!(batch.canonical_xml.as_deref().unwrap().contains("pain.001"));
        assert_eq!(
            ledger.balance(&account.account_number).await.unwrap().minor_units,
            75_000
        );

        let batch = gateway
            .record_transfer_result(&batch.message_id, &t1.sepa_reference, true)
            .await
            .unwrap();
        assert_eq!(batch.pending_count(), 1);
        assert_eq!(batch.status, SepaBatchStatus::Processing);

        let batch = gateway
            .record_transfer_result(&batch.message_id, &t2.sepa_reference, false)
            .await
            .unwrap();
        assert_eq!(batch.successful_count, 1);
        assert_eq!(batch.failed_count, 1);
        assert_eq!(batch.pending_count(), 0);
        assert_eq!(batch.status, SepaBatchStatus::PartiallyComplete);

        // The failed member's debit came back.
        assert_eq!(
            ledger.balance(&account.account_number).await.unwrap().minor_units,
            90_000
        );
    }

    #[tokio::test]
    async fn batch_with_bad_member_is_rejected() {
        let (gateway, ledger) = gateway(true).await;
        let account = ledger
            .open_account("CUST-1", AccountType::Checking, eur(100_000))
            .await
            .unwrap();

        let good = gateway
            .stage_credit_transfer(request(&account.account_number, 10_000))
            .await
            .unwrap();
        // Corrupt a staged member behind the validation's back.
        {
            let mut state = gateway.state.write().await;
            let member = state.transfers.get_mut(&good.sepa_reference).unwrap();
            member.creditor_iban = "not-an-iban".to_string();
        }

        let batch = gateway
            .create_batch(SepaBatchType::Sct, vec![good.sepa_reference.clone()])
            .await
            .unwrap();
        let batch = gateway.validate_batch(&batch.message_id).await.unwrap();
        assert_eq!(batch.status, SepaBatchStatus::Rejected);
        assert!(batch.rejection_reason.is_some());
    }
}
