use crate::transfer::{Transfer, TransferStatus};
use async_trait::async_trait;
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_ledger::Ledger;
use corebank_saga::{SagaContext, SagaStep, StepFailure};
use corebank_types::{Clock, SharedClock};
use serde_json::json;
use std::sync::Arc;

pub const VALIDATE_STEP: &str = "validate";
pub const DEBIT_STEP: &str = "debit-source";
pub const CREDIT_STEP: &str = "credit-destination";
pub const CONFIRM_STEP: &str = "confirm";

/// Checks every precondition before any money moves. Compensation is a
/// no-op: a failed validation has no side effects to undo.
pub struct ValidateStep {
    pub ledger: Arc<Ledger>,
}

#[async_trait]
impl SagaStep<Transfer> for ValidateStep {
    fn step_id(&self) -> &'static str {
        VALIDATE_STEP
    }

    async fn execute(&self, _ctx: &SagaContext, transfer: &mut Transfer) -> Result<(), StepFailure> {
        transfer.status = TransferStatus::Validating;

        if !transfer.amount.is_positive() {
            return Err(StepFailure::new("transfer amount must be positive"));
        }
        if transfer.from_account == transfer.to_account {
            return Err(StepFailure::new(
                "source and destination accounts must differ",
            ));
        }

        let source = self
            .ledger
            .account(&transfer.from_account)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        let destination = self
            .ledger
            .account(&transfer.to_account)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;

        if !source.status.accepts_postings() {
            return Err(StepFailure::new(format!(
                "source account is {}",
                source.status
            )));
        }
        if !destination.status.accepts_postings() {
            return Err(StepFailure::new(format!(
                "destination account is {}",
                destination.status
            )));
        }
        if source.currency != transfer.amount.currency
            || destination.currency != transfer.amount.currency
        {
            return Err(StepFailure::new("currency mismatch between accounts"));
        }
        if source.balance.minor_units < transfer.amount.minor_units {
            return Err(StepFailure::new(format!(
                "source balance {} is below transfer amount {}",
                source.balance.to_decimal_string(),
                transfer.amount.to_decimal_string()
            )));
        }

        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        _transfer: &mut Transfer,
    ) -> Result<(), StepFailure> {
        Ok(())
    }
}

/// Debits the source account under the transfer reference. The reversal
/// credits the same account under `<reference>:REVERSAL`, so replays of
/// either half stay idempotent.
pub struct DebitSourceStep {
    pub ledger: Arc<Ledger>,
}

#[async_trait]
impl SagaStep<Transfer> for DebitSourceStep {
    fn step_id(&self) -> &'static str {
        DEBIT_STEP
    }

    async fn execute(&self, _ctx: &SagaContext, transfer: &mut Transfer) -> Result<(), StepFailure> {
        transfer.status = TransferStatus::DebitPending;
        let line = self
            .ledger
            .debit(
                &transfer.from_account,
                transfer.amount.clone(),
                &transfer.transfer_reference,
                "Transfer debit",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        transfer.debit_posting_id = Some(line.id);
        transfer.status = TransferStatus::DebitCompleted;
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        transfer: &mut Transfer,
    ) -> Result<(), StepFailure> {
        transfer.status = TransferStatus::Compensating;
        self.ledger
            .credit(
                &transfer.from_account,
                transfer.amount.clone(),
                &transfer.reversal_reference(),
                "Transfer debit reversal",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        transfer.debit_posting_id = None;
        Ok(())
    }
}

/// Credits the destination account under the transfer reference.
pub struct CreditDestinationStep {
    pub ledger: Arc<Ledger>,
}

#[async_trait]
impl SagaStep<Transfer> for CreditDestinationStep {
    fn step_id(&self) -> &'static str {
        CREDIT_STEP
    }

    async fn execute(&self, _ctx: &SagaContext, transfer: &mut Transfer) -> Result<(), StepFailure> {
        transfer.status = TransferStatus::CreditPending;
        let line = self
            .ledger
            .credit(
                &transfer.to_account,
                transfer.amount.clone(),
                &transfer.transfer_reference,
                "Transfer credit",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        transfer.credit_posting_id = Some(line.id);
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        transfer: &mut Transfer,
    ) -> Result<(), StepFailure> {
        transfer.status = TransferStatus::Compensating;
        self.ledger
            .debit(
                &transfer.to_account,
                transfer.amount.clone(),
                &transfer.reversal_reference(),
                "Transfer credit reversal",
            )
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        transfer.credit_posting_id = None;
        Ok(())
    }
}

/// Marks the transfer completed and emits `transfer.completed.v1`.
pub struct ConfirmStep {
    pub outbox: Arc<Outbox>,
    pub clock: SharedClock,
}

#[async_trait]
impl SagaStep<Transfer> for ConfirmStep {
    fn step_id(&self) -> &'static str {
        CONFIRM_STEP
    }

    async fn execute(&self, _ctx: &SagaContext, transfer: &mut Transfer) -> Result<(), StepFailure> {
        let now = self.clock.now();
        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(now);
        self.outbox.enqueue(
            topics::TRANSFER_EVENTS,
            EventEnvelope::new(
                event_types::TRANSFER_COMPLETED,
                transfer.transfer_reference.clone(),
                json!({
                    "transferReference": transfer.transfer_reference,
                    "fromAccount": transfer.from_account,
                    "toAccount": transfer.to_account,
                    "amountMinor": transfer.amount.minor_units,
                    "currency": transfer.amount.currency.as_str(),
                    "debitPostingId": transfer.debit_posting_id,
                    "creditPostingId": transfer.credit_posting_id,
                }),
                now,
            ),
        );
        tracing::info!(transfer = %transfer.transfer_reference, "transfer completed");
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &SagaContext,
        _transfer: &mut Transfer,
    ) -> Result<(), StepFailure> {
        Ok(())
    }
}
