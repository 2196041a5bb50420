use crate::mt103::{self, Mt103Fields};
use crate::SwiftError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_ledger::Ledger;
use corebank_types::{Clock, Money, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwiftTransferStatus {
    Pending,
    Validating,
    ComplianceCheck,
    Processing,
    Submitted,
    Completed,
    Failed,
}

impl SwiftTransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SwiftTransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::ComplianceCheck => "COMPLIANCE_CHECK",
            Self::Processing => "PROCESSING",
            Self::Submitted => "SUBMITTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outgoing SWIFT transfer backed by an internal ordering account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwiftTransfer {
    pub transaction_reference: String,
    pub ordering_account: String,
    pub fields: Mt103Fields,
    pub status: SwiftTransferStatus,
    pub fee: Money,
    pub mt103: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum ComplianceVerdict {
    Cleared,
    Blocked(String),
}

/// Sanctions screen invoked before any money moves.
#[async_trait]
pub trait ComplianceGate: Send + Sync {
    async fn screen(&self, fields: &Mt103Fields) -> ComplianceVerdict;
}

pub struct AcceptAllGate;

#[async_trait]
impl ComplianceGate for AcceptAllGate {
    async fn screen(&self, _fields: &Mt103Fields) -> ComplianceVerdict {
        ComplianceVerdict::Cleared
    }
}

/// The correspondent-bank network, simulated as an opaque acknowledger.
#[async_trait]
pub trait Correspondent: Send + Sync {
    async fn acknowledge(&self, mt103: &str) -> Result<bool, SwiftError>;
}

pub struct MockCorrespondent {
    pub accept_all: bool,
}

#[async_trait]
impl Correspondent for MockCorrespondent {
    async fn acknowledge(&self, _mt103: &str) -> Result<bool, SwiftError> {
        Ok(self.accept_all)
    }
}

/// Fee schedule: a fixed part plus a percentage of the amount in basis
/// points; the derived part rounds half-to-even.
#[derive(Debug, Clone)]
pub struct SwiftFees {
    pub fixed_minor: i64,
    pub percentage_bps: i64,
}

impl Default for SwiftFees {
    fn default() -> Self {
        Self {
            fixed_minor: 2_500,
            percentage_bps: 10,
        }
    }
}

impl SwiftFees {
    pub fn fee_for(&self, amount: &Money) -> Result<Money, SwiftError> {
        let variable = amount
            .mul_bps(self.percentage_bps)
            .map_err(|e| SwiftError::Validation(e.to_string()))?;
        Ok(Money::from_minor(
            self.fixed_minor + variable.minor_units,
            amount.currency.clone(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SubmitSwiftRequest {
    pub ordering_account: String,
    pub fields: Mt103Fields,
}

/// Drives an MT103 through validation, the compliance gate, the ledger debit
/// and correspondent acknowledgment.
pub struct SwiftDesk {
    ledger: Arc<Ledger>,
    gate: Arc<dyn ComplianceGate>,
    correspondent: Arc<dyn Correspondent>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    fees: SwiftFees,
    transfers: RwLock<HashMap<String, SwiftTransfer>>,
}

impl SwiftDesk {
    pub fn new(
        ledger: Arc<Ledger>,
        gate: Arc<dyn ComplianceGate>,
        correspondent: Arc<dyn Correspondent>,
        outbox: Arc<Outbox>,
        clock: SharedClock,
        fees: SwiftFees,
    ) -> Self {
        Self {
            ledger,
            gate,
            correspondent,
            outbox,
            clock,
            fees,
            transfers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn submit(&self, request: SubmitSwiftRequest) -> Result<SwiftTransfer, SwiftError> {
        let now = self.clock.now();
        let fee = self.fees.fee_for(&request.fields.amount)?;
        let mut transfer = SwiftTransfer {
            transaction_reference: request.fields.transaction_reference.clone(),
            ordering_account: request.ordering_account,
            fields: request.fields,
            status: SwiftTransferStatus::Pending,
            fee,
            mt103: None,
            failure_reason: None,
            created_at: now,
            completed_at: None,
        };

        let result = self.drive(&mut transfer).await;
        if let Err(err) = &result {
            transfer.status = SwiftTransferStatus::Failed;
            transfer.failure_reason = Some(err.to_string());
            tracing::warn!(
                transfer = %transfer.transaction_reference,
                error = %err,
                "swift transfer failed"
            );
        }

        let mut transfers = self.transfers.write().await;
        transfers.insert(transfer.transaction_reference.clone(), transfer.clone());
        drop(transfers);

        result.map(|_| transfer)
    }

    async fn drive(&self, transfer: &mut SwiftTransfer) -> Result<(), SwiftError> {
        transfer.status = SwiftTransferStatus::Validating;
        crate::bic::validate_bic(&crate::bic::normalize_bic(&transfer.fields.sender_bic)?)?;
        crate::bic::validate_bic(&crate::bic::normalize_bic(&transfer.fields.receiver_bic)?)?;
        if !transfer.fields.amount.is_positive() {
            return Err(SwiftError::Validation("amount must be positive".to_string()));
        }
        if transfer.fields.beneficiary.trim().is_empty() {
            return Err(SwiftError::Validation("beneficiary is required".to_string()));
        }

        transfer.status = SwiftTransferStatus::ComplianceCheck;
        if let ComplianceVerdict::Blocked(reason) = self.gate.screen(&transfer.fields).await {
            return Err(SwiftError::ComplianceBlocked(reason));
        }

        transfer.status = SwiftTransferStatus::Processing;
        let total = transfer
            .fields
            .amount
            .checked_add(&transfer.fee)
            .map_err(|e| SwiftError::Validation(e.to_string()))?;
        self.ledger
            .debit(
                &transfer.ordering_account,
                total,
                &transfer.transaction_reference,
                "SWIFT MT103 transfer incl. fee",
            )
            .await?;

        let message = mt103::build(&transfer.fields)?;
        transfer.mt103 = Some(message.clone());
        transfer.status = SwiftTransferStatus::Submitted;
        self.outbox.enqueue(
            topics::SWIFT_EVENTS,
            EventEnvelope::new(
                event_types::SWIFT_SUBMITTED,
                transfer.transaction_reference.clone(),
                json!({
                    "transactionReference": transfer.transaction_reference,
                    "amountMinor": transfer.fields.amount.minor_units,
                    "currency": transfer.fields.amount.currency.as_str(),
                    "feeMinor": transfer.fee.minor_units,
                }),
                self.clock.now(),
            ),
        );

        let acknowledged = self.correspondent.acknowledge(&message).await?;
        if acknowledged {
            transfer.status = SwiftTransferStatus::Completed;
            transfer.completed_at = Some(self.clock.now());
            tracing::info!(transfer = %transfer.transaction_reference, "swift transfer completed");
            Ok(())
        } else {
            // Undo the debit; the reversal reference keeps the refund
            // idempotent.
            self.ledger
                .credit(
                    &transfer.ordering_account,
                    transfer
                        .fields
                        .amount
                        .checked_add(&transfer.fee)
                        .map_err(|e| SwiftError::Validation(e.to_string()))?,
                    &format!("{}:REVERSAL", transfer.transaction_reference),
                    "SWIFT transfer refund",
                )
                .await?;
            Err(SwiftError::Validation(
                "correspondent rejected the message".to_string(),
            ))
        }
    }

    pub async fn get(&self, reference: &str) -> Result<SwiftTransfer, SwiftError> {
        let transfers = self.transfers.read().await;
        transfers
            .get(reference)
            .cloned()
            .ok_or_else(|| SwiftError::TransferNotFound(reference.to_string()))
    }

    pub async fn list(&self) -> Vec<SwiftTransfer> {
        let transfers = self.transfers.read().await;
        let mut all: Vec<SwiftTransfer> = transfers.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mt103::ChargeType;
    use chrono::NaiveDate;
    use corebank_ledger::{AccountType, JournalStorageConfig, LedgerConfig};
    use corebank_types::{Currency, SystemClock};

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("USD").unwrap())
    }

    fn fields(minor: i64) -> Mt103Fields {
        Mt103Fields {
            sender_bic: "DEUTDEFFXXX".to_string(),
            receiver_bic: "CHASUS33XXX".to_string(),
            transaction_reference: "SWF1".to_string(),
            bank_operation_code: "CRED".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            amount: usd(minor),
            ordering_customer: "ACME GMBH".to_string(),
            ordering_institution: "DEUTDEFFXXX".to_string(),
            correspondent: None,
            beneficiary_bank: "CHASUS33XXX".to_string(),
            beneficiary: "JOHN DOE".to_string(),
            remittance_info: None,
            charge_type: ChargeType::Our,
        }
    }

    struct BlockingGate;

    #[async_trait]
    impl ComplianceGate for BlockingGate {
        async fn screen(&self, _fields: &Mt103Fields) -> ComplianceVerdict {
            ComplianceVerdict::Blocked("sanctioned beneficiary".to_string())
        }
    }

    async fn desk(
        gate: Arc<dyn ComplianceGate>,
        accept_all: bool,
    ) -> (SwiftDesk, Arc<Ledger>, String) {
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
        let account = ledger
            .open_account("CUST-1", AccountType::Checking, usd(10_000_000))
            .await
            .unwrap();
        let desk = SwiftDesk::new(
            ledger.clone(),
            gate,
            Arc::new(MockCorrespondent { accept_all }),
            outbox,
            clock,
            SwiftFees::default(),
        );
        (desk, ledger, account.account_number)
    }

    #[tokio::test]
    async fn completed_transfer_debits_amount_plus_fee() {
        let (desk, ledger, account) = desk(Arc::new(AcceptAllGate), true).await;
        let transfer = desk
            .submit(SubmitSwiftRequest {
                ordering_account: account.clone(),
                fields: fields(1_000_000),
            })
            .await
            .unwrap();

        assert_eq!(transfer.status, SwiftTransferStatus::Completed);
        // fee = 25.00 fixed + 0.10% of 10000.00 = 25.00 + 10.00
        assert_eq!(transfer.fee.minor_units, 3_500);
        assert!(transfer.mt103.as_deref().unwrap().contains(":32A:260115USD10000,00"));
        assert_eq!(
            ledger.balance(&account).await.unwrap().minor_units,
            10_000_000 - 1_000_000 - 3_500
        );
    }

    #[tokio::test]
    async fn blocked_compliance_stops_before_money_moves() {
        let (desk, ledger, account) = desk(Arc::new(BlockingGate), true).await;
        let err = desk
            .submit(SubmitSwiftRequest {
                ordering_account: account.clone(),
                fields: fields(1_000_000),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftError::ComplianceBlocked(_)));
        assert_eq!(
            ledger.balance(&account).await.unwrap().minor_units,
            10_000_000
        );

        let stored = desk.get("SWF1").await.unwrap();
        assert_eq!(stored.status, SwiftTransferStatus::Failed);
    }

    #[tokio::test]
    async fn correspondent_rejection_refunds_the_debit() {
        let (desk, ledger, account) = desk(Arc::new(AcceptAllGate), false).await;
        let err = desk
            .submit(SubmitSwiftRequest {
                ordering_account: account.clone(),
                fields: fields(1_000_000),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftError::Validation(_)));
        assert_eq!(
            ledger.balance(&account).await.unwrap().minor_units,
            10_000_000
        );
    }
}
