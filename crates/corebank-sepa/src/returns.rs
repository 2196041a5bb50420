use crate::transfer::{SepaGateway, SepaTransferStatus};
use crate::SepaError;
use chrono::{DateTime, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_ledger::Ledger;
use corebank_types::{new_reference, Clock, Money, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Closed set of R-transaction reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SepaReasonCode {
    #[serde(rename = "AC01")]
    Ac01,
    #[serde(rename = "AC04")]
    Ac04,
    #[serde(rename = "AC06")]
    Ac06,
    #[serde(rename = "AM04")]
    Am04,
    #[serde(rename = "AM05")]
    Am05,
    #[serde(rename = "MD01")]
    Md01,
    #[serde(rename = "MD02")]
    Md02,
    #[serde(rename = "MD06")]
    Md06,
    #[serde(rename = "MD07")]
    Md07,
    #[serde(rename = "MS02")]
    Ms02,
    #[serde(rename = "MS03")]
    Ms03,
    #[serde(rename = "RR01")]
    Rr01,
    #[serde(rename = "RR02")]
    Rr02,
    #[serde(rename = "RR03")]
    Rr03,
    #[serde(rename = "RR04")]
    Rr04,
}

impl SepaReasonCode {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "AC01" => Some(Self::Ac01),
            "AC04" => Some(Self::Ac04),
            "AC06" => Some(Self::Ac06),
            "AM04" => Some(Self::Am04),
            "AM05" => Some(Self::Am05),
            "MD01" => Some(Self::Md01),
            "MD02" => Some(Self::Md02),
            "MD06" => Some(Self::Md06),
            "MD07" => Some(Self::Md07),
            "MS02" => Some(Self::Ms02),
            "MS03" => Some(Self::Ms03),
            "RR01" => Some(Self::Rr01),
            "RR02" => Some(Self::Rr02),
            "RR03" => Some(Self::Rr03),
            "RR04" => Some(Self::Rr04),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ac01 => "AC01",
            Self::Ac04 => "AC04",
            Self::Ac06 => "AC06",
            Self::Am04 => "AM04",
            Self::Am05 => "AM05",
            Self::Md01 => "MD01",
            Self::Md02 => "MD02",
            Self::Md06 => "MD06",
            Self::Md07 => "MD07",
            Self::Ms02 => "MS02",
            Self::Ms03 => "MS03",
            Self::Rr01 => "RR01",
            Self::Rr02 => "RR02",
            Self::Rr03 => "RR03",
            Self::Rr04 => "RR04",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ac01 => "Incorrect account number",
            Self::Ac04 => "Closed account number",
            Self::Ac06 => "Blocked account",
            Self::Am04 => "Insufficient funds",
            Self::Am05 => "Duplication",
            Self::Md01 => "No mandate",
            Self::Md02 => "Missing mandatory mandate information",
            Self::Md06 => "Refund request by end customer",
            Self::Md07 => "End customer deceased",
            Self::Ms02 => "Refusal by debtor",
            Self::Ms03 => "Reason not specified",
            Self::Rr01 => "Missing debtor account or identification",
            Self::Rr02 => "Missing debtor name or address",
            Self::Rr03 => "Missing creditor name or address",
            Self::Rr04 => "Regulatory reason",
        }
    }
}

impl fmt::Display for SepaReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SepaReturnStatus {
    Initiated,
    Validated,
    Processing,
    Completed,
    Refunded,
}

impl SepaReturnStatus {
    pub fn can_transition_to(self, to: SepaReturnStatus) -> bool {
        matches!(
            (self, to),
            (SepaReturnStatus::Initiated, SepaReturnStatus::Validated)
                | (SepaReturnStatus::Validated, SepaReturnStatus::Processing)
                | (SepaReturnStatus::Processing, SepaReturnStatus::Completed)
                | (SepaReturnStatus::Completed, SepaReturnStatus::Refunded)
        )
    }
}

impl fmt::Display for SepaReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiated => "INITIATED",
            Self::Validated => "VALIDATED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(name)
    }
}

/// R-transaction envelope referencing a settled SEPA transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SepaReturn {
    pub return_reference: String,
    pub original_reference: String,
    pub reason_code: SepaReasonCode,
    pub amount: Money,
    pub refund_account: String,
    pub status: SepaReturnStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handles returns: lifecycle plus the inverse posting chain on refund.
pub struct SepaReturnService {
    gateway: Arc<SepaGateway>,
    ledger: Arc<Ledger>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    returns: RwLock<HashMap<String, SepaReturn>>,
}

impl SepaReturnService {
    pub fn new(
        gateway: Arc<SepaGateway>,
        ledger: Arc<Ledger>,
        outbox: Arc<Outbox>,
        clock: SharedClock,
    ) -> Self {
        Self {
            gateway,
            ledger,
            outbox,
            clock,
            returns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn initiate(
        &self,
        original_reference: &str,
        reason_code: &str,
    ) -> Result<SepaReturn, SepaError> {
        let reason_code = SepaReasonCode::parse(reason_code)
            .ok_or_else(|| SepaError::UnknownReasonCode(reason_code.to_string()))?;

        let original = self.gateway.get_transfer(original_reference).await?;
        if original.status != SepaTransferStatus::Settled {
            return Err(SepaError::Validation(format!(
                "original transfer is {}, returns require SETTLED",
                original.status
            )));
        }

        let now = self.clock.now();
        let sepa_return = SepaReturn {
            return_reference: new_reference("RTN"),
            original_reference: original_reference.to_string(),
            reason_code,
            amount: original.amount.clone(),
            refund_account: original.debtor_account.clone(),
            status: SepaReturnStatus::Initiated,
            created_at: now,
            updated_at: now,
        };

        let mut returns = self.returns.write().await;
        returns.insert(sepa_return.return_reference.clone(), sepa_return.clone());
        tracing::info!(
            original = %original_reference,
            reason = %reason_code,
            "return initiated"
        );
        Ok(sepa_return)
    }

    pub async fn validate(&self, return_reference: &str) -> Result<SepaReturn, SepaError> {
        self.advance(return_reference, SepaReturnStatus::Validated)
            .await
    }

    pub async fn process(&self, return_reference: &str) -> Result<SepaReturn, SepaError> {
        self.advance(return_reference, SepaReturnStatus::Processing)
            .await
    }

    pub async fn complete(&self, return_reference: &str) -> Result<SepaReturn, SepaError> {
        self.advance(return_reference, SepaReturnStatus::Completed)
            .await
    }

    /// Refund the original debit: the inverse posting chain under
    /// `<original>:REFUND`, idempotent like every ledger posting.
    pub async fn refund(&self, return_reference: &str) -> Result<SepaReturn, SepaError> {
        let pending = self.get(return_reference).await?;
        if !pending.status.can_transition_to(SepaReturnStatus::Refunded) {
            return Err(SepaError::IllegalStateTransition {
                from: pending.status.to_string(),
                to: SepaReturnStatus::Refunded.to_string(),
            });
        }

        let refund_reference = format!("{}:REFUND", pending.original_reference);
        self.ledger
            .credit(
                &pending.refund_account,
                pending.amount.clone(),
                &refund_reference,
                "SEPA return refund",
            )
            .await?;

        let updated = self
            .advance(return_reference, SepaReturnStatus::Refunded)
            .await?;

        self.outbox.enqueue(
            topics::SEPA_EVENTS,
            EventEnvelope::new(
                event_types::SEPA_RETURN_REFUNDED,
                updated.original_reference.clone(),
                json!({
                    "returnReference": updated.return_reference,
                    "originalReference": updated.original_reference,
                    "reasonCode": updated.reason_code.as_str(),
                    "amountMinor": updated.amount.minor_units,
                }),
                self.clock.now(),
            ),
        );
        Ok(updated)
    }

    pub async fn get(&self, return_reference: &str) -> Result<SepaReturn, SepaError> {
        let returns = self.returns.read().await;
        returns
            .get(return_reference)
            .cloned()
            .ok_or_else(|| SepaError::ReturnNotFound(return_reference.to_string()))
    }

    pub async fn list(&self) -> Vec<SepaReturn> {
        let returns = self.returns.read().await;
        let mut all: Vec<SepaReturn> = returns.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Sum of stored return amounts carrying the given reason code, in minor
    /// units.
    pub async fn sum_return_amount_by_reason_code(&self, reason_code: SepaReasonCode) -> i64 {
        let returns = self.returns.read().await;
        returns
            .values()
            .filter(|r| r.reason_code == reason_code)
            .map(|r| r.amount.minor_units)
            .sum()
    }

    async fn advance(
        &self,
        return_reference: &str,
        to: SepaReturnStatus,
    ) -> Result<SepaReturn, SepaError> {
        let now = self.clock.now();
        let mut returns = self.returns.write().await;
        let record = returns
            .get_mut(return_reference)
            .ok_or_else(|| SepaError::ReturnNotFound(return_reference.to_string()))?;
        if !record.status.can_transition_to(to) {
            return Err(SepaError::IllegalStateTransition {
                from: record.status.to_string(),
                to: to.to_string(),
            });
        }
        record.status = to;
        record.updated_at = now;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{MockSettlementNetwork, SubmitCreditTransferRequest};
    use corebank_ledger::{AccountType, JournalStorageConfig, LedgerConfig};
    use corebank_saga::InMemorySagaStore;
    use corebank_types::{Currency, SystemClock};

    fn eur(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("EUR").unwrap())
    }

    async fn settled_transfer_fixture() -> (SepaReturnService, Arc<Ledger>, String, String) {
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
        let gateway = Arc::new(SepaGateway::new(
            ledger.clone(),
            Arc::new(MockSettlementNetwork { accept_all: true }),
            Arc::new(InMemorySagaStore::new()),
            outbox.clone(),
            clock.clone(),
        ));

        let account = ledger
            .open_account("CUST-1", AccountType::Checking, eur(100_000))
            .await
            .unwrap();
        let transfer = gateway
            .submit_credit_transfer(SubmitCreditTransferRequest {
                debtor_account: account.account_number.clone(),
                debtor_iban: "DE89370400440532013000".to_string(),
                debtor_name: "Acme GmbH".to_string(),
                creditor_iban: "FR1420041010050500013M02606".to_string(),
                creditor_name: "Fournisseur SA".to_string(),
                amount: eur(30_000),
                instant: false,
                remittance_info: "invoice 99".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(transfer.status, SepaTransferStatus::Settled);

        let service = SepaReturnService::new(gateway, ledger.clone(), outbox, clock);
        (
            service,
            ledger,
            transfer.sepa_reference,
            account.account_number,
        )
    }

    #[tokio::test]
    async fn refund_issues_the_inverse_posting() {
        let (service, ledger, original, account) = settled_transfer_fixture().await;
        assert_eq!(ledger.balance(&account).await.unwrap().minor_units, 70_000);

        let ret = service.initiate(&original, "MD06").await.unwrap();
        service.validate(&ret.return_reference).await.unwrap();
        service.process(&ret.return_reference).await.unwrap();
        service.complete(&ret.return_reference).await.unwrap();
        let refunded = service.refund(&ret.return_reference).await.unwrap();

        assert_eq!(refunded.status, SepaReturnStatus::Refunded);
        assert_eq!(ledger.balance(&account).await.unwrap().minor_units, 100_000);
    }

    #[tokio::test]
    async fn lifecycle_must_be_walked_in_order() {
        let (service, _ledger, original, _account) = settled_transfer_fixture().await;
        let ret = service.initiate(&original, "MS02").await.unwrap();

        let err = service.refund(&ret.return_reference).await.unwrap_err();
        assert!(matches!(err, SepaError::IllegalStateTransition { .. }));

        let err = service.process(&ret.return_reference).await.unwrap_err();
        assert!(matches!(err, SepaError::IllegalStateTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_reason_codes_are_rejected() {
        let (service, _ledger, original, _account) = settled_transfer_fixture().await;
        let err = service.initiate(&original, "ZZ99").await.unwrap_err();
        assert!(matches!(err, SepaError::UnknownReasonCode(_)));
    }

    #[tokio::test]
    async fn sums_group_by_reason_code() {
        let (service, _ledger, original, _account) = settled_transfer_fixture().await;
        service.initiate(&original, "AM04").await.unwrap();
        service.initiate(&original, "AM04").await.unwrap();
        service.initiate(&original, "AC01").await.unwrap();

        assert_eq!(
            service
                .sum_return_amount_by_reason_code(SepaReasonCode::Am04)
                .await,
            60_000
        );
        assert_eq!(
            service
                .sum_return_amount_by_reason_code(SepaReasonCode::Ac01)
                .await,
            30_000
        );
        assert_eq!(
            service
                .sum_return_amount_by_reason_code(SepaReasonCode::Md07)
                .await,
            0
        );
    }
}
