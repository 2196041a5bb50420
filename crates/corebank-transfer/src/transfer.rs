use chrono::{DateTime, Utc};
use corebank_types::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer lifecycle. The happy path walks the pending states left to
/// right; any failure after a side effect detours through COMPENSATING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Validating,
    DebitPending,
    DebitCompleted,
    CreditPending,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }

    /// States in which a crashed saga may have left work half done.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Validating | Self::DebitPending | Self::DebitCompleted | Self::CreditPending
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::DebitPending => "DEBIT_PENDING",
            Self::DebitCompleted => "DEBIT_COMPLETED",
            Self::CreditPending => "CREDIT_PENDING",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Money movement between two ledger accounts.
///
/// Posting identity is held by id only; the lines themselves live with their
/// accounts in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub transfer_reference: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Money,
    pub status: TransferStatus,
    pub idempotency_key: String,
    pub debit_posting_id: Option<String>,
    pub credit_posting_id: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub version: u64,
}

impl Transfer {
    /// Reference used by compensating postings.
    pub fn reversal_reference(&self) -> String {
        format!("{}:REVERSAL", self.transfer_reference)
    }
}
