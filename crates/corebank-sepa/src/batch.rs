use chrono::{DateTime, Utc};
use corebank_types::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SepaBatchType {
    Sct,
    SctInst,
    SddCore,
    SddB2b,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SepaBatchStatus {
    Pending,
    Validating,
    Validated,
    Rejected,
    Submitted,
    Processing,
    PartiallyComplete,
    Completed,
}

impl SepaBatchStatus {
    pub fn can_transition_to(self, to: SepaBatchStatus) -> bool {
        matches!(
            (self, to),
            (SepaBatchStatus::Pending, SepaBatchStatus::Validating)
                | (SepaBatchStatus::Validating, SepaBatchStatus::Validated)
                | (SepaBatchStatus::Validating, SepaBatchStatus::Rejected)
                | (SepaBatchStatus::Validated, SepaBatchStatus::Submitted)
                | (SepaBatchStatus::Submitted, SepaBatchStatus::Processing)
                | (SepaBatchStatus::Processing, SepaBatchStatus::PartiallyComplete)
                | (SepaBatchStatus::Processing, SepaBatchStatus::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SepaBatchStatus::Rejected
                | SepaBatchStatus::PartiallyComplete
                | SepaBatchStatus::Completed
        )
    }
}

impl fmt::Display for SepaBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Validated => "VALIDATED",
            Self::Rejected => "REJECTED",
            Self::Submitted => "SUBMITTED",
            Self::Processing => "PROCESSING",
            Self::PartiallyComplete => "PARTIALLY_COMPLETE",
            Self::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// A payment batch. Counters conserve: successful + failed + pending equals
/// the number of transactions, and the total is the sum of member amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SepaBatch {
    pub message_id: String,
    pub batch_type: SepaBatchType,
    pub status: SepaBatchStatus,
    pub transfer_references: Vec<String>,
    pub number_of_transactions: u32,
    pub total_amount: Money,
    pub successful_count: u32,
    pub failed_count: u32,
    pub rejection_reason: Option<String>,
    pub canonical_xml: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl SepaBatch {
    pub fn pending_count(&self) -> u32 {
        self.number_of_transactions - self.successful_count - self.failed_count
    }

    pub fn all_resolved(&self) -> bool {
        self.pending_count() == 0
    }

    /// Terminal status once every member transfer has a result.
    pub fn resolution_status(&self) -> SepaBatchStatus {
        if self.failed_count == 0 {
            SepaBatchStatus::Completed
        } else {
            SepaBatchStatus::PartiallyComplete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_enforced() {
        use SepaBatchStatus::*;
        assert!(Pending.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Validated));
        assert!(Validating.can_transition_to(Rejected));
        assert!(Validated.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(PartiallyComplete));

        assert!(!Pending.can_transition_to(Submitted));
        assert!(!Validated.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Validating));
    }
}
