use chrono::{DateTime, Utc};
use corebank_types::{Currency, Money};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Checking,
    Savings,
}

/// Account lifecycle states. Transitions form a DAG with one cycle between
/// ACTIVE and FROZEN; CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Pending,
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn can_transition_to(self, to: AccountStatus) -> bool {
        matches!(
            (self, to),
            (AccountStatus::Pending, AccountStatus::Active)
                | (AccountStatus::Active, AccountStatus::Frozen)
                | (AccountStatus::Frozen, AccountStatus::Active)
                | (AccountStatus::Active, AccountStatus::Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AccountStatus::Closed)
    }

    pub fn accepts_postings(self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Ledger account. `version` is the optimistic-concurrency counter bumped on
/// every mutation; `balance` is always Σ credits − Σ debits of the account's
/// posting lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub account_number: String,
    pub customer_id: String,
    pub currency: Currency,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub balance: Money,
    pub version: u64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_dag_is_enforced() {
        use AccountStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Frozen));
        assert!(Frozen.can_transition_to(Active));
        assert!(Active.can_transition_to(Closed));

        assert!(!Pending.can_transition_to(Frozen));
        assert!(!Pending.can_transition_to(Closed));
        assert!(!Frozen.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
    }

    #[test]
    fn only_active_accepts_postings() {
        assert!(AccountStatus::Active.accepts_postings());
        assert!(!AccountStatus::Pending.accepts_postings());
        assert!(!AccountStatus::Frozen.accepts_postings());
        assert!(!AccountStatus::Closed.accepts_postings());
    }
}
