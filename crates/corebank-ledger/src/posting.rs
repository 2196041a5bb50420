use chrono::{DateTime, Utc};
use corebank_types::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingDirection {
    Debit,
    Credit,
}

impl PostingDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "DEBIT" => Some(Self::Debit),
            "CREDIT" => Some(Self::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for PostingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable debit or credit entry on an account.
///
/// `reference_id` is unique per `(account, direction)`; replaying a posting
/// with the same key returns this line unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingLine {
    pub id: String,
    pub account_id: String,
    pub account_number: String,
    pub direction: PostingDirection,
    pub amount: Money,
    pub reference_id: String,
    pub description: String,
    pub balance_after: Money,
    pub posted_at: DateTime<Utc>,
}

impl PostingLine {
    /// Signed effect of this line on the account balance, in minor units.
    pub fn signed_minor_units(&self) -> i64 {
        match self.direction {
            PostingDirection::Credit => self.amount.minor_units,
            PostingDirection::Debit => -self.amount.minor_units,
        }
    }
}
