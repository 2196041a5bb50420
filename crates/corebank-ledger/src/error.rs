use corebank_types::{ErrorKind, MoneyError};
use thiserror::Error;

/// Ledger faults. Each variant maps into the platform error taxonomy via
/// [`LedgerError::error_kind`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("account '{account}' is {status}; postings require ACTIVE")]
    AccountInactive { account: String, status: String },

    #[error("insufficient funds on '{account}': balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: String,
        balance: String,
        requested: String,
    },

    #[error("currency mismatch on '{account}': account holds {expected}, got {actual}")]
    CurrencyMismatch {
        account: String,
        expected: String,
        actual: String,
    },

    #[error("illegal status transition {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("account '{0}' holds a non-zero balance; close requires zero")]
    NonZeroClose(String),

    #[error("posting amount must be positive")]
    NonPositiveAmount,

    #[error("opening balance may not be negative")]
    NegativeOpeningBalance,

    #[error("posting conflict on '{account}' after {attempts} attempts")]
    ConcurrencyAborted { account: String, attempts: u32 },

    #[error("posting journal error: {0}")]
    Journal(String),

    #[error("amount arithmetic failed: {0}")]
    Arithmetic(#[from] MoneyError),
}

impl LedgerError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) => ErrorKind::NotFound,
            Self::AccountInactive { .. } => ErrorKind::InvalidStateTransition,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::CurrencyMismatch { .. } => ErrorKind::Validation,
            Self::IllegalStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::NonZeroClose(_) => ErrorKind::InvalidStateTransition,
            Self::NonPositiveAmount => ErrorKind::Validation,
            Self::NegativeOpeningBalance => ErrorKind::Validation,
            Self::ConcurrencyAborted { .. } => ErrorKind::Concurrency,
            Self::Journal(_) => ErrorKind::Dependency,
            Self::Arithmetic(_) => ErrorKind::Validation,
        }
    }
}
