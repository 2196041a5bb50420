//! Transfer orchestration.
//!
//! The transfer service owns the `Transfer` aggregate and drives the
//! validate → debit → credit → confirm saga against the ledger. Initiation is
//! idempotent at the API edge via the client-supplied idempotency key; the
//! postings themselves are idempotent via the transfer reference.

#![deny(unsafe_code)]

pub mod recovery;
pub mod service;
pub mod steps;
pub mod transfer;

pub use recovery::TransferRecovery;
pub use service::{InitiateOutcome, InitiateTransferRequest, TransferService, TransferServiceConfig};
pub use transfer::{Transfer, TransferStatus};

use corebank_ledger::LedgerError;
use corebank_saga::SagaError;
use corebank_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl TransferError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Ledger(inner) => inner.error_kind(),
            Self::Saga(inner) => inner.error_kind(),
        }
    }
}
