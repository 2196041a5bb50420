//! SEPA settlement pipeline.
//!
//! Turns internal transfers into external SEPA settlements: credit transfers
//! (SCT / SCT_INST) ride a saga with two network steps, direct debits are
//! authorized by mandates, batches carry the canonical ISO 20022 XML, and
//! R-transactions unwind settled payments through inverse postings.

#![deny(unsafe_code)]

pub mod batch;
pub mod iso20022;
pub mod mandate;
pub mod returns;
pub mod transfer;

pub use batch::{SepaBatch, SepaBatchStatus, SepaBatchType};
pub use mandate::{
    CreateMandateRequest, MandateRegistry, MandateSequence, MandateStatus, MandateType, SepaMandate,
};
pub use returns::{SepaReasonCode, SepaReturn, SepaReturnService, SepaReturnStatus};
pub use transfer::{
    MockSettlementNetwork, SepaCreditTransfer, SepaGateway, SepaTransferStatus, SettlementAck,
    SettlementNetwork, SubmitCreditTransferRequest,
};

use corebank_ledger::LedgerError;
use corebank_saga::SagaError;
use corebank_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SepaError {
    #[error("mandate '{0}' not found")]
    MandateNotFound(String),

    #[error("batch '{0}' not found")]
    BatchNotFound(String),

    #[error("SEPA transfer '{0}' not found")]
    TransferNotFound(String),

    #[error("return '{0}' not found")]
    ReturnNotFound(String),

    #[error("illegal status transition {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("mandate '{umr}' is {status}; collections require ACTIVE")]
    MandateNotActive { umr: String, status: String },

    #[error("collection {amount} exceeds mandate '{umr}' ceiling {max_amount}")]
    CollectionLimitExceeded {
        umr: String,
        amount: String,
        max_amount: String,
    },

    #[error("collection date outside mandate '{0}' validity window")]
    CollectionOutsideWindow(String),

    #[error("signature date may not lie in the future")]
    SignatureDateInFuture,

    #[error("{0}")]
    Validation(String),

    #[error("unknown SEPA reason code '{0}'")]
    UnknownReasonCode(String),

    #[error("settlement network error: {0}")]
    Network(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl SepaError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::MandateNotFound(_)
            | Self::BatchNotFound(_)
            | Self::TransferNotFound(_)
            | Self::ReturnNotFound(_) => ErrorKind::NotFound,
            Self::IllegalStateTransition { .. } | Self::MandateNotActive { .. } => {
                ErrorKind::InvalidStateTransition
            }
            Self::CollectionLimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::CollectionOutsideWindow(_) => ErrorKind::Validation,
            Self::SignatureDateInFuture => ErrorKind::Validation,
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnknownReasonCode(_) => ErrorKind::Validation,
            Self::Network(_) => ErrorKind::Dependency,
            Self::Ledger(inner) => inner.error_kind(),
            Self::Saga(inner) => inner.error_kind(),
        }
    }
}
