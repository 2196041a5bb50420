//! SWIFT pipeline.
//!
//! MT103 single customer credit transfers: BIC validation, block-structured
//! message construction with a parse round-trip, a compliance gate in front
//! of any money movement, and fee math on top of the ledger debit.

#![deny(unsafe_code)]

pub mod bic;
pub mod mt103;
pub mod pipeline;

pub use bic::{normalize_bic, validate_bic};
pub use mt103::{ChargeType, Mt103Fields};
pub use pipeline::{
    AcceptAllGate, ComplianceGate, ComplianceVerdict, Correspondent, MockCorrespondent,
    SubmitSwiftRequest, SwiftDesk, SwiftFees, SwiftTransfer, SwiftTransferStatus,
};

use corebank_ledger::LedgerError;
use corebank_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwiftError {
    #[error("invalid BIC '{bic}': {reason}")]
    InvalidBic { bic: String, reason: String },

    #[error("malformed MT103 message: {0}")]
    MalformedMessage(String),

    #[error("SWIFT transfer '{0}' not found")]
    TransferNotFound(String),

    #[error("transfer blocked by compliance: {0}")]
    ComplianceBlocked(String),

    #[error("illegal status transition {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SwiftError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBic { .. } => ErrorKind::Validation,
            Self::MalformedMessage(_) => ErrorKind::Validation,
            Self::TransferNotFound(_) => ErrorKind::NotFound,
            Self::ComplianceBlocked(_) => ErrorKind::Validation,
            Self::IllegalStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Ledger(inner) => inner.error_kind(),
        }
    }
}
