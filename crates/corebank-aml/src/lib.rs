//! AML detection and case engine.
//!
//! An event-driven rule engine scores monitored transactions, raises alerts,
//! screens parties against sanction lists, walks cases through their
//! workflow, and produces regulatory reports under a four-eyes rule.

#![deny(unsafe_code)]

pub mod alert;
pub mod case;
pub mod engine;
pub mod profile;
pub mod report;
pub mod rules;
pub mod screening;

pub use alert::{alert_type_for_rule_name, risk_level, AlertStatus, AlertType, AmlAlert, RiskLevel};
pub use case::{AmlCase, CaseDesk, CaseNote, CasePriority, CaseStatus, SlaStatus};
pub use engine::{AmlEngine, CustomerStats};
pub use profile::{score_profile, CustomerRiskProfile, RiskProfileInput};
pub use report::{RegulatoryReport, ReportDesk, ReportStatus, ReportType};
pub use rules::{
    EvaluationOutcome, MonitoredTransaction, RuleDefinition, RuleEngine, RuleKind, RuleMatch,
};
pub use screening::{
    IngestReport, MatchStatus, SanctionEntry, SanctionMatch, ScreeningConfig, ScreeningService,
};

use corebank_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmlError {
    #[error("alert '{0}' not found")]
    AlertNotFound(String),

    #[error("case '{0}' not found")]
    CaseNotFound(String),

    #[error("report '{0}' not found")]
    ReportNotFound(String),

    #[error("sanction match '{0}' not found")]
    MatchNotFound(String),

    #[error("illegal status transition {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("closing a case requires a resolution")]
    ResolutionRequired,

    #[error("four-eyes violation: {0}")]
    FourEyes(String),

    #[error("{0}")]
    Validation(String),

    #[error("sanction list ingest error: {0}")]
    Ingest(String),
}

impl AmlError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::AlertNotFound(_)
            | Self::CaseNotFound(_)
            | Self::ReportNotFound(_)
            | Self::MatchNotFound(_) => ErrorKind::NotFound,
            Self::IllegalStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::ResolutionRequired => ErrorKind::Validation,
            Self::FourEyes(_) => ErrorKind::Unauthorized,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Ingest(_) => ErrorKind::Validation,
        }
    }
}
