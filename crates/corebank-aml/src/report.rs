use crate::case::CaseDesk;
use crate::AmlError;
use chrono::{DateTime, Utc};
use corebank_types::{new_reference, Clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    Sar,
    Str,
    Ctr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Draft,
    PendingReview,
    Rejected,
    PendingApproval,
    Approved,
    Filed,
    Acknowledged,
}

impl ReportStatus {
    pub fn can_transition_to(self, to: ReportStatus) -> bool {
        matches!(
            (self, to),
            (ReportStatus::Draft, ReportStatus::PendingReview)
                | (ReportStatus::PendingReview, ReportStatus::Rejected)
                | (ReportStatus::PendingReview, ReportStatus::PendingApproval)
                | (ReportStatus::Rejected, ReportStatus::Draft)
                | (ReportStatus::PendingApproval, ReportStatus::Approved)
                | (ReportStatus::Approved, ReportStatus::Filed)
                | (ReportStatus::Filed, ReportStatus::Acknowledged)
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "DRAFT",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Rejected => "REJECTED",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Filed => "FILED",
            Self::Acknowledged => "ACKNOWLEDGED",
        };
        f.write_str(name)
    }
}

/// Regulatory report under four-eyes control: preparer, reviewer and
/// approver must be pairwise distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryReport {
    pub report_id: String,
    pub report_type: ReportType,
    pub case_number: String,
    pub narrative: String,
    pub status: ReportStatus,
    pub prepared_by: String,
    pub reviewed_by: Option<String>,
    pub approved_by: Option<String>,
    pub rejection_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub filed_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Prepares, reviews, approves and files regulatory reports; filing writes
/// the SAR linkage back onto the originating case.
pub struct ReportDesk {
    reports: RwLock<HashMap<String, RegulatoryReport>>,
    cases: Arc<CaseDesk>,
    clock: SharedClock,
}

impl ReportDesk {
    pub fn new(cases: Arc<CaseDesk>, clock: SharedClock) -> Self {
        Self {
            reports: RwLock::new(HashMap::new()),
            cases,
            clock,
        }
    }

    pub async fn prepare(
        &self,
        report_type: ReportType,
        case_number: &str,
        prepared_by: &str,
        narrative: &str,
    ) -> Result<RegulatoryReport, AmlError> {
        // The case must exist before a report can reference it.
        self.cases.get(case_number).await?;
        if narrative.trim().is_empty() {
            return Err(AmlError::Validation(
                "report narrative is required".to_string(),
            ));
        }

        let report = RegulatoryReport {
            report_id: new_reference("RPT"),
            report_type,
            case_number: case_number.to_string(),
            narrative: narrative.to_string(),
            status: ReportStatus::Draft,
            prepared_by: prepared_by.to_string(),
            reviewed_by: None,
            approved_by: None,
            rejection_note: None,
            created_at: self.clock.now(),
            filed_at: None,
            acknowledged_at: None,
        };
        let mut reports = self.reports.write().await;
        reports.insert(report.report_id.clone(), report.clone());
        tracing::info!(report = %report.report_id, case = %case_number, "report prepared");
        Ok(report)
    }

    pub async fn submit_for_review(&self, report_id: &str) -> Result<RegulatoryReport, AmlError> {
        self.transition(report_id, ReportStatus::PendingReview, |_| Ok(()))
            .await
    }

    /// Review by someone other than the preparer.
    pub async fn review(
        &self,
        report_id: &str,
        reviewer: &str,
        approve: bool,
        note: Option<&str>,
    ) -> Result<RegulatoryReport, AmlError> {
        let reviewer = reviewer.to_string();
        let note = note.map(str::to_string);
        let target = if approve {
            ReportStatus::PendingApproval
        } else {
            ReportStatus::Rejected
        };
        self.transition(report_id, target, move |report| {
            if reviewer == report.prepared_by {
                return Err(AmlError::FourEyes(
                    "reviewer must differ from preparer".to_string(),
                ));
            }
            report.reviewed_by = Some(reviewer);
            if !approve {
                report.rejection_note = note;
            }
            Ok(())
        })
        .await
    }

    /// Approval by a third pair of eyes.
    pub async fn approve(
        &self,
        report_id: &str,
        approver: &str,
    ) -> Result<RegulatoryReport, AmlError> {
        let approver = approver.to_string();
        self.transition(report_id, ReportStatus::Approved, move |report| {
            if approver == report.prepared_by {
                return Err(AmlError::FourEyes(
                    "approver must differ from preparer".to_string(),
                ));
            }
            if Some(approver.as_str()) == report.reviewed_by.as_deref() {
                return Err(AmlError::FourEyes(
                    "approver must differ from reviewer".to_string(),
                ));
            }
            report.approved_by = Some(approver);
            Ok(())
        })
        .await
    }

    /// Filing marks the originating case as SAR-filed.
    pub async fn file(&self, report_id: &str) -> Result<RegulatoryReport, AmlError> {
        let now = self.clock.now();
        let report = self
            .transition(report_id, ReportStatus::Filed, move |report| {
                report.filed_at = Some(now);
                Ok(())
            })
            .await?;
        self.cases
            .mark_sar_filed(&report.case_number, &report.report_id)
            .await?;
        tracing::info!(report = %report.report_id, case = %report.case_number, "report filed");
        Ok(report)
    }

    pub async fn acknowledge(&self, report_id: &str) -> Result<RegulatoryReport, AmlError> {
        let now = self.clock.now();
        self.transition(report_id, ReportStatus::Acknowledged, move |report| {
            report.acknowledged_at = Some(now);
            Ok(())
        })
        .await
    }

    /// A rejected report goes back to the preparer's desk.
    pub async fn rework(&self, report_id: &str, narrative: &str) -> Result<RegulatoryReport, AmlError> {
        let narrative = narrative.to_string();
        self.transition(report_id, ReportStatus::Draft, move |report| {
            report.narrative = narrative;
            report.reviewed_by = None;
            report.rejection_note = None;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, report_id: &str) -> Result<RegulatoryReport, AmlError> {
        let reports = self.reports.read().await;
        reports
            .get(report_id)
            .cloned()
            .ok_or_else(|| AmlError::ReportNotFound(report_id.to_string()))
    }

    pub async fn list(&self) -> Vec<RegulatoryReport> {
        let reports = self.reports.read().await;
        let mut all: Vec<RegulatoryReport> = reports.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    async fn transition<F>(
        &self,
        report_id: &str,
        to: ReportStatus,
        apply: F,
    ) -> Result<RegulatoryReport, AmlError>
    where
        F: FnOnce(&mut RegulatoryReport) -> Result<(), AmlError>,
    {
        let mut reports = self.reports.write().await;
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| AmlError::ReportNotFound(report_id.to_string()))?;
        if !report.status.can_transition_to(to) {
            return Err(AmlError::IllegalStateTransition {
                from: report.status.to_string(),
                to: to.to_string(),
            });
        }
        let mut staged = report.clone();
        staged.status = to;
        apply(&mut staged)?;
        *report = staged;
        Ok(report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CasePriority;
    use chrono::Duration;
    use corebank_events::Outbox;
    use corebank_types::SystemClock;

    async fn desk_with_case() -> (ReportDesk, Arc<CaseDesk>, String) {
        let clock: SharedClock = Arc::new(SystemClock);
        let cases = Arc::new(CaseDesk::new(Arc::new(Outbox::new()), clock.clone()));
        let case = cases
            .open_case("CUST-1", vec![], CasePriority::High, Duration::days(5))
            .await
            .unwrap();
        (
            ReportDesk::new(cases.clone(), clock),
            cases,
            case.case_number,
        )
    }

    #[tokio::test]
    async fn four_eyes_workflow_files_and_links_the_case() {
        let (desk, cases, case_number) = desk_with_case().await;
        let report = desk
            .prepare(ReportType::Sar, &case_number, "u1", "structured deposits")
            .await
            .unwrap();

        desk.submit_for_review(&report.report_id).await.unwrap();
        desk.review(&report.report_id, "u2", true, None).await.unwrap();
        desk.approve(&report.report_id, "u3").await.unwrap();
        let filed = desk.file(&report.report_id).await.unwrap();
        assert_eq!(filed.status, ReportStatus::Filed);

        let case = cases.get(&case_number).await.unwrap();
        assert!(case.sar_filed);
        assert_eq!(case.sar_report_id.as_deref(), Some(report.report_id.as_str()));
        assert!(case.sar_filed_at.is_some());

        let acked = desk.acknowledge(&report.report_id).await.unwrap();
        assert_eq!(acked.status, ReportStatus::Acknowledged);

        // Pairwise distinct actors on the filed report.
        assert_ne!(acked.prepared_by, acked.reviewed_by.clone().unwrap());
        assert_ne!(acked.prepared_by, acked.approved_by.clone().unwrap());
        assert_ne!(acked.reviewed_by.unwrap(), acked.approved_by.unwrap());
    }

    #[tokio::test]
    async fn preparer_cannot_review_or_approve() {
        let (desk, _cases, case_number) = desk_with_case().await;
        let report = desk
            .prepare(ReportType::Sar, &case_number, "u1", "narrative")
            .await
            .unwrap();
        desk.submit_for_review(&report.report_id).await.unwrap();

        let err = desk
            .review(&report.report_id, "u1", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AmlError::FourEyes(_)));

        desk.review(&report.report_id, "u2", true, None).await.unwrap();
        let err = desk.approve(&report.report_id, "u1").await.unwrap_err();
        assert!(matches!(err, AmlError::FourEyes(_)));
        let err = desk.approve(&report.report_id, "u2").await.unwrap_err();
        assert!(matches!(err, AmlError::FourEyes(_)));

        // A failed approval leaves the report awaiting a distinct approver.
        let report = desk.get(&report.report_id).await.unwrap();
        assert_eq!(report.status, ReportStatus::PendingApproval);
        assert!(report.approved_by.is_none());
    }

    #[tokio::test]
    async fn rejected_report_can_be_reworked() {
        let (desk, _cases, case_number) = desk_with_case().await;
        let report = desk
            .prepare(ReportType::Str, &case_number, "u1", "first draft")
            .await
            .unwrap();
        desk.submit_for_review(&report.report_id).await.unwrap();
        let rejected = desk
            .review(&report.report_id, "u2", false, Some("needs more detail"))
            .await
            .unwrap();
        assert_eq!(rejected.status, ReportStatus::Rejected);
        assert_eq!(rejected.rejection_note.as_deref(), Some("needs more detail"));

        let reworked = desk
            .rework(&report.report_id, "second draft")
            .await
            .unwrap();
        assert_eq!(reworked.status, ReportStatus::Draft);
        assert!(reworked.reviewed_by.is_none());
    }

    #[tokio::test]
    async fn filing_requires_the_full_ladder() {
        let (desk, _cases, case_number) = desk_with_case().await;
        let report = desk
            .prepare(ReportType::Ctr, &case_number, "u1", "cash report")
            .await
            .unwrap();
        let err = desk.file(&report.report_id).await.unwrap_err();
        assert!(matches!(err, AmlError::IllegalStateTransition { .. }));
    }
}
