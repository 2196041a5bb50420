use crate::AmlError;
use chrono::{DateTime, Duration, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_types::{new_reference, Clock, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Investigating,
    PendingReview,
    Escalated,
    PendingClosure,
    Closed,
    Reopened,
}

impl CaseStatus {
    pub fn can_transition_to(self, to: CaseStatus) -> bool {
        matches!(
            (self, to),
            (CaseStatus::Open, CaseStatus::Investigating)
                | (CaseStatus::Investigating, CaseStatus::PendingReview)
                | (CaseStatus::PendingReview, CaseStatus::Escalated)
                | (CaseStatus::PendingReview, CaseStatus::PendingClosure)
                | (CaseStatus::Escalated, CaseStatus::PendingClosure)
                | (CaseStatus::PendingClosure, CaseStatus::Closed)
                | (CaseStatus::Closed, CaseStatus::Reopened)
                | (CaseStatus::Reopened, CaseStatus::Investigating)
        )
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Investigating => "INVESTIGATING",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Escalated => "ESCALATED",
            Self::PendingClosure => "PENDING_CLOSURE",
            Self::Closed => "CLOSED",
            Self::Reopened => "REOPENED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CasePriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    OnTrack,
    AtRisk,
    Overdue,
}

/// Append-only investigator note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseNote {
    pub author: String,
    pub text: String,
    pub noted_at: DateTime<Utc>,
}

/// Investigation case collecting one customer's alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmlCase {
    pub case_number: String,
    pub customer_id: String,
    pub alert_ids: Vec<String>,
    pub priority: CasePriority,
    pub due_date: DateTime<Utc>,
    pub status: CaseStatus,
    pub escalated: bool,
    pub escalated_by: Option<String>,
    pub resolution: Option<String>,
    pub requires_sar_filing: bool,
    pub sar_filed: bool,
    pub sar_report_id: Option<String>,
    pub sar_filed_at: Option<DateTime<Utc>>,
    pub notes: Vec<CaseNote>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl AmlCase {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.due_date && self.status != CaseStatus::Closed
    }

    pub fn sla_status(&self, now: DateTime<Utc>) -> SlaStatus {
        if self.is_overdue(now) {
            SlaStatus::Overdue
        } else if self.status != CaseStatus::Closed && self.due_date - now <= Duration::hours(24) {
            SlaStatus::AtRisk
        } else {
            SlaStatus::OnTrack
        }
    }
}

/// Case workflow owner.
pub struct CaseDesk {
    cases: RwLock<HashMap<String, AmlCase>>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
}

impl CaseDesk {
    pub fn new(outbox: Arc<Outbox>, clock: SharedClock) -> Self {
        Self {
            cases: RwLock::new(HashMap::new()),
            outbox,
            clock,
        }
    }

    pub async fn open_case(
        &self,
        customer_id: &str,
        alert_ids: Vec<String>,
        priority: CasePriority,
        due_in: Duration,
    ) -> Result<AmlCase, AmlError> {
        if customer_id.trim().is_empty() {
            return Err(AmlError::Validation("customer id is required".to_string()));
        }
        let now = self.clock.now();
        let case = AmlCase {
            case_number: new_reference("CASE"),
            customer_id: customer_id.to_string(),
            alert_ids,
            priority,
            due_date: now + due_in,
            status: CaseStatus::Open,
            escalated: false,
            escalated_by: None,
            resolution: None,
            requires_sar_filing: false,
            sar_filed: false,
            sar_report_id: None,
            sar_filed_at: None,
            notes: Vec::new(),
            opened_at: now,
            closed_at: None,
            version: 0,
        };
        let mut cases = self.cases.write().await;
        cases.insert(case.case_number.clone(), case.clone());
        tracing::info!(case = %case.case_number, customer = %customer_id, "case opened");
        Ok(case)
    }

    pub async fn start_investigation(&self, case_number: &str) -> Result<AmlCase, AmlError> {
        self.transition(case_number, CaseStatus::Investigating, |_| {})
            .await
    }

    pub async fn submit_for_review(&self, case_number: &str) -> Result<AmlCase, AmlError> {
        self.transition(case_number, CaseStatus::PendingReview, |_| {})
            .await
    }

    /// Escalation records the actor and emits `aml.case.escalated.v1`.
    pub async fn escalate(&self, case_number: &str, actor: &str) -> Result<AmlCase, AmlError> {
        let actor = actor.to_string();
        let case = self
            .transition(case_number, CaseStatus::Escalated, move |case| {
                case.escalated = true;
                case.escalated_by = Some(actor);
            })
            .await?;

        self.outbox.enqueue(
            topics::AML_EVENTS,
            EventEnvelope::new(
                event_types::AML_CASE_ESCALATED,
                case.customer_id.clone(),
                json!({
                    "caseNumber": case.case_number,
                    "customerId": case.customer_id,
                    "escalatedBy": case.escalated_by,
                    "priority": case.priority,
                }),
                self.clock.now(),
            ),
        );
        Ok(case)
    }

    pub async fn request_closure(&self, case_number: &str) -> Result<AmlCase, AmlError> {
        self.transition(case_number, CaseStatus::PendingClosure, |_| {})
            .await
    }

    /// Closure requires a resolution value.
    pub async fn close(&self, case_number: &str, resolution: &str) -> Result<AmlCase, AmlError> {
        if resolution.trim().is_empty() {
            return Err(AmlError::ResolutionRequired);
        }
        let resolution = resolution.to_string();
        let now = self.clock.now();
        self.transition(case_number, CaseStatus::Closed, move |case| {
            case.resolution = Some(resolution);
            case.closed_at = Some(now);
        })
        .await
    }

    /// Reopening clears the closure timestamp.
    pub async fn reopen(&self, case_number: &str) -> Result<AmlCase, AmlError> {
        self.transition(case_number, CaseStatus::Reopened, |case| {
            case.closed_at = None;
        })
        .await
    }

    pub async fn add_note(
        &self,
        case_number: &str,
        author: &str,
        text: &str,
    ) -> Result<AmlCase, AmlError> {
        let now = self.clock.now();
        let mut cases = self.cases.write().await;
        let case = cases
            .get_mut(case_number)
            .ok_or_else(|| AmlError::CaseNotFound(case_number.to_string()))?;
        case.notes.push(CaseNote {
            author: author.to_string(),
            text: text.to_string(),
            noted_at: now,
        });
        case.version += 1;
        Ok(case.clone())
    }

    pub async fn attach_alert(
        &self,
        case_number: &str,
        alert_id: &str,
    ) -> Result<AmlCase, AmlError> {
        let mut cases = self.cases.write().await;
        let case = cases
            .get_mut(case_number)
            .ok_or_else(|| AmlError::CaseNotFound(case_number.to_string()))?;
        if !case.alert_ids.iter().any(|id| id == alert_id) {
            case.alert_ids.push(alert_id.to_string());
            case.version += 1;
        }
        Ok(case.clone())
    }

    /// Filing hook used by the report desk.
    pub async fn mark_sar_filed(
        &self,
        case_number: &str,
        report_id: &str,
    ) -> Result<AmlCase, AmlError> {
        let now = self.clock.now();
        let mut cases = self.cases.write().await;
        let case = cases
            .get_mut(case_number)
            .ok_or_else(|| AmlError::CaseNotFound(case_number.to_string()))?;
        case.sar_filed = true;
        case.sar_report_id = Some(report_id.to_string());
        case.sar_filed_at = Some(now);
        case.requires_sar_filing = true;
        case.version += 1;
        Ok(case.clone())
    }

    pub async fn get(&self, case_number: &str) -> Result<AmlCase, AmlError> {
        let cases = self.cases.read().await;
        cases
            .get(case_number)
            .cloned()
            .ok_or_else(|| AmlError::CaseNotFound(case_number.to_string()))
    }

    pub async fn list(&self) -> Vec<AmlCase> {
        let cases = self.cases.read().await;
        let mut all: Vec<AmlCase> = cases.values().cloned().collect();
        all.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        all
    }

    pub async fn overdue_cases(&self) -> Vec<AmlCase> {
        let now = self.clock.now();
        let cases = self.cases.read().await;
        cases
            .values()
            .filter(|case| case.is_overdue(now))
            .cloned()
            .collect()
    }

    async fn transition<F>(
        &self,
        case_number: &str,
        to: CaseStatus,
        apply: F,
    ) -> Result<AmlCase, AmlError>
    where
        F: FnOnce(&mut AmlCase),
    {
        let mut cases = self.cases.write().await;
        let case = cases
            .get_mut(case_number)
            .ok_or_else(|| AmlError::CaseNotFound(case_number.to_string()))?;
        if !case.status.can_transition_to(to) {
            return Err(AmlError::IllegalStateTransition {
                from: case.status.to_string(),
                to: to.to_string(),
            });
        }
        case.status = to;
        apply(case);
        case.version += 1;
        Ok(case.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use corebank_types::ManualClock;

    fn desk() -> (CaseDesk, Arc<ManualClock>, Arc<Outbox>) {
        let start = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(start));
        let outbox = Arc::new(Outbox::new());
        (
            CaseDesk::new(outbox.clone(), clock.clone()),
            clock,
            outbox,
        )
    }

    #[tokio::test]
    async fn full_workflow_walks_to_closure() {
        let (desk, _clock, _outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec!["AL-1".to_string()], CasePriority::High, Duration::days(3))
            .await
            .unwrap();

        desk.start_investigation(&case.case_number).await.unwrap();
        desk.submit_for_review(&case.case_number).await.unwrap();
        desk.request_closure(&case.case_number).await.unwrap();
        let closed = desk
            .close(&case.case_number, "No suspicious pattern confirmed")
            .await
            .unwrap();

        assert_eq!(closed.status, CaseStatus::Closed);
        assert!(closed.closed_at.is_some());
        assert_eq!(
            closed.resolution.as_deref(),
            Some("No suspicious pattern confirmed")
        );
    }

    #[tokio::test]
    async fn closure_requires_a_resolution() {
        let (desk, _clock, _outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec![], CasePriority::Low, Duration::days(3))
            .await
            .unwrap();
        desk.start_investigation(&case.case_number).await.unwrap();
        desk.submit_for_review(&case.case_number).await.unwrap();
        desk.request_closure(&case.case_number).await.unwrap();

        let err = desk.close(&case.case_number, "   ").await.unwrap_err();
        assert!(matches!(err, AmlError::ResolutionRequired));
    }

    #[tokio::test]
    async fn escalation_records_actor_and_emits_event() {
        let (desk, _clock, outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec![], CasePriority::Critical, Duration::days(1))
            .await
            .unwrap();
        desk.start_investigation(&case.case_number).await.unwrap();
        desk.submit_for_review(&case.case_number).await.unwrap();

        let escalated = desk.escalate(&case.case_number, "analyst-7").await.unwrap();
        assert!(escalated.escalated);
        assert_eq!(escalated.escalated_by.as_deref(), Some("analyst-7"));
        assert_eq!(outbox.pending(), 1);
    }

    #[tokio::test]
    async fn reopen_resets_closed_at() {
        let (desk, _clock, _outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec![], CasePriority::Medium, Duration::days(3))
            .await
            .unwrap();
        desk.start_investigation(&case.case_number).await.unwrap();
        desk.submit_for_review(&case.case_number).await.unwrap();
        desk.request_closure(&case.case_number).await.unwrap();
        desk.close(&case.case_number, "resolved").await.unwrap();

        let reopened = desk.reopen(&case.case_number).await.unwrap();
        assert_eq!(reopened.status, CaseStatus::Reopened);
        assert!(reopened.closed_at.is_none());

        let investigating = desk.start_investigation(&case.case_number).await.unwrap();
        assert_eq!(investigating.status, CaseStatus::Investigating);
    }

    #[tokio::test]
    async fn skipping_workflow_stages_is_rejected() {
        let (desk, _clock, _outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec![], CasePriority::Low, Duration::days(3))
            .await
            .unwrap();

        let err = desk.close(&case.case_number, "done").await.unwrap_err();
        assert!(matches!(err, AmlError::IllegalStateTransition { .. }));
        let err = desk.escalate(&case.case_number, "x").await.unwrap_err();
        assert!(matches!(err, AmlError::IllegalStateTransition { .. }));
    }

    #[tokio::test]
    async fn sla_tracks_due_date() {
        let (desk, clock, _outbox) = desk();
        let case = desk
            .open_case("CUST-1", vec![], CasePriority::High, Duration::days(2))
            .await
            .unwrap();
        assert_eq!(case.sla_status(clock.now()), SlaStatus::OnTrack);

        clock.advance(Duration::days(1) + Duration::hours(1));
        let case = desk.get(&case.case_number).await.unwrap();
        assert_eq!(case.sla_status(clock.now()), SlaStatus::AtRisk);

        clock.advance(Duration::days(2));
        assert_eq!(case.sla_status(clock.now()), SlaStatus::Overdue);
        assert!(case.is_overdue(clock.now()));
        assert_eq!(desk.overdue_cases().await.len(), 1);
    }
}
