use crate::SepaError;
use chrono::{DateTime, NaiveDate, Utc};
use corebank_types::{new_reference, Clock, Money, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateType {
    SddCore,
    SddB2b,
}

/// Collection sequence per the SDD rulebook. A recurring mandate starts at
/// FRST and flips to RCUR after its first successful collection; FNAL and
/// OOFF mandates are spent by one success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateSequence {
    Frst,
    Rcur,
    Fnal,
    Ooff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateStatus {
    Pending,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

impl MandateStatus {
    pub fn can_transition_to(self, to: MandateStatus) -> bool {
        matches!(
            (self, to),
            (MandateStatus::Pending, MandateStatus::Active)
                | (MandateStatus::Pending, MandateStatus::Cancelled)
                | (MandateStatus::Active, MandateStatus::Suspended)
                | (MandateStatus::Active, MandateStatus::Cancelled)
                | (MandateStatus::Active, MandateStatus::Expired)
                | (MandateStatus::Suspended, MandateStatus::Active)
                | (MandateStatus::Suspended, MandateStatus::Cancelled)
        )
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// SEPA direct-debit mandate identified by its UMR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SepaMandate {
    pub umr: String,
    pub debtor_iban: String,
    pub creditor_iban: String,
    pub creditor_id: String,
    pub mandate_type: MandateType,
    pub sequence: MandateSequence,
    pub status: MandateStatus,
    pub signature_date: NaiveDate,
    pub max_amount: Option<Money>,
    pub activation_date: Option<NaiveDate>,
    pub last_collection_date: Option<NaiveDate>,
    pub collections_attempted: u64,
    pub collections_succeeded: u64,
    pub total_amount_collected: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMandateRequest {
    pub debtor_iban: String,
    pub creditor_iban: String,
    pub creditor_id: String,
    pub mandate_type: MandateType,
    pub one_off: bool,
    pub signature_date: NaiveDate,
    pub max_amount: Option<Money>,
    pub last_collection_date: Option<NaiveDate>,
}

/// Owns mandate lifecycle and collection authorization.
pub struct MandateRegistry {
    mandates: RwLock<HashMap<String, SepaMandate>>,
    clock: SharedClock,
}

impl MandateRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            mandates: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn create_mandate(
        &self,
        request: CreateMandateRequest,
    ) -> Result<SepaMandate, SepaError> {
        if request.debtor_iban.trim().is_empty() || request.creditor_iban.trim().is_empty() {
            return Err(SepaError::Validation(
                "debtor and creditor IBAN are required".to_string(),
            ));
        }
        if let Some(max) = &request.max_amount {
            if !max.is_positive() {
                return Err(SepaError::Validation(
                    "mandate max amount must be positive".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        let mandate = SepaMandate {
            umr: new_reference("UMR"),
            debtor_iban: request.debtor_iban,
            creditor_iban: request.creditor_iban,
            creditor_id: request.creditor_id,
            mandate_type: request.mandate_type,
            sequence: if request.one_off {
                MandateSequence::Ooff
            } else {
                MandateSequence::Frst
            },
            status: MandateStatus::Pending,
            signature_date: request.signature_date,
            max_amount: request.max_amount,
            activation_date: None,
            last_collection_date: request.last_collection_date,
            collections_attempted: 0,
            collections_succeeded: 0,
            total_amount_collected: 0,
            created_at: now,
            updated_at: now,
        };

        let mut mandates = self.mandates.write().await;
        mandates.insert(mandate.umr.clone(), mandate.clone());
        tracing::info!(umr = %mandate.umr, "mandate created");
        Ok(mandate)
    }

    /// Activation requires a signature dated today or earlier.
    pub async fn activate(&self, umr: &str) -> Result<SepaMandate, SepaError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut mandates = self.mandates.write().await;
        let mandate = mandates
            .get_mut(umr)
            .ok_or_else(|| SepaError::MandateNotFound(umr.to_string()))?;

        if mandate.signature_date > today {
            return Err(SepaError::SignatureDateInFuture);
        }
        Self::transition(mandate, MandateStatus::Active, now)?;
        mandate.activation_date = Some(today);
        Ok(mandate.clone())
    }

    pub async fn suspend(&self, umr: &str) -> Result<SepaMandate, SepaError> {
        self.set_status(umr, MandateStatus::Suspended).await
    }

    pub async fn cancel(&self, umr: &str) -> Result<SepaMandate, SepaError> {
        self.set_status(umr, MandateStatus::Cancelled).await
    }

    pub async fn get(&self, umr: &str) -> Result<SepaMandate, SepaError> {
        let mandates = self.mandates.read().await;
        mandates
            .get(umr)
            .cloned()
            .ok_or_else(|| SepaError::MandateNotFound(umr.to_string()))
    }

    pub async fn list(&self) -> Vec<SepaMandate> {
        let mandates = self.mandates.read().await;
        let mut all: Vec<SepaMandate> = mandates.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Record a collection attempt against an ACTIVE mandate.
    ///
    /// The first successful collection flips FRST to RCUR; a successful FNAL
    /// or OOFF collection spends the mandate.
    pub async fn record_collection(
        &self,
        umr: &str,
        amount: Money,
        success: bool,
    ) -> Result<SepaMandate, SepaError> {
        if !amount.is_positive() {
            return Err(SepaError::Validation(
                "collection amount must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let mut mandates = self.mandates.write().await;
        let mandate = mandates
            .get_mut(umr)
            .ok_or_else(|| SepaError::MandateNotFound(umr.to_string()))?;

        if mandate.status != MandateStatus::Active {
            return Err(SepaError::MandateNotActive {
                umr: umr.to_string(),
                status: mandate.status.to_string(),
            });
        }
        if let Some(max) = &mandate.max_amount {
            if amount.minor_units > max.minor_units {
                return Err(SepaError::CollectionLimitExceeded {
                    umr: umr.to_string(),
                    amount: amount.to_decimal_string(),
                    max_amount: max.to_decimal_string(),
                });
            }
        }
        let in_window = mandate
            .activation_date
            .map(|start| today >= start)
            .unwrap_or(false)
            && mandate
                .last_collection_date
                .map(|end| today <= end)
                .unwrap_or(true);
        if !in_window {
            return Err(SepaError::CollectionOutsideWindow(umr.to_string()));
        }

        mandate.collections_attempted += 1;
        if success {
            mandate.collections_succeeded += 1;
            mandate.total_amount_collected += amount.minor_units;
            match mandate.sequence {
                MandateSequence::Frst => mandate.sequence = MandateSequence::Rcur,
                MandateSequence::Fnal | MandateSequence::Ooff => {
                    mandate.status = MandateStatus::Expired;
                }
                MandateSequence::Rcur => {}
            }
        }
        mandate.updated_at = now;
        tracing::info!(umr = %umr, success, "collection recorded");
        Ok(mandate.clone())
    }

    async fn set_status(&self, umr: &str, to: MandateStatus) -> Result<SepaMandate, SepaError> {
        let now = self.clock.now();
        let mut mandates = self.mandates.write().await;
        let mandate = mandates
            .get_mut(umr)
            .ok_or_else(|| SepaError::MandateNotFound(umr.to_string()))?;
        Self::transition(mandate, to, now)?;
        Ok(mandate.clone())
    }

    fn transition(
        mandate: &mut SepaMandate,
        to: MandateStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SepaError> {
        if !mandate.status.can_transition_to(to) {
            return Err(SepaError::IllegalStateTransition {
                from: mandate.status.to_string(),
                to: to.to_string(),
            });
        }
        mandate.status = to;
        mandate.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use corebank_types::{Currency, ManualClock};
    use std::sync::Arc;

    fn eur(minor: i64) -> Money {
        Money::from_minor(minor, Currency::new("EUR").unwrap())
    }

    fn registry_at_noon() -> (MandateRegistry, Arc<ManualClock>) {
        let now = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(now));
        (MandateRegistry::new(clock.clone()), clock)
    }

    fn request(signature_days_ago: i64, max_amount: Option<Money>) -> CreateMandateRequest {
        let today = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        CreateMandateRequest {
            debtor_iban: "DE89370400440532013000".to_string(),
            creditor_iban: "FR1420041010050500013M02606".to_string(),
            creditor_id: "DE98ZZZ09999999999".to_string(),
            mandate_type: MandateType::SddCore,
            one_off: false,
            signature_date: today - Duration::days(signature_days_ago),
            max_amount,
            last_collection_date: None,
        }
    }

    #[tokio::test]
    async fn first_success_flips_frst_to_rcur_and_counts() {
        let (registry, _clock) = registry_at_noon();
        let mandate = registry
            .create_mandate(request(1, Some(eur(10_000))))
            .await
            .unwrap();
        assert_eq!(mandate.status, MandateStatus::Pending);
        assert_eq!(mandate.sequence, MandateSequence::Frst);

        registry.activate(&mandate.umr).await.unwrap();
        let after = registry
            .record_collection(&mandate.umr, eur(5_000), true)
            .await
            .unwrap();
        assert_eq!(after.sequence, MandateSequence::Rcur);
        assert_eq!(after.collections_succeeded, 1);
        assert_eq!(after.total_amount_collected, 5_000);
    }

    #[tokio::test]
    async fn collection_above_ceiling_is_rejected() {
        let (registry, _clock) = registry_at_noon();
        let mandate = registry
            .create_mandate(request(1, Some(eur(10_000))))
            .await
            .unwrap();
        registry.activate(&mandate.umr).await.unwrap();

        let err = registry
            .record_collection(&mandate.umr, eur(10_001), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::CollectionLimitExceeded { .. }));

        let unchanged = registry.get(&mandate.umr).await.unwrap();
        assert_eq!(unchanged.collections_attempted, 0);
        assert_eq!(unchanged.total_amount_collected, 0);
    }

    #[tokio::test]
    async fn inactive_mandate_accepts_zero_collections() {
        let (registry, _clock) = registry_at_noon();
        let mandate = registry.create_mandate(request(1, None)).await.unwrap();

        let err = registry
            .record_collection(&mandate.umr, eur(100), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::MandateNotActive { .. }));

        registry.activate(&mandate.umr).await.unwrap();
        registry.suspend(&mandate.umr).await.unwrap();
        let err = registry
            .record_collection(&mandate.umr, eur(100), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::MandateNotActive { .. }));
    }

    #[tokio::test]
    async fn future_signature_blocks_activation() {
        let (registry, _clock) = registry_at_noon();
        let mandate = registry.create_mandate(request(-3, None)).await.unwrap();
        let err = registry.activate(&mandate.umr).await.unwrap_err();
        assert!(matches!(err, SepaError::SignatureDateInFuture));
    }

    #[tokio::test]
    async fn one_off_mandate_is_spent_by_a_single_success() {
        let (registry, _clock) = registry_at_noon();
        let mut req = request(1, None);
        req.one_off = true;
        let mandate = registry.create_mandate(req).await.unwrap();
        registry.activate(&mandate.umr).await.unwrap();

        let spent = registry
            .record_collection(&mandate.umr, eur(2_500), true)
            .await
            .unwrap();
        assert_eq!(spent.status, MandateStatus::Expired);

        let err = registry
            .record_collection(&mandate.umr, eur(2_500), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::MandateNotActive { .. }));
    }

    #[tokio::test]
    async fn collections_outside_the_window_are_rejected() {
        let (registry, clock) = registry_at_noon();
        let mut req = request(1, None);
        req.last_collection_date = NaiveDate::from_ymd_opt(2026, 2, 12);
        let mandate = registry.create_mandate(req).await.unwrap();
        registry.activate(&mandate.umr).await.unwrap();

        clock.advance(Duration::days(5));
        let err = registry
            .record_collection(&mandate.umr, eur(100), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaError::CollectionOutsideWindow(_)));
    }
}
