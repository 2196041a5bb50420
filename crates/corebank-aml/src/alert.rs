use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk bands over the 0..100 score. The mapping is a pure function of the
/// score with thresholds 0/30/60/80.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

pub fn risk_level(score: u8) -> RiskLevel {
    match score {
        0..=29 => RiskLevel::Low,
        30..=59 => RiskLevel::Medium,
        60..=79 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Velocity,
    AmountThreshold,
    DailyLimit,
    OffHours,
    Structuring,
    RoundAmount,
    SanctionScreening,
    Other,
}

/// Name-level mapping from a rule name to the alert type, falling back to
/// OTHER for anything unmapped.
pub fn alert_type_for_rule_name(name: &str) -> AlertType {
    match name {
        "VELOCITY" => AlertType::Velocity,
        "AMOUNT" => AlertType::AmountThreshold,
        "DAILY_LIMIT" => AlertType::DailyLimit,
        "TIME_BASED" => AlertType::OffHours,
        "STRUCTURING" => AlertType::Structuring,
        "ROUND_AMOUNT" => AlertType::RoundAmount,
        "SANCTION_SCREENING" => AlertType::SanctionScreening,
        _ => AlertType::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    UnderReview,
    Cleared,
    Escalated,
}

impl AlertStatus {
    pub fn can_transition_to(self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Open, AlertStatus::UnderReview)
                | (AlertStatus::Open, AlertStatus::Escalated)
                | (AlertStatus::UnderReview, AlertStatus::Cleared)
                | (AlertStatus::UnderReview, AlertStatus::Escalated)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Cleared => "CLEARED",
            Self::Escalated => "ESCALATED",
        };
        f.write_str(name)
    }
}

/// Monitoring alert raised for a flagged transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmlAlert {
    pub alert_id: String,
    pub account_number: String,
    pub customer_id: Option<String>,
    pub alert_type: AlertType,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn thresholds_are_exact() {
        assert_eq!(risk_level(0), RiskLevel::Low);
        assert_eq!(risk_level(29), RiskLevel::Low);
        assert_eq!(risk_level(30), RiskLevel::Medium);
        assert_eq!(risk_level(59), RiskLevel::Medium);
        assert_eq!(risk_level(60), RiskLevel::High);
        assert_eq!(risk_level(79), RiskLevel::High);
        assert_eq!(risk_level(80), RiskLevel::Critical);
        assert_eq!(risk_level(100), RiskLevel::Critical);
    }

    #[test]
    fn unmapped_rule_names_fall_back_to_other() {
        assert_eq!(alert_type_for_rule_name("STRUCTURING"), AlertType::Structuring);
        assert_eq!(
            alert_type_for_rule_name("SANCTION_SCREENING"),
            AlertType::SanctionScreening
        );
        assert_eq!(alert_type_for_rule_name("GEO_FENCE"), AlertType::Other);
        assert_eq!(alert_type_for_rule_name(""), AlertType::Other);
    }

    proptest! {
        #[test]
        fn risk_level_is_monotone(a in 0u8..=100, b in 0u8..=100) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(risk_level(lo) <= risk_level(hi));
        }
    }
}
