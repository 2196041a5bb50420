use crate::alert::{risk_level, RiskLevel};
use crate::screening::MatchStatus;
use serde::{Deserialize, Serialize};

/// Facts feeding a customer's derived risk score.
#[derive(Debug, Clone, Default)]
pub struct RiskProfileInput {
    pub total_transactions: u64,
    pub flagged_transactions: u64,
    pub blocked_transactions: u64,
    pub sanction_match: Option<MatchStatus>,
    pub politically_exposed: bool,
    pub high_risk_jurisdiction: bool,
    pub high_risk_business: bool,
    pub sar_filed_count: u32,
}

/// Derived customer risk aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRiskProfile {
    pub customer_id: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub factors: Vec<String>,
}

/// Weighted risk score, capped at 100. Integer arithmetic keeps the result
/// stable across platforms.
pub fn score_profile(customer_id: &str, input: &RiskProfileInput) -> CustomerRiskProfile {
    let mut score: u32 = 0;
    let mut factors = Vec::new();

    if input.total_transactions > 0 {
        let flagged = (input.flagged_transactions.min(input.total_transactions) * 30
            / input.total_transactions) as u32;
        if flagged > 0 {
            score += flagged;
            factors.push(format!(
                "{} of {} transactions flagged",
                input.flagged_transactions, input.total_transactions
            ));
        }

        let blocked = (input.blocked_transactions.min(input.total_transactions) * 10
            / input.total_transactions) as u32;
        if blocked > 0 {
            score += blocked;
            factors.push(format!("{} transactions blocked", input.blocked_transactions));
        }
    }

    match input.sanction_match {
        Some(MatchStatus::Confirmed) => {
            score += 50;
            factors.push("confirmed sanction-list match".to_string());
        }
        Some(MatchStatus::Potential) => {
            score += 20;
            factors.push("potential sanction-list match".to_string());
        }
        Some(MatchStatus::FalsePositive) | None => {}
    }

    if input.politically_exposed {
        score += 15;
        factors.push("politically exposed person".to_string());
    }
    if input.high_risk_jurisdiction {
        score += 10;
        factors.push("high-risk jurisdiction".to_string());
    }
    if input.high_risk_business {
        score += 10;
        factors.push("high-risk business activity".to_string());
    }
    if input.sar_filed_count > 0 {
        let sar = (input.sar_filed_count * 5).min(15);
        score += sar;
        factors.push(format!("{} SAR filings", input.sar_filed_count));
    }

    let risk_score = score.min(100) as u8;
    CustomerRiskProfile {
        customer_id: customer_id.to_string(),
        risk_score,
        risk_level: risk_level(risk_score),
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_customer_scores_zero() {
        let profile = score_profile("CUST-1", &RiskProfileInput::default());
        assert_eq!(profile.risk_score, 0);
        assert_eq!(profile.risk_level, RiskLevel::Low);
        assert!(profile.factors.is_empty());
    }

    #[test]
    fn weights_accumulate_as_specified() {
        let input = RiskProfileInput {
            total_transactions: 10,
            flagged_transactions: 5,
            blocked_transactions: 2,
            sanction_match: Some(MatchStatus::Potential),
            politically_exposed: true,
            high_risk_jurisdiction: true,
            high_risk_business: false,
            sar_filed_count: 2,
        };
        // 15 (flagged ratio) + 2 (blocked ratio) + 20 + 15 + 10 + 10 = 72
        let profile = score_profile("CUST-1", &input);
        assert_eq!(profile.risk_score, 72);
        assert_eq!(profile.risk_level, RiskLevel::High);
    }

    #[test]
    fn sar_component_caps_at_fifteen() {
        let input = RiskProfileInput {
            sar_filed_count: 10,
            ..Default::default()
        };
        let profile = score_profile("CUST-1", &input);
        assert_eq!(profile.risk_score, 15);
    }

    #[test]
    fn score_caps_at_one_hundred_with_confirmed_match() {
        let input = RiskProfileInput {
            total_transactions: 10,
            flagged_transactions: 10,
            blocked_transactions: 10,
            sanction_match: Some(MatchStatus::Confirmed),
            politically_exposed: true,
            high_risk_jurisdiction: true,
            high_risk_business: true,
            sar_filed_count: 5,
        };
        // 30 + 10 + 50 + 15 + 10 + 10 + 15 = 140, capped.
        let profile = score_profile("CUST-1", &input);
        assert_eq!(profile.risk_score, 100);
        assert_eq!(profile.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn false_positive_match_adds_nothing() {
        let input = RiskProfileInput {
            sanction_match: Some(MatchStatus::FalsePositive),
            ..Default::default()
        };
        assert_eq!(score_profile("CUST-1", &input).risk_score, 0);
    }
}
