use chrono::{DateTime, Duration, NaiveTime, Utc};
use corebank_types::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Velocity,
    Amount,
    DailyLimit,
    TimeBased,
    Structuring,
    RoundAmount,
}

impl RuleKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Velocity => "VELOCITY",
            Self::Amount => "AMOUNT",
            Self::DailyLimit => "DAILY_LIMIT",
            Self::TimeBased => "TIME_BASED",
            Self::Structuring => "STRUCTURING",
            Self::RoundAmount => "ROUND_AMOUNT",
        }
    }
}

/// One monitoring rule. Deterministic: the same transaction stream always
/// produces the same matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_id: String,
    pub kind: RuleKind,
    pub enabled: bool,
    pub threshold_amount_minor: Option<i64>,
    pub threshold_count: Option<u32>,
    pub window_minutes: Option<i64>,
    pub risk_points: u8,
    /// Higher priority wins the alert-type derivation.
    pub priority: u8,
}

/// A transaction as seen by the monitoring pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTransaction {
    pub transaction_id: String,
    pub account_number: String,
    pub customer_id: Option<String>,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub kind: RuleKind,
    pub risk_points: u8,
    pub priority: u8,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub transaction_id: String,
    pub account_number: String,
    pub customer_id: Option<String>,
    pub risk_score: u8,
    pub flagged: bool,
    pub matches: Vec<RuleMatch>,
}

/// Evaluates enabled rules against each monitored transaction, keeping the
/// per-account trailing history the velocity and daily-limit rules need.
pub struct RuleEngine {
    rules: Vec<RuleDefinition>,
    flag_threshold: u8,
    history: HashMap<String, Vec<MonitoredTransaction>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<RuleDefinition>, flag_threshold: u8) -> Self {
        Self {
            rules,
            flag_threshold,
            history: HashMap::new(),
        }
    }

    /// The stock rule set used when no explicit configuration is supplied.
    pub fn with_default_rules(flag_threshold: u8) -> Self {
        let rules = vec![
            RuleDefinition {
                rule_id: "velocity-10-60m".to_string(),
                kind: RuleKind::Velocity,
                enabled: true,
                threshold_amount_minor: None,
                threshold_count: Some(10),
                window_minutes: Some(60),
                risk_points: 25,
                priority: 50,
            },
            RuleDefinition {
                rule_id: "amount-50k".to_string(),
                kind: RuleKind::Amount,
                enabled: true,
                threshold_amount_minor: Some(5_000_000),
                threshold_count: None,
                window_minutes: None,
                risk_points: 35,
                priority: 60,
            },
            RuleDefinition {
                rule_id: "daily-100k".to_string(),
                kind: RuleKind::DailyLimit,
                enabled: true,
                threshold_amount_minor: Some(10_000_000),
                threshold_count: None,
                window_minutes: None,
                risk_points: 30,
                priority: 55,
            },
            RuleDefinition {
                rule_id: "night-5k".to_string(),
                kind: RuleKind::TimeBased,
                enabled: true,
                threshold_amount_minor: Some(500_000),
                threshold_count: None,
                window_minutes: None,
                risk_points: 20,
                priority: 40,
            },
            RuleDefinition {
                rule_id: "structuring-10k".to_string(),
                kind: RuleKind::Structuring,
                enabled: true,
                threshold_amount_minor: Some(1_000_000),
                threshold_count: None,
                window_minutes: None,
                risk_points: 30,
                priority: 70,
            },
            RuleDefinition {
                rule_id: "round-1k".to_string(),
                kind: RuleKind::RoundAmount,
                enabled: true,
                threshold_amount_minor: None,
                threshold_count: None,
                window_minutes: None,
                risk_points: 10,
                priority: 20,
            },
        ];
        Self::new(rules, flag_threshold)
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn evaluate(&mut self, transaction: &MonitoredTransaction) -> EvaluationOutcome {
        let mut matches = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.enabled) {
            if let Some(reason) = self.check(rule, transaction) {
                matches.push(RuleMatch {
                    rule_id: rule.rule_id.clone(),
                    kind: rule.kind,
                    risk_points: rule.risk_points,
                    priority: rule.priority,
                    reason,
                });
            }
        }

        let score: u32 = matches.iter().map(|m| m.risk_points as u32).sum();
        let risk_score = score.min(100) as u8;
        let flagged = risk_score >= self.flag_threshold;

        self.history
            .entry(transaction.account_number.clone())
            .or_default()
            .push(transaction.clone());

        EvaluationOutcome {
            transaction_id: transaction.transaction_id.clone(),
            account_number: transaction.account_number.clone(),
            customer_id: transaction.customer_id.clone(),
            risk_score,
            flagged,
            matches,
        }
    }

    fn check(&self, rule: &RuleDefinition, tx: &MonitoredTransaction) -> Option<String> {
        let amount = tx.amount.minor_units;
        match rule.kind {
            RuleKind::Velocity => {
                let window = Duration::minutes(rule.window_minutes?);
                let threshold = rule.threshold_count? as usize;
                let since = tx.occurred_at - window;
                let prior = self
                    .history
                    .get(&tx.account_number)
                    .map(|txs| {
                        txs.iter()
                            .filter(|t| t.occurred_at > since && t.occurred_at <= tx.occurred_at)
                            .count()
                    })
                    .unwrap_or(0);
                (prior + 1 >= threshold).then(|| {
                    format!(
                        "High velocity: {} transactions within {} minutes",
                        prior + 1,
                        rule.window_minutes.unwrap_or_default()
                    )
                })
            }
            RuleKind::Amount => {
                let threshold = rule.threshold_amount_minor?;
                (amount > threshold).then(|| {
                    format!(
                        "Amount {} exceeds threshold {}",
                        tx.amount.to_decimal_string(),
                        Money::from_minor(threshold, tx.amount.currency.clone())
                            .to_decimal_string()
                    )
                })
            }
            RuleKind::DailyLimit => {
                let threshold = rule.threshold_amount_minor?;
                let today = tx.occurred_at.date_naive();
                let prior_today: i64 = self
                    .history
                    .get(&tx.account_number)
                    .map(|txs| {
                        txs.iter()
                            .filter(|t| {
                                t.occurred_at.date_naive() == today
                                    && t.amount.currency == tx.amount.currency
                            })
                            .map(|t| t.amount.minor_units)
                            .sum()
                    })
                    .unwrap_or(0);
                (prior_today + amount > threshold)
                    .then(|| "Daily cumulative limit exceeded".to_string())
            }
            RuleKind::TimeBased => {
                let threshold = rule.threshold_amount_minor?;
                let cutoff = NaiveTime::from_hms_opt(6, 0, 0).expect("valid cutoff");
                (tx.occurred_at.time() < cutoff && amount > threshold)
                    .then(|| "Large transaction during night hours".to_string())
            }
            RuleKind::Structuring => {
                let threshold = rule.threshold_amount_minor?;
                // 0.90 × threshold ≤ amount < threshold, in integer math.
                (amount * 10 >= threshold * 9 && amount < threshold)
                    .then(|| "Potential structuring detected".to_string())
            }
            RuleKind::RoundAmount => {
                (amount >= 100_000 && amount % 100_000 == 0)
                    .then(|| "Suspiciously round amount".to_string())
            }
        }
    }
}
