use crate::alert::{alert_type_for_rule_name, risk_level, AlertStatus, AmlAlert};
use crate::rules::{EvaluationOutcome, MonitoredTransaction, RuleEngine};
use crate::AmlError;
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_types::{Clock, SharedClock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Rolling per-customer totals backing the derived risk profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerStats {
    pub total_transactions: u64,
    pub flagged_transactions: u64,
}

/// Event-driven monitoring engine: evaluates every observed transaction and
/// raises an alert when the score clears the flag threshold.
pub struct AmlEngine {
    rules: Mutex<RuleEngine>,
    alerts: RwLock<HashMap<String, AmlAlert>>,
    customer_stats: RwLock<HashMap<String, CustomerStats>>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
}

impl AmlEngine {
    pub fn new(rules: RuleEngine, outbox: Arc<Outbox>, clock: SharedClock) -> Self {
        Self {
            rules: Mutex::new(rules),
            alerts: RwLock::new(HashMap::new()),
            customer_stats: RwLock::new(HashMap::new()),
            outbox,
            clock,
        }
    }

    /// Evaluate one monitored transaction. Returns the alert if the
    /// transaction was flagged.
    pub async fn observe_transaction(
        &self,
        transaction: MonitoredTransaction,
    ) -> Option<AmlAlert> {
        let outcome = {
            let mut rules = self.rules.lock().await;
            rules.evaluate(&transaction)
        };

        if let Some(customer_id) = &transaction.customer_id {
            let mut stats = self.customer_stats.write().await;
            let entry = stats.entry(customer_id.clone()).or_default();
            entry.total_transactions += 1;
            if outcome.flagged {
                entry.flagged_transactions += 1;
            }
        }

        if !outcome.flagged {
            return None;
        }
        Some(self.raise_alert(outcome).await)
    }

    pub async fn customer_stats(&self, customer_id: &str) -> CustomerStats {
        let stats = self.customer_stats.read().await;
        stats.get(customer_id).copied().unwrap_or_default()
    }

    async fn raise_alert(&self, outcome: EvaluationOutcome) -> AmlAlert {
        let now = self.clock.now();
        // Highest-priority triggered rule names the alert type.
        let top = outcome
            .matches
            .iter()
            .max_by_key(|m| m.priority)
            .map(|m| m.kind.name())
            .unwrap_or("");
        let alert = AmlAlert {
            alert_id: Uuid::new_v4().to_string(),
            account_number: outcome.account_number.clone(),
            customer_id: outcome.customer_id.clone(),
            alert_type: alert_type_for_rule_name(top),
            risk_score: outcome.risk_score,
            risk_level: risk_level(outcome.risk_score),
            reasons: outcome.matches.iter().map(|m| m.reason.clone()).collect(),
            status: AlertStatus::Open,
            created_at: now,
            updated_at: now,
        };

        {
            let mut alerts = self.alerts.write().await;
            alerts.insert(alert.alert_id.clone(), alert.clone());
        }

        self.outbox.enqueue(
            topics::AML_EVENTS,
            EventEnvelope::new(
                event_types::AML_ALERT_CREATED,
                alert.account_number.clone(),
                json!({
                    "alertId": alert.alert_id,
                    "accountNumber": alert.account_number,
                    "customerId": alert.customer_id,
                    "alertType": alert.alert_type,
                    "riskScore": alert.risk_score,
                    "riskLevel": alert.risk_level,
                    "reasons": alert.reasons,
                }),
                now,
            ),
        );
        tracing::warn!(
            alert = %alert.alert_id,
            account = %alert.account_number,
            score = alert.risk_score,
            "aml alert created"
        );
        alert
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<AmlAlert, AmlError> {
        let alerts = self.alerts.read().await;
        alerts
            .get(alert_id)
            .cloned()
            .ok_or_else(|| AmlError::AlertNotFound(alert_id.to_string()))
    }

    pub async fn list_alerts(&self) -> Vec<AmlAlert> {
        let alerts = self.alerts.read().await;
        let mut all: Vec<AmlAlert> = alerts.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub async fn set_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
    ) -> Result<AmlAlert, AmlError> {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| AmlError::AlertNotFound(alert_id.to_string()))?;
        if !alert.status.can_transition_to(status) {
            return Err(AmlError::IllegalStateTransition {
                from: alert.status.to_string(),
                to: status.to_string(),
            });
        }
        alert.status = status;
        alert.updated_at = now;
        Ok(alert.clone())
    }
}
