//! Customer registry.
//!
//! KYC onboarding: a customer walks `PENDING_VERIFICATION → VERIFIED →
//! APPROVED`, may bounce between `APPROVED` and `SUSPENDED`, and ends in
//! `CLOSED`. Documents are verified or rejected individually, expired ones
//! are refused at upload, and every transition lands in an append-only
//! history.

#![deny(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_types::{new_reference, Clock, ErrorKind, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("customer '{0}' not found")]
    NotFound(String),

    #[error("document '{0}' not found")]
    DocumentNotFound(String),

    #[error("illegal status transition {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("document expired on {0}")]
    DocumentExpired(NaiveDate),

    #[error("{0}")]
    Validation(String),
}

impl CustomerError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::DocumentNotFound(_) => ErrorKind::NotFound,
            Self::IllegalStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::DocumentExpired(_) => ErrorKind::Validation,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    PendingVerification,
    Verified,
    Approved,
    Suspended,
    Closed,
}

impl CustomerStatus {
    pub fn can_transition_to(self, to: CustomerStatus) -> bool {
        matches!(
            (self, to),
            (CustomerStatus::PendingVerification, CustomerStatus::Verified)
                | (CustomerStatus::Verified, CustomerStatus::Approved)
                | (CustomerStatus::Approved, CustomerStatus::Suspended)
                | (CustomerStatus::Suspended, CustomerStatus::Approved)
                | (CustomerStatus::Approved, CustomerStatus::Closed)
        )
    }
}

impl fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingVerification => "PENDING_VERIFICATION",
            Self::Verified => "VERIFIED",
            Self::Approved => "APPROVED",
            Self::Suspended => "SUSPENDED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Passport,
    NationalId,
    ProofOfAddress,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocument {
    pub document_id: String,
    pub document_type: DocumentType,
    pub file_reference: String,
    pub expiry_date: Option<NaiveDate>,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerHistoryRecord {
    pub recorded_at: DateTime<Utc>,
    pub actor: String,
    pub change: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub full_name: String,
    pub email: String,
    pub status: CustomerStatus,
    pub documents: Vec<KycDocument>,
    pub history: Vec<CustomerHistoryRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

pub struct CustomerRegistry {
    customers: RwLock<HashMap<String, Customer>>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
}

impl CustomerRegistry {
    pub fn new(outbox: Arc<Outbox>, clock: SharedClock) -> Self {
        Self {
            customers: RwLock::new(HashMap::new()),
            outbox,
            clock,
        }
    }

    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        actor: &str,
    ) -> Result<Customer, CustomerError> {
        if full_name.trim().is_empty() {
            return Err(CustomerError::Validation("full name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(CustomerError::Validation(format!(
                "'{email}' is not a valid email address"
            )));
        }

        let now = self.clock.now();
        let customer = Customer {
            customer_id: new_reference("CUST"),
            full_name: full_name.to_string(),
            email: email.to_string(),
            status: CustomerStatus::PendingVerification,
            documents: Vec::new(),
            history: vec![CustomerHistoryRecord {
                recorded_at: now,
                actor: actor.to_string(),
                change: "customer registered".to_string(),
            }],
            created_at: now,
            updated_at: now,
            version: 0,
        };
        let mut customers = self.customers.write().await;
        customers.insert(customer.customer_id.clone(), customer.clone());
        tracing::info!(customer = %customer.customer_id, "customer registered");
        Ok(customer)
    }

    pub async fn verify(&self, customer_id: &str, actor: &str) -> Result<Customer, CustomerError> {
        self.set_status(customer_id, CustomerStatus::Verified, actor)
            .await
    }

    pub async fn approve(&self, customer_id: &str, actor: &str) -> Result<Customer, CustomerError> {
        self.set_status(customer_id, CustomerStatus::Approved, actor)
            .await
    }

    pub async fn suspend(&self, customer_id: &str, actor: &str) -> Result<Customer, CustomerError> {
        self.set_status(customer_id, CustomerStatus::Suspended, actor)
            .await
    }

    pub async fn reinstate(
        &self,
        customer_id: &str,
        actor: &str,
    ) -> Result<Customer, CustomerError> {
        self.set_status(customer_id, CustomerStatus::Approved, actor)
            .await
    }

    pub async fn close(&self, customer_id: &str, actor: &str) -> Result<Customer, CustomerError> {
        self.set_status(customer_id, CustomerStatus::Closed, actor)
            .await
    }

    /// Upload a KYC document. A document whose expiry lies in the past is
    /// refused outright.
    pub async fn upload_document(
        &self,
        customer_id: &str,
        document_type: DocumentType,
        file_reference: &str,
        expiry_date: Option<NaiveDate>,
        actor: &str,
    ) -> Result<KycDocument, CustomerError> {
        let now = self.clock.now();
        if let Some(expiry) = expiry_date {
            if expiry < now.date_naive() {
                return Err(CustomerError::DocumentExpired(expiry));
            }
        }

        let document = KycDocument {
            document_id: Uuid::new_v4().to_string(),
            document_type,
            file_reference: file_reference.to_string(),
            expiry_date,
            status: DocumentStatus::Uploaded,
            uploaded_at: now,
            reviewed_at: None,
            reviewed_by: None,
            rejection_reason: None,
        };

        let mut customers = self.customers.write().await;
        let customer = customers
            .get_mut(customer_id)
            .ok_or_else(|| CustomerError::NotFound(customer_id.to_string()))?;
        customer.documents.push(document.clone());
        customer.history.push(CustomerHistoryRecord {
            recorded_at: now,
            actor: actor.to_string(),
            change: format!("document {:?} uploaded", document_type),
        });
        customer.updated_at = now;
        customer.version += 1;
        Ok(document)
    }

    pub async fn verify_document(
        &self,
        customer_id: &str,
        document_id: &str,
        actor: &str,
    ) -> Result<KycDocument, CustomerError> {
        self.review_document(customer_id, document_id, actor, None)
            .await
    }

    pub async fn reject_document(
        &self,
        customer_id: &str,
        document_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<KycDocument, CustomerError> {
        self.review_document(customer_id, document_id, actor, Some(reason.to_string()))
            .await
    }

    pub async fn get(&self, customer_id: &str) -> Result<Customer, CustomerError> {
        let customers = self.customers.read().await;
        customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| CustomerError::NotFound(customer_id.to_string()))
    }

    pub async fn list(&self) -> Vec<Customer> {
        let customers = self.customers.read().await;
        let mut all: Vec<Customer> = customers.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    async fn review_document(
        &self,
        customer_id: &str,
        document_id: &str,
        actor: &str,
        rejection_reason: Option<String>,
    ) -> Result<KycDocument, CustomerError> {
        let now = self.clock.now();
        let mut customers = self.customers.write().await;
        let customer = customers
            .get_mut(customer_id)
            .ok_or_else(|| CustomerError::NotFound(customer_id.to_string()))?;
        let document = customer
            .documents
            .iter_mut()
            .find(|d| d.document_id == document_id)
            .ok_or_else(|| CustomerError::DocumentNotFound(document_id.to_string()))?;
        if document.status != DocumentStatus::Uploaded {
            return Err(CustomerError::IllegalStateTransition {
                from: format!("{:?}", document.status),
                to: "review".to_string(),
            });
        }

        let verdict = if rejection_reason.is_some() {
            DocumentStatus::Rejected
        } else {
            DocumentStatus::Verified
        };
        document.status = verdict;
        document.reviewed_at = Some(now);
        document.reviewed_by = Some(actor.to_string());
        document.rejection_reason = rejection_reason;
        let snapshot = document.clone();

        customer.history.push(CustomerHistoryRecord {
            recorded_at: now,
            actor: actor.to_string(),
            change: format!("document {document_id} {verdict:?}"),
        });
        customer.updated_at = now;
        customer.version += 1;
        Ok(snapshot)
    }

    async fn set_status(
        &self,
        customer_id: &str,
        to: CustomerStatus,
        actor: &str,
    ) -> Result<Customer, CustomerError> {
        let now = self.clock.now();
        let mut customers = self.customers.write().await;
        let customer = customers
            .get_mut(customer_id)
            .ok_or_else(|| CustomerError::NotFound(customer_id.to_string()))?;
        if !customer.status.can_transition_to(to) {
            return Err(CustomerError::IllegalStateTransition {
                from: customer.status.to_string(),
                to: to.to_string(),
            });
        }
        let previous = customer.status;
        customer.status = to;
        customer.history.push(CustomerHistoryRecord {
            recorded_at: now,
            actor: actor.to_string(),
            change: format!("status {previous} -> {to}"),
        });
        customer.updated_at = now;
        customer.version += 1;
        let snapshot = customer.clone();

        self.outbox.enqueue(
            topics::USER_EVENTS,
            EventEnvelope::new(
                event_types::CUSTOMER_STATUS_CHANGED,
                customer_id,
                json!({
                    "customerId": customer_id,
                    "from": previous,
                    "to": to,
                }),
                now,
            ),
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use corebank_types::ManualClock;

    fn registry() -> (CustomerRegistry, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(start));
        (
            CustomerRegistry::new(Arc::new(Outbox::new()), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn onboarding_walks_the_status_machine() {
        let (registry, _clock) = registry();
        let customer = registry
            .register("Ada Lovelace", "ada@example.com", "system")
            .await
            .unwrap();
        assert_eq!(customer.status, CustomerStatus::PendingVerification);

        registry.verify(&customer.customer_id, "kyc-bot").await.unwrap();
        let approved = registry
            .approve(&customer.customer_id, "officer-1")
            .await
            .unwrap();
        assert_eq!(approved.status, CustomerStatus::Approved);

        registry.suspend(&customer.customer_id, "officer-2").await.unwrap();
        let back = registry
            .reinstate(&customer.customer_id, "officer-2")
            .await
            .unwrap();
        assert_eq!(back.status, CustomerStatus::Approved);

        // Every transition appended to the history.
        assert_eq!(back.history.len(), 5);
    }

    #[tokio::test]
    async fn skipping_verification_is_rejected() {
        let (registry, _clock) = registry();
        let customer = registry
            .register("Ada Lovelace", "ada@example.com", "system")
            .await
            .unwrap();
        let err = registry
            .approve(&customer.customer_id, "officer-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CustomerError::IllegalStateTransition { .. }));
    }

    #[tokio::test]
    async fn expired_documents_are_refused_at_upload() {
        let (registry, clock) = registry();
        let customer = registry
            .register("Ada Lovelace", "ada@example.com", "system")
            .await
            .unwrap();

        let yesterday = clock.now().date_naive() - Duration::days(1);
        let err = registry
            .upload_document(
                &customer.customer_id,
                DocumentType::Passport,
                "s3://docs/passport.pdf",
                Some(yesterday),
                "ada",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CustomerError::DocumentExpired(_)));

        let tomorrow = clock.now().date_naive() + Duration::days(1);
        let document = registry
            .upload_document(
                &customer.customer_id,
                DocumentType::Passport,
                "s3://docs/passport.pdf",
                Some(tomorrow),
                "ada",
            )
            .await
            .unwrap();
        assert_eq!(document.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn documents_are_reviewed_once() {
        let (registry, _clock) = registry();
        let customer = registry
            .register("Ada Lovelace", "ada@example.com", "system")
            .await
            .unwrap();
        let document = registry
            .upload_document(
                &customer.customer_id,
                DocumentType::NationalId,
                "s3://docs/id.pdf",
                None,
                "ada",
            )
            .await
            .unwrap();

        let verified = registry
            .verify_document(&customer.customer_id, &document.document_id, "kyc-bot")
            .await
            .unwrap();
        assert_eq!(verified.status, DocumentStatus::Verified);

        let err = registry
            .reject_document(
                &customer.customer_id,
                &document.document_id,
                "kyc-bot",
                "already handled",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CustomerError::IllegalStateTransition { .. }));
    }
}
