//! REST surface of the CoreBank platform.
//!
//! Wires the domain cores together behind an axum router: bearer-token
//! authentication with role gates, the uniform response envelope, the
//! outbox pump, the saga recovery loop and the AML event consumer.

#![deny(unsafe_code)]

pub mod config;
pub mod routes;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Duration;
use config::PlatformConfig;
use corebank_aml::{AmlEngine, CaseDesk, MonitoredTransaction, ReportDesk, RuleEngine, ScreeningConfig, ScreeningService};
use corebank_customer::CustomerRegistry;
use corebank_events::{
    event_types, topics, InMemoryEventBus, Outbox, OutboxPump,
};
use corebank_identity::{
    EndpointClass, IdentityConfig, IdentityService, InMemoryCounterStore, Principal, RateLimiter,
    RateLimiterConfig, Role,
};
use corebank_ledger::{JournalStorageConfig, Ledger, LedgerConfig};
use corebank_saga::{InMemorySagaStore, SharedSagaStore};
use corebank_sepa::{MandateRegistry, MockSettlementNetwork, SepaGateway, SepaReturnService};
use corebank_swift::{
    ComplianceGate, ComplianceVerdict, MockCorrespondent, Mt103Fields, SwiftDesk, SwiftFees,
};
use corebank_transfer::{TransferRecovery, TransferService, TransferServiceConfig};
use corebank_types::{Currency, ErrorKind, Money, SharedClock, SystemClock};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub platform: PlatformConfig,
    pub journal: JournalStorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            journal: JournalStorageConfig::Memory,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ledger bootstrap failed: {0}")]
    Ledger(#[from] corebank_ledger::LedgerError),
}

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<PlatformConfig>,
    pub clock: SharedClock,
    pub outbox: Arc<Outbox>,
    pub bus: Arc<InMemoryEventBus>,
    pub ledger: Arc<Ledger>,
    pub saga_store: SharedSagaStore,
    pub transfers: Arc<TransferService>,
    pub mandates: Arc<MandateRegistry>,
    pub sepa: Arc<SepaGateway>,
    pub sepa_returns: Arc<SepaReturnService>,
    pub swift: Arc<SwiftDesk>,
    pub aml: Arc<AmlEngine>,
    pub screening: Arc<ScreeningService>,
    pub cases: Arc<CaseDesk>,
    pub reports: Arc<ReportDesk>,
    pub customers: Arc<CustomerRegistry>,
    pub identity: Arc<IdentityService>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig { platform, journal } = config;
        let clock: SharedClock = Arc::new(SystemClock);
        let outbox = Arc::new(Outbox::new());
        let bus = Arc::new(InMemoryEventBus::new());

        let ledger = Arc::new(
            Ledger::bootstrap(journal, outbox.clone(), clock.clone(), LedgerConfig::default())
                .await?,
        );
        let saga_store: SharedSagaStore = Arc::new(InMemorySagaStore::new());
        let transfers = Arc::new(TransferService::new(
            ledger.clone(),
            saga_store.clone(),
            outbox.clone(),
            clock.clone(),
            TransferServiceConfig {
                step_timeout: Duration::seconds(platform.saga_step_timeout_secs),
                stuck_threshold: Duration::seconds(platform.saga_stuck_threshold_secs),
            },
        ));

        let mandates = Arc::new(MandateRegistry::new(clock.clone()));
        let sepa = Arc::new(SepaGateway::new(
            ledger.clone(),
            Arc::new(MockSettlementNetwork { accept_all: true }),
            saga_store.clone(),
            outbox.clone(),
            clock.clone(),
        ));
        let sepa_returns = Arc::new(SepaReturnService::new(
            sepa.clone(),
            ledger.clone(),
            outbox.clone(),
            clock.clone(),
        ));

        let screening = Arc::new(ScreeningService::new(
            ScreeningConfig::default(),
            clock.clone(),
        ));
        let swift = Arc::new(SwiftDesk::new(
            ledger.clone(),
            Arc::new(ScreeningGate {
                screening: screening.clone(),
            }),
            Arc::new(MockCorrespondent { accept_all: true }),
            outbox.clone(),
            clock.clone(),
            SwiftFees {
                fixed_minor: platform.swift_fee_fixed_minor,
                percentage_bps: platform.swift_fee_percentage_bps,
            },
        ));

        let rule_engine = match &platform.aml_rules {
            Some(rules) => RuleEngine::new(rules.clone(), platform.aml_flag_threshold),
            None => RuleEngine::with_default_rules(platform.aml_flag_threshold),
        };
        let aml = Arc::new(AmlEngine::new(rule_engine, outbox.clone(), clock.clone()));
        let cases = Arc::new(CaseDesk::new(outbox.clone(), clock.clone()));
        let reports = Arc::new(ReportDesk::new(cases.clone(), clock.clone()));
        let customers = Arc::new(CustomerRegistry::new(outbox.clone(), clock.clone()));

        let identity = Arc::new(IdentityService::new(
            outbox.clone(),
            clock.clone(),
            IdentityConfig {
                token_ttl: Duration::hours(8),
                failed_attempts_lock: platform.auth_failed_attempts_lock,
                otp_ttl: Duration::seconds(platform.otp_ttl_secs),
            },
        ));
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimiterConfig {
                default_rpm: platform.ratelimit_default_rpm,
                auth_rpm: platform.ratelimit_auth_rpm,
            },
            clock.clone(),
        ));

        Ok(Self {
            platform: Arc::new(platform),
            clock,
            outbox,
            bus,
            ledger,
            saga_store,
            transfers,
            mandates,
            sepa,
            sepa_returns,
            swift,
            aml,
            screening,
            cases,
            reports,
            customers,
            identity,
            limiter,
        })
    }
}

/// SWIFT compliance gate backed by the sanction index.
struct ScreeningGate {
    screening: Arc<ScreeningService>,
}

#[async_trait]
impl ComplianceGate for ScreeningGate {
    async fn screen(&self, fields: &Mt103Fields) -> ComplianceVerdict {
        for party in [&fields.beneficiary, &fields.ordering_customer] {
            let hits = self.screening.screen_party(party, None, None).await;
            if let Some(hit) = hits.first() {
                return ComplianceVerdict::Blocked(format!(
                    "party '{party}' matched sanction entry '{}'",
                    hit.entry_id
                ));
            }
        }
        ComplianceVerdict::Cleared
    }
}

/// Spawn the pump, the recovery loop and the AML consumer.
pub fn spawn_background(state: &AppState) -> Vec<JoinHandle<()>> {
    let pump = OutboxPump::new(
        state.outbox.clone(),
        state.bus.clone(),
        std::time::Duration::from_millis(200),
    );
    let recovery = TransferRecovery::new(
        state.transfers.clone(),
        state.saga_store.clone(),
        state.clock.clone(),
        Duration::seconds(state.platform.saga_stuck_threshold_secs),
        std::time::Duration::from_secs(state.platform.saga_recovery_interval_secs),
    );
    vec![pump.spawn(), recovery.spawn(), spawn_aml_consumer(state.clone())]
}

/// Feeds completed transfers into the monitoring engine. The customer
/// linkage resolves through the ledger's account record.
fn spawn_aml_consumer(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = state.bus.subscribe(topics::TRANSFER_EVENTS).await;
        while let Some(event) = events.recv().await {
            if event.event_type != event_types::TRANSFER_COMPLETED {
                continue;
            }
            let payload = &event.payload;
            let (Some(from_account), Some(amount_minor), Some(currency)) = (
                payload.get("fromAccount").and_then(Value::as_str),
                payload.get("amountMinor").and_then(Value::as_i64),
                payload.get("currency").and_then(Value::as_str),
            ) else {
                tracing::warn!(event = %event.event_id, "malformed transfer event payload");
                continue;
            };
            let Ok(currency) = Currency::new(currency.to_string()) else {
                continue;
            };
            let customer_id = match state.ledger.account(from_account).await {
                Ok(account) => Some(account.customer_id),
                Err(_) => None,
            };
            let transaction = MonitoredTransaction {
                transaction_id: event.event_id.clone(),
                account_number: from_account.to_string(),
                customer_id,
                amount: Money::from_minor(amount_minor, currency),
                occurred_at: event.occurred_at,
            };
            if let Some(alert) = state.aml.observe_transaction(transaction).await {
                tracing::warn!(alert = %alert.alert_id, "transfer flagged by monitoring");
            }
        }
    })
}

// ── Response envelope and error mapping ──────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    pub data: Value,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

pub fn respond<T: Serialize>(status: StatusCode, data: &T, message: &str) -> Response {
    let body = Envelope {
        success: true,
        data: serde_json::to_value(data).unwrap_or(Value::Null),
        message: message.to_string(),
        error_code: None,
    };
    (status, Json(body)).into_response()
}

pub fn ok<T: Serialize>(data: &T, message: &str) -> Response {
    respond(StatusCode::OK, data, message)
}

pub fn created<T: Serialize>(data: &T, message: &str) -> Response {
    respond(StatusCode::CREATED, data, message)
}

/// Idempotency replays answer 409 and still carry the existing resource.
pub fn replayed<T: Serialize>(data: &T) -> Response {
    let body = Envelope {
        success: true,
        data: serde_json::to_value(data).unwrap_or(Value::Null),
        message: "idempotency key already processed".to_string(),
        error_code: Some(ErrorKind::IdempotencyReplay.code().to_string()),
    };
    (StatusCode::CONFLICT, Json(body)).into_response()
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation
            | ErrorKind::InvalidStateTransition
            | ErrorKind::InsufficientFunds
            | ErrorKind::LimitExceeded => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Duplicate | ErrorKind::IdempotencyReplay | ErrorKind::Concurrency => {
                StatusCode::CONFLICT
            }
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Dependency => StatusCode::BAD_GATEWAY,
            ErrorKind::Compensation => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: false,
            data: Value::Null,
            message: self.message.clone(),
            error_code: Some(self.kind.code().to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

macro_rules! impl_api_error_from {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(err: $error) -> Self {
                    ApiError::new(err.error_kind(), err.to_string())
                }
            }
        )*
    };
}

impl_api_error_from!(
    corebank_ledger::LedgerError,
    corebank_transfer::TransferError,
    corebank_sepa::SepaError,
    corebank_swift::SwiftError,
    corebank_aml::AmlError,
    corebank_customer::CustomerError,
    corebank_identity::IdentityError,
    corebank_saga::SagaError,
    corebank_events::EventError,
);

// ── Authentication and role gates ────────────────────────────────────

/// What a route demands beyond a valid token.
#[derive(Debug, Clone, Copy)]
pub enum Access {
    Authenticated,
    AtLeast(Role),
    Exact(Role),
}

/// Authenticate the bearer token, rate-limit the caller, enforce the role
/// requirement.
pub async fn guard(
    state: &AppState,
    headers: &HeaderMap,
    endpoint: &str,
    access: Access,
) -> Result<Principal, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated("missing bearer token"))?;

    let principal = state.identity.verify_token(token).await?;
    state
        .limiter
        .check(&principal.subject, endpoint, EndpointClass::Business)?;

    let allowed = match access {
        Access::Authenticated => true,
        Access::AtLeast(role) => principal.has_at_least(role),
        Access::Exact(role) => principal.has_role(role),
    };
    if !allowed {
        return Err(ApiError::unauthorized(format!(
            "subject '{}' lacks the required role",
            principal.subject
        )));
    }
    Ok(principal)
}

// ── Router ───────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .merge(routes::auth::router())
        .merge(routes::accounts::router())
        .merge(routes::transfers::router())
        .merge(routes::sepa::router())
        .merge(routes::swift::router())
        .merge(routes::aml::router())
        .merge(routes::customers::router())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    journal_backend: &'static str,
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    ok(
        &HealthResponse {
            status: "ok",
            service: "corebank-service",
            journal_backend: state.ledger.journal_backend(),
        },
        "healthy",
    )
}
