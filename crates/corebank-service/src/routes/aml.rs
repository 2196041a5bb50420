use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use corebank_aml::{
    score_profile, AlertStatus, CasePriority, MatchStatus, MonitoredTransaction, ReportType,
    RiskProfileInput,
};
use corebank_identity::Role;
use corebank_types::{Clock, Currency, Money};
use serde::Deserialize;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/aml/transactions", post(observe_transaction))
        .route("/v1/aml/alerts", get(list_alerts))
        .route("/v1/aml/alerts/:id", get(get_alert))
        .route("/v1/aml/alerts/:id/status", post(set_alert_status))
        .route("/v1/aml/screening/ingest", post(ingest_sanctions))
        .route("/v1/aml/screening/screen", post(screen_party))
        .route("/v1/aml/screening/matches/:id/status", post(set_match_status))
        .route("/v1/aml/cases", post(open_case).get(list_cases))
        .route("/v1/aml/cases/:id", get(get_case))
        .route("/v1/aml/cases/:id/investigate", post(investigate_case))
        .route("/v1/aml/cases/:id/review", post(review_case))
        .route("/v1/aml/cases/:id/escalate", post(escalate_case))
        .route("/v1/aml/cases/:id/request-closure", post(request_closure))
        .route("/v1/aml/cases/:id/close", post(close_case))
        .route("/v1/aml/cases/:id/reopen", post(reopen_case))
        .route("/v1/aml/cases/:id/notes", post(add_note))
        .route("/v1/aml/reports", post(prepare_report))
        .route("/v1/aml/reports/:id", get(get_report))
        .route("/v1/aml/reports/:id/submit", post(submit_report))
        .route("/v1/aml/reports/:id/review", post(review_report))
        .route("/v1/aml/reports/:id/approve", post(approve_report))
        .route("/v1/aml/reports/:id/file", post(file_report))
        .route("/v1/aml/reports/:id/acknowledge", post(acknowledge_report))
        .route("/v1/aml/reports/:id/rework", post(rework_report))
        .route("/v1/aml/customers/:id/risk-profile", get(risk_profile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObserveTransactionRequest {
    transaction_id: Option<String>,
    account_number: String,
    customer_id: Option<String>,
    amount_minor: i64,
    currency: String,
    occurred_at: Option<DateTime<Utc>>,
}

async fn observe_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ObserveTransactionRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/transactions", Access::AtLeast(Role::Operator)).await?;
    let currency = Currency::new(request.currency.clone())
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let transaction = MonitoredTransaction {
        transaction_id: request
            .transaction_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        account_number: request.account_number,
        customer_id: request.customer_id,
        amount: Money::from_minor(request.amount_minor, currency),
        occurred_at: request.occurred_at.unwrap_or_else(|| state.clock.now()),
    };
    let alert = state.aml.observe_transaction(transaction).await;
    Ok(ok(&alert, "transaction evaluated"))
}

async fn list_alerts(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/alerts", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.aml.list_alerts().await, "alerts"))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/alerts/get", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.aml.get_alert(&id).await?, "alert"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertStatusRequest {
    status: AlertStatus,
}

async fn set_alert_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AlertStatusRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/alerts/status", Access::Exact(Role::Compliance)).await?;
    let alert = state.aml.set_alert_status(&id, request.status).await?;
    Ok(ok(&alert, "alert updated"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    csv: String,
    replace: Option<bool>,
}

async fn ingest_sanctions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/screening/ingest", Access::Exact(Role::Compliance)).await?;
    let report = state
        .screening
        .ingest_csv(&request.csv, request.replace.unwrap_or(false))
        .await?;
    Ok(ok(&report, "sanction list ingested"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenRequest {
    name: String,
    national_id: Option<String>,
    passport_number: Option<String>,
}

async fn screen_party(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScreenRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/screening/screen", Access::Exact(Role::Compliance)).await?;
    let hits = state
        .screening
        .screen_party(
            &request.name,
            request.national_id.as_deref(),
            request.passport_number.as_deref(),
        )
        .await;
    Ok(ok(&hits, "screening finished"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchStatusRequest {
    status: MatchStatus,
}

async fn set_match_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<MatchStatusRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/screening/matches", Access::Exact(Role::Compliance)).await?;
    let updated = state.screening.update_match_status(&id, request.status).await?;
    Ok(ok(&updated, "match updated"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenCaseRequest {
    customer_id: String,
    alert_ids: Option<Vec<String>>,
    priority: CasePriority,
    due_in_hours: Option<i64>,
}

async fn open_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenCaseRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases", Access::Exact(Role::Compliance)).await?;
    let case = state
        .cases
        .open_case(
            &request.customer_id,
            request.alert_ids.unwrap_or_default(),
            request.priority,
            Duration::hours(request.due_in_hours.unwrap_or(72)),
        )
        .await?;
    Ok(created(&case, "case opened"))
}

async fn list_cases(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/list", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.list().await, "cases"))
}

async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/get", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.get(&id).await?, "case"))
}

async fn investigate_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/investigate", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.start_investigation(&id).await?, "investigation started"))
}

async fn review_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/review", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.submit_for_review(&id).await?, "case under review"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EscalateRequest {
    actor: Option<String>,
}

async fn escalate_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<EscalateRequest>,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/aml/cases/escalate", Access::Exact(Role::Compliance)).await?;
    let actor = request.actor.unwrap_or(principal.subject);
    Ok(ok(&state.cases.escalate(&id, &actor).await?, "case escalated"))
}

async fn request_closure(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/request-closure", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.request_closure(&id).await?, "closure requested"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseCaseRequest {
    resolution: String,
}

async fn close_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CloseCaseRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/close", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.close(&id, &request.resolution).await?, "case closed"))
}

async fn reopen_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/cases/reopen", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.cases.reopen(&id).await?, "case reopened"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRequest {
    text: String,
}

async fn add_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NoteRequest>,
) -> Result<Response, ApiError> {
    let principal = guard(&state, &headers, "/aml/cases/notes", Access::Exact(Role::Compliance)).await?;
    let case = state
        .cases
        .add_note(&id, &principal.subject, &request.text)
        .await?;
    Ok(ok(&case, "note added"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareReportRequest {
    report_type: ReportType,
    case_number: String,
    prepared_by: String,
    narrative: String,
}

async fn prepare_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PrepareReportRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports", Access::Exact(Role::Compliance)).await?;
    let report = state
        .reports
        .prepare(
            request.report_type,
            &request.case_number,
            &request.prepared_by,
            &request.narrative,
        )
        .await?;
    Ok(created(&report, "report prepared"))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/get", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.reports.get(&id).await?, "report"))
}

async fn submit_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/submit", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.reports.submit_for_review(&id).await?, "report submitted"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewReportRequest {
    reviewer: String,
    approve: bool,
    note: Option<String>,
}

async fn review_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ReviewReportRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/review", Access::Exact(Role::Compliance)).await?;
    let report = state
        .reports
        .review(&id, &request.reviewer, request.approve, request.note.as_deref())
        .await?;
    Ok(ok(&report, "report reviewed"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveReportRequest {
    approver: String,
}

async fn approve_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ApproveReportRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/approve", Access::AtLeast(Role::Manager)).await?;
    Ok(ok(&state.reports.approve(&id, &request.approver).await?, "report approved"))
}

async fn file_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/file", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.reports.file(&id).await?, "report filed"))
}

async fn acknowledge_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/acknowledge", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.reports.acknowledge(&id).await?, "report acknowledged"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReworkRequest {
    narrative: String,
}

async fn rework_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ReworkRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/reports/rework", Access::Exact(Role::Compliance)).await?;
    Ok(ok(&state.reports.rework(&id, &request.narrative).await?, "report reworked"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskProfileQuery {
    politically_exposed: Option<bool>,
    high_risk_jurisdiction: Option<bool>,
    high_risk_business: Option<bool>,
}

/// Derived risk profile: transaction totals come from the monitoring
/// engine, SAR counts from the case desk; the KYC-owned flags arrive as
/// query parameters because customer due diligence lives upstream.
async fn risk_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RiskProfileQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/aml/risk-profile", Access::Exact(Role::Compliance)).await?;

    let stats = state.aml.customer_stats(&id).await;
    let sar_filed_count = state
        .cases
        .list()
        .await
        .iter()
        .filter(|case| case.customer_id == id && case.sar_filed)
        .count() as u32;
    let sanction_match = state
        .screening
        .matches()
        .await
        .iter()
        .filter(|hit| hit.screened_name == id)
        .map(|hit| hit.status)
        .max_by_key(|status| match status {
            MatchStatus::Confirmed => 2,
            MatchStatus::Potential => 1,
            MatchStatus::FalsePositive => 0,
        });

    let profile = score_profile(
        &id,
        &RiskProfileInput {
            total_transactions: stats.total_transactions,
            flagged_transactions: stats.flagged_transactions,
            blocked_transactions: 0,
            sanction_match,
            politically_exposed: query.politically_exposed.unwrap_or(false),
            high_risk_jurisdiction: query.high_risk_jurisdiction.unwrap_or(false),
            high_risk_business: query.high_risk_business.unwrap_or(false),
            sar_filed_count,
        },
    );
    Ok(ok(&profile, "risk profile"))
}
