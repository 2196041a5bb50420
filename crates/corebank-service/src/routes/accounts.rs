use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use corebank_identity::Role;
use corebank_ledger::AccountType;
use corebank_types::{Currency, Money};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/accounts", post(open_account))
        .route("/v1/accounts/:number", get(get_account))
        .route("/v1/accounts/:number/history", get(history))
        .route("/v1/accounts/:number/audit", get(audit))
        .route("/v1/accounts/:number/credit", post(credit))
        .route("/v1/accounts/:number/debit", post(debit))
        .route("/v1/accounts/:number/freeze", post(freeze))
        .route("/v1/accounts/:number/activate", post(activate))
        .route("/v1/accounts/:number/close", post(close))
}

fn parse_money(amount_minor: i64, currency: &str) -> Result<Money, ApiError> {
    let currency =
        Currency::new(currency.to_string()).map_err(|e| ApiError::validation(e.to_string()))?;
    Ok(Money::from_minor(amount_minor, currency))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenAccountRequest {
    customer_id: String,
    account_type: AccountType,
    currency: String,
    initial_balance_minor: i64,
}

async fn open_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenAccountRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts", Access::AtLeast(Role::Operator)).await?;
    let initial = parse_money(request.initial_balance_minor, &request.currency)?;
    let account = state
        .ledger
        .open_account(&request.customer_id, request.account_type, initial)
        .await?;
    Ok(created(&account, "account opened"))
}

async fn get_account(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/get", Access::Authenticated).await?;
    let account = state.ledger.account(&number).await?;
    Ok(ok(&account, "account"))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn history(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/history", Access::Authenticated).await?;
    let lines = state.ledger.history(&number, query.from, query.to).await?;
    Ok(ok(&lines, "posting history"))
}

async fn audit(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/audit", Access::Authenticated).await?;
    let consistent = state.ledger.verify_account_consistency(&number).await?;
    Ok(ok(
        &serde_json::json!({ "accountNumber": number, "consistent": consistent }),
        "balance audit",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostingRequest {
    amount_minor: i64,
    currency: String,
    reference_id: String,
    description: Option<String>,
}

async fn credit(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PostingRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/credit", Access::AtLeast(Role::Operator)).await?;
    let amount = parse_money(request.amount_minor, &request.currency)?;
    let line = state
        .ledger
        .credit(
            &number,
            amount,
            &request.reference_id,
            request.description.as_deref().unwrap_or("Credit"),
        )
        .await?;
    Ok(created(&line, "credit posted"))
}

async fn debit(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PostingRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/debit", Access::AtLeast(Role::Operator)).await?;
    let amount = parse_money(request.amount_minor, &request.currency)?;
    let line = state
        .ledger
        .debit(
            &number,
            amount,
            &request.reference_id,
            request.description.as_deref().unwrap_or("Debit"),
        )
        .await?;
    Ok(created(&line, "debit posted"))
}

async fn freeze(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/freeze", Access::AtLeast(Role::Admin)).await?;
    let account = state.ledger.freeze(&number).await?;
    Ok(ok(&account, "account frozen"))
}

async fn activate(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/activate", Access::AtLeast(Role::Admin)).await?;
    let account = state.ledger.activate(&number).await?;
    Ok(ok(&account, "account activated"))
}

async fn close(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/accounts/close", Access::AtLeast(Role::Admin)).await?;
    let account = state.ledger.close(&number).await?;
    Ok(ok(&account, "account closed"))
}
