use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use corebank_identity::Role;
use corebank_swift::{normalize_bic, ChargeType, Mt103Fields, SubmitSwiftRequest};
use corebank_types::{Currency, Money};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/swift/transfers", post(submit).get(list))
        .route("/v1/swift/transfers/:reference", get(get_transfer))
        .route("/v1/swift/bic/validate", post(validate_bic_endpoint))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwiftTransferRequest {
    ordering_account: String,
    sender_bic: String,
    receiver_bic: String,
    transaction_reference: String,
    bank_operation_code: Option<String>,
    value_date: NaiveDate,
    amount_minor: i64,
    currency: String,
    ordering_customer: String,
    ordering_institution: String,
    correspondent: Option<String>,
    beneficiary_bank: String,
    beneficiary: String,
    remittance_info: Option<String>,
    charge_type: ChargeType,
}

async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SwiftTransferRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/swift/transfers", Access::AtLeast(Role::Operator)).await?;
    let currency = Currency::new(request.currency.clone())
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let fields = Mt103Fields {
        sender_bic: request.sender_bic,
        receiver_bic: request.receiver_bic,
        transaction_reference: request.transaction_reference,
        bank_operation_code: request.bank_operation_code.unwrap_or_else(|| "CRED".to_string()),
        value_date: request.value_date,
        amount: Money::from_minor(request.amount_minor, currency),
        ordering_customer: request.ordering_customer,
        ordering_institution: request.ordering_institution,
        correspondent: request.correspondent,
        beneficiary_bank: request.beneficiary_bank,
        beneficiary: request.beneficiary,
        remittance_info: request.remittance_info,
        charge_type: request.charge_type,
    };
    let transfer = state
        .swift
        .submit(SubmitSwiftRequest {
            ordering_account: request.ordering_account,
            fields,
        })
        .await?;
    Ok(created(&transfer, "swift transfer submitted"))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/swift/transfers/get", Access::Authenticated).await?;
    Ok(ok(&state.swift.get(&reference).await?, "swift transfer"))
}

async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/swift/transfers/list", Access::Authenticated).await?;
    Ok(ok(&state.swift.list().await, "swift transfers"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBicRequest {
    bic: String,
}

async fn validate_bic_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateBicRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/swift/bic", Access::Authenticated).await?;
    let normalized = normalize_bic(&request.bic)?;
    Ok(ok(
        &serde_json::json!({ "bic": request.bic, "normalized": normalized }),
        "bic is valid",
    ))
}
