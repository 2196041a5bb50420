use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use corebank_identity::Role;
use corebank_sepa::{
    CreateMandateRequest, MandateType, SepaBatchType, SepaReasonCode, SubmitCreditTransferRequest,
};
use corebank_types::{Currency, Money};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sepa/mandates", post(create_mandate))
        .route("/v1/sepa/mandates/:umr", get(get_mandate))
        .route("/v1/sepa/mandates/:umr/activate", post(activate_mandate))
        .route("/v1/sepa/mandates/:umr/suspend", post(suspend_mandate))
        .route("/v1/sepa/mandates/:umr/cancel", post(cancel_mandate))
        .route("/v1/sepa/mandates/:umr/collections", post(record_collection))
        .route("/v1/sepa/transfers", post(submit_transfer))
        .route("/v1/sepa/transfers/staged", post(stage_transfer))
        .route("/v1/sepa/transfers/:reference", get(get_transfer))
        .route("/v1/sepa/batches", post(create_batch))
        .route("/v1/sepa/batches/:id", get(get_batch))
        .route("/v1/sepa/batches/:id/validate", post(validate_batch))
        .route("/v1/sepa/batches/:id/submit", post(submit_batch))
        .route("/v1/sepa/batches/:id/results", post(record_result))
        .route("/v1/sepa/returns", post(initiate_return).get(list_returns))
        .route("/v1/sepa/returns/:reference/validate", post(validate_return))
        .route("/v1/sepa/returns/:reference/process", post(process_return))
        .route("/v1/sepa/returns/:reference/complete", post(complete_return))
        .route("/v1/sepa/returns/:reference/refund", post(refund_return))
        .route("/v1/sepa/returns/sums/:code", get(sum_by_reason))
}

fn money(amount_minor: i64, currency: &str) -> Result<Money, ApiError> {
    let currency =
        Currency::new(currency.to_string()).map_err(|e| ApiError::validation(e.to_string()))?;
    Ok(Money::from_minor(amount_minor, currency))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MandateRequest {
    debtor_iban: String,
    creditor_iban: String,
    creditor_id: String,
    mandate_type: MandateType,
    one_off: Option<bool>,
    signature_date: NaiveDate,
    max_amount_minor: Option<i64>,
    currency: Option<String>,
    last_collection_date: Option<NaiveDate>,
}

async fn create_mandate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MandateRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/mandates", Access::AtLeast(Role::Operator)).await?;
    let max_amount = match request.max_amount_minor {
        Some(minor) => Some(money(
            minor,
            request.currency.as_deref().unwrap_or("EUR"),
        )?),
        None => None,
    };
    let mandate = state
        .mandates
        .create_mandate(CreateMandateRequest {
            debtor_iban: request.debtor_iban,
            creditor_iban: request.creditor_iban,
            creditor_id: request.creditor_id,
            mandate_type: request.mandate_type,
            one_off: request.one_off.unwrap_or(false),
            signature_date: request.signature_date,
            max_amount,
            last_collection_date: request.last_collection_date,
        })
        .await?;
    Ok(created(&mandate, "mandate created"))
}

async fn get_mandate(
    State(state): State<AppState>,
    Path(umr): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/mandates/get", Access::Authenticated).await?;
    Ok(ok(&state.mandates.get(&umr).await?, "mandate"))
}

async fn activate_mandate(
    State(state): State<AppState>,
    Path(umr): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/mandates/activate", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.mandates.activate(&umr).await?, "mandate activated"))
}

async fn suspend_mandate(
    State(state): State<AppState>,
    Path(umr): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/mandates/suspend", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.mandates.suspend(&umr).await?, "mandate suspended"))
}

async fn cancel_mandate(
    State(state): State<AppState>,
    Path(umr): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/mandates/cancel", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.mandates.cancel(&umr).await?, "mandate cancelled"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionRequest {
    amount_minor: i64,
    currency: String,
    success: bool,
}

async fn record_collection(
    State(state): State<AppState>,
    Path(umr): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CollectionRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/collections", Access::AtLeast(Role::Operator)).await?;
    let amount = money(request.amount_minor, &request.currency)?;
    let mandate = state
        .mandates
        .record_collection(&umr, amount, request.success)
        .await?;
    Ok(ok(&mandate, "collection recorded"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SepaTransferRequest {
    debtor_account: String,
    debtor_iban: String,
    debtor_name: String,
    creditor_iban: String,
    creditor_name: String,
    amount_minor: i64,
    currency: String,
    instant: Option<bool>,
    remittance_info: Option<String>,
}

impl SepaTransferRequest {
    fn into_domain(self) -> Result<SubmitCreditTransferRequest, ApiError> {
        let amount = money(self.amount_minor, &self.currency)?;
        Ok(SubmitCreditTransferRequest {
            debtor_account: self.debtor_account,
            debtor_iban: self.debtor_iban,
            debtor_name: self.debtor_name,
            creditor_iban: self.creditor_iban,
            creditor_name: self.creditor_name,
            amount,
            instant: self.instant.unwrap_or(false),
            remittance_info: self.remittance_info.unwrap_or_default(),
        })
    }
}

async fn submit_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SepaTransferRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/transfers", Access::AtLeast(Role::Operator)).await?;
    let transfer = state
        .sepa
        .submit_credit_transfer(request.into_domain()?)
        .await?;
    Ok(created(&transfer, "sepa transfer submitted"))
}

async fn stage_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SepaTransferRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/transfers/stage", Access::AtLeast(Role::Operator)).await?;
    let transfer = state
        .sepa
        .stage_credit_transfer(request.into_domain()?)
        .await?;
    Ok(created(&transfer, "sepa transfer staged"))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/transfers/get", Access::Authenticated).await?;
    Ok(ok(&state.sepa.get_transfer(&reference).await?, "sepa transfer"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBatchRequest {
    batch_type: SepaBatchType,
    transfer_references: Vec<String>,
}

async fn create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/batches", Access::AtLeast(Role::Operator)).await?;
    let batch = state
        .sepa
        .create_batch(request.batch_type, request.transfer_references)
        .await?;
    Ok(created(&batch, "batch created"))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/batches/get", Access::Authenticated).await?;
    Ok(ok(&state.sepa.get_batch(&id).await?, "batch"))
}

async fn validate_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/batches/validate", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa.validate_batch(&id).await?, "batch validated"))
}

async fn submit_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/batches/submit", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa.submit_batch(&id).await?, "batch submitted"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResultRequest {
    transfer_reference: String,
    success: bool,
}

async fn record_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<BatchResultRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/batches/results", Access::AtLeast(Role::Operator)).await?;
    let batch = state
        .sepa
        .record_transfer_result(&id, &request.transfer_reference, request.success)
        .await?;
    Ok(ok(&batch, "result recorded"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateReturnRequest {
    original_reference: String,
    reason_code: String,
}

async fn initiate_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiateReturnRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns", Access::AtLeast(Role::Operator)).await?;
    let sepa_return = state
        .sepa_returns
        .initiate(&request.original_reference, &request.reason_code)
        .await?;
    Ok(created(&sepa_return, "return initiated"))
}

async fn list_returns(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/list", Access::Authenticated).await?;
    Ok(ok(&state.sepa_returns.list().await, "returns"))
}

async fn validate_return(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/validate", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa_returns.validate(&reference).await?, "return validated"))
}

async fn process_return(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/process", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa_returns.process(&reference).await?, "return processing"))
}

async fn complete_return(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/complete", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa_returns.complete(&reference).await?, "return completed"))
}

async fn refund_return(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/refund", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.sepa_returns.refund(&reference).await?, "return refunded"))
}

async fn sum_by_reason(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/sepa/returns/sums", Access::Authenticated).await?;
    let reason = SepaReasonCode::parse(&code)
        .ok_or_else(|| ApiError::validation(format!("unknown reason code '{code}'")))?;
    let total_minor = state
        .sepa_returns
        .sum_return_amount_by_reason_code(reason)
        .await;
    Ok(ok(
        &serde_json::json!({ "reasonCode": code, "totalAmountMinor": total_minor }),
        "return sum",
    ))
}
