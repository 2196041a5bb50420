use crate::{created, guard, ok, replayed, Access, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use corebank_identity::Role;
use corebank_transfer::InitiateTransferRequest;
use corebank_types::{Currency, Money};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/transfers", post(initiate).get(list))
        .route("/v1/transfers/:reference", get(get_transfer))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    from_account: String,
    to_account: String,
    amount_minor: i64,
    currency: String,
    idempotency_key: Option<String>,
}

async fn initiate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/transfers", Access::AtLeast(Role::Operator)).await?;
    let currency = Currency::new(request.currency.clone())
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let outcome = state
        .transfers
        .initiate_transfer(InitiateTransferRequest {
            from_account: request.from_account,
            to_account: request.to_account,
            amount: Money::from_minor(request.amount_minor, currency),
            idempotency_key: request.idempotency_key,
        })
        .await?;

    if outcome.replayed {
        Ok(replayed(&outcome.transfer))
    } else {
        Ok(created(&outcome.transfer, "transfer initiated"))
    }
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/transfers/get", Access::Authenticated).await?;
    let transfer = state.transfers.get_transfer(&reference).await?;
    Ok(ok(&transfer, "transfer"))
}

async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/transfers/list", Access::Authenticated).await?;
    let transfers = state.transfers.list_transfers().await;
    Ok(ok(&transfers, "transfers"))
}
