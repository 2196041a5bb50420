use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use corebank_customer::DocumentType;
use corebank_identity::Role;
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/customers", post(register).get(list))
        .route("/v1/customers/:id", get(get_customer))
        .route("/v1/customers/:id/verify", post(verify))
        .route("/v1/customers/:id/approve", post(approve))
        .route("/v1/customers/:id/suspend", post(suspend))
        .route("/v1/customers/:id/reinstate", post(reinstate))
        .route("/v1/customers/:id/close", post(close))
        .route("/v1/customers/:id/documents", post(upload_document))
        .route("/v1/customers/:id/documents/:doc/verify", post(verify_document))
        .route("/v1/customers/:id/documents/:doc/reject", post(reject_document))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    full_name: String,
    email: String,
}

async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let principal = guard(&state, &headers, "/customers", Access::AtLeast(Role::Operator)).await?;
    let customer = state
        .customers
        .register(&request.full_name, &request.email, &principal.subject)
        .await?;
    Ok(created(&customer, "customer registered"))
}

async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/customers/list", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(&state.customers.list().await, "customers"))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/customers/get", Access::Authenticated).await?;
    Ok(ok(&state.customers.get(&id).await?, "customer"))
}

async fn verify(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/verify", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(
        &state.customers.verify(&id, &principal.subject).await?,
        "customer verified",
    ))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/approve", Access::AtLeast(Role::Operator)).await?;
    Ok(ok(
        &state.customers.approve(&id, &principal.subject).await?,
        "customer approved",
    ))
}

async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/suspend", Access::AtLeast(Role::Admin)).await?;
    Ok(ok(
        &state.customers.suspend(&id, &principal.subject).await?,
        "customer suspended",
    ))
}

async fn reinstate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/reinstate", Access::AtLeast(Role::Admin)).await?;
    Ok(ok(
        &state.customers.reinstate(&id, &principal.subject).await?,
        "customer reinstated",
    ))
}

async fn close(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/close", Access::AtLeast(Role::Admin)).await?;
    Ok(ok(
        &state.customers.close(&id, &principal.subject).await?,
        "customer closed",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadDocumentRequest {
    document_type: DocumentType,
    file_reference: String,
    expiry_date: Option<NaiveDate>,
}

async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UploadDocumentRequest>,
) -> Result<Response, ApiError> {
    let principal =
        guard(&state, &headers, "/customers/documents", Access::AtLeast(Role::Operator)).await?;
    let document = state
        .customers
        .upload_document(
            &id,
            request.document_type,
            &request.file_reference,
            request.expiry_date,
            &principal.subject,
        )
        .await?;
    Ok(created(&document, "document uploaded"))
}

async fn verify_document(
    State(state): State<AppState>,
    Path((id, doc)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = guard(
        &state,
        &headers,
        "/customers/documents/verify",
        Access::AtLeast(Role::Operator),
    )
    .await?;
    let document = state
        .customers
        .verify_document(&id, &doc, &principal.subject)
        .await?;
    Ok(ok(&document, "document verified"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectDocumentRequest {
    reason: String,
}

async fn reject_document(
    State(state): State<AppState>,
    Path((id, doc)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<RejectDocumentRequest>,
) -> Result<Response, ApiError> {
    let principal = guard(
        &state,
        &headers,
        "/customers/documents/reject",
        Access::AtLeast(Role::Operator),
    )
    .await?;
    let document = state
        .customers
        .reject_document(&id, &doc, &principal.subject, &request.reason)
        .await?;
    Ok(ok(&document, "document rejected"))
}
