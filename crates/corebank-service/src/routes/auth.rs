use crate::{created, guard, ok, Access, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use corebank_identity::{EndpointClass, Role};
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/users", post(register_user))
        .route("/v1/auth/login", post(login))
        .route("/v1/auth/logout", post(logout))
        .route("/v1/auth/users/:subject/unlock", post(unlock))
        .route("/v1/auth/otp/:subject", post(issue_otp))
        .route("/v1/auth/otp/:subject/verify", post(verify_otp))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUserRequest {
    subject: String,
    password: String,
    roles: Vec<Role>,
}

async fn register_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterUserRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/auth/users", Access::AtLeast(Role::Admin)).await?;
    state
        .identity
        .register_user(&request.subject, &request.password, request.roles)
        .await?;
    Ok(created(&serde_json::json!({ "subject": request.subject }), "user registered"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    subject: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    subject: String,
    roles: Vec<Role>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Login is unauthenticated but rate-limited per subject; the auth bucket
/// fails closed on a store outage.
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    state
        .limiter
        .check(&request.subject, "/auth/login", EndpointClass::Auth)?;
    let token = state
        .identity
        .login(&request.subject, &request.password)
        .await?;
    Ok(ok(
        &LoginResponse {
            token: token.token,
            subject: token.subject,
            roles: token.roles,
            expires_at: token.expires_at,
        },
        "login succeeded",
    ))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    guard(&state, &headers, "/auth/logout", Access::Authenticated).await?;
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated("missing bearer token"))?;
    state.identity.revoke_token(token).await?;
    Ok(ok(&serde_json::json!({}), "token revoked"))
}

async fn unlock(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/auth/unlock", Access::AtLeast(Role::Admin)).await?;
    state.identity.unlock_account(&subject).await?;
    Ok(ok(&serde_json::json!({ "subject": subject }), "account unlocked"))
}

async fn issue_otp(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = guard(&state, &headers, "/auth/otp", Access::Authenticated).await?;
    if principal.subject != subject && !principal.has_at_least(Role::Admin) {
        return Err(ApiError::unauthorized("may only request an OTP for yourself"));
    }
    // The code goes to the delivery channel, never into the response body.
    let _code = state.identity.issue_otp(&subject).await?;
    tracing::info!(subject = %subject, "otp issued");
    Ok(ok(&serde_json::json!({ "subject": subject }), "otp issued"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpRequest {
    code: String,
}

async fn verify_otp(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    headers: HeaderMap,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Response, ApiError> {
    guard(&state, &headers, "/auth/otp/verify", Access::Authenticated).await?;
    state.identity.verify_otp(&subject, &request.code).await?;
    Ok(ok(&serde_json::json!({ "subject": subject }), "otp verified"))
}
