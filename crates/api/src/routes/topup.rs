//! Top-up endpoints, manual and automatic

use axum::extract::{Path, State};
use axum::{Extension, Json};
use narra_billing::MidtransNotification;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::routes::ok;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ManualTopupRequest {
    pub amount: i64,
    pub payment_method: String,
}

pub async fn create_manual(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ManualTopupRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = state
        .topups
        .create_manual(user.user_id, body.amount, &body.payment_method)
        .await?;
    Ok(ok(request))
}

#[derive(Deserialize)]
pub struct ProofRequest {
    pub proof_image_url: String,
}

pub async fn submit_proof(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topup_id): Path<Uuid>,
    Json(body): Json<ProofRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = state
        .topups
        .submit_proof(user.user_id, topup_id, &body.proof_image_url)
        .await?;
    Ok(ok(request))
}

#[derive(Deserialize)]
pub struct AutomaticTopupRequest {
    pub amount: i64,
    #[serde(default)]
    pub promo_code: Option<String>,
}

pub async fn create_automatic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AutomaticTopupRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state
        .topups
        .create_automatic(
            user.user_id,
            &user.email,
            body.amount,
            body.promo_code.as_deref(),
        )
        .await?;
    Ok(ok(session))
}

pub async fn list_own(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let requests = state.topups.list_for_user(user.user_id).await?;
    Ok(ok(requests))
}

/// Midtrans notification callback. Authenticated by the payload signature,
/// not a bearer token. Midtrans retries on non-2xx, so every outcome we have
/// already handled (including duplicates) returns 200.
pub async fn midtrans_webhook(
    State(state): State<AppState>,
    Json(notification): Json<MidtransNotification>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.webhooks.handle_notification(&notification).await?;
    Ok(ok(outcome))
}
