//! Subscription and plan endpoints

use axum::extract::State;
use axum::{Extension, Json};
use narra_shared::BillingCycle;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::ok;
use crate::state::AppState;

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plans = state.subscriptions.list_plans().await?;
    Ok(ok(plans))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let details = state
        .subscriptions
        .get_subscription(user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no subscription for this user".to_string()))?;
    Ok(ok(details))
}

#[derive(Deserialize)]
pub struct UpgradeRequest {
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpgradeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .subscriptions
        .upgrade_plan(user.user_id, body.plan_id, body.billing_cycle)
        .await?;
    Ok(ok(result))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediately: bool,
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CancelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let subscription = state
        .subscriptions
        .cancel_subscription(user.user_id, body.immediately)
        .await?;
    Ok(ok(subscription))
}

#[derive(Deserialize)]
pub struct AutoRenewRequest {
    pub enabled: bool,
}

pub async fn set_auto_renew(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AutoRenewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let subscription = state
        .subscriptions
        .set_auto_renew(user.user_id, body.enabled)
        .await?;
    Ok(ok(subscription))
}
