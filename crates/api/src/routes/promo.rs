//! Promo code validation endpoint
//!
//! Validation is read-only; redemption happens as part of payment
//! settlement, never from this route.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::routes::ok;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub code: String,
    pub amount: i64,
}

pub async fn validate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ValidateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let validation = state
        .promos
        .validate(&body.code, body.amount, user.user_id)
        .await?;
    Ok(ok(validation))
}
