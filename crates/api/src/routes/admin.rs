//! Admin endpoints: plan and promo management, top-up review, invariants

use axum::extract::{Path, State};
use axum::{Extension, Json};
use narra_shared::{DiscountType, PromoCode, SubscriptionPlan};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::ok;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub monthly_requests: i64,
    pub monthly_price: i64,
    pub yearly_price: i64,
    #[serde(default)]
    pub sort_order: i32,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(body): Json<CreatePlanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.monthly_price < 0 || body.yearly_price < 0 {
        return Err(ApiError::BadRequest("prices must not be negative".to_string()));
    }

    let plan: SubscriptionPlan = sqlx::query_as(
        r#"
        INSERT INTO subscription_plans
            (id, name, monthly_requests, monthly_price, yearly_price, is_active, sort_order)
        VALUES ($1, $2, $3, $4, $5, TRUE, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.name)
    .bind(body.monthly_requests)
    .bind(body.monthly_price)
    .bind(body.yearly_price)
    .bind(body.sort_order)
    .fetch_one(&state.pool)
    .await?;

    Ok(ok(plan))
}

#[derive(Deserialize)]
pub struct CreatePromoRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub max_usage: i64,
    #[serde(default = "default_per_user")]
    pub max_usage_per_user: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
    #[serde(default)]
    pub min_amount: i64,
    #[serde(default)]
    pub max_discount: Option<i64>,
}

fn default_per_user() -> i32 {
    1
}

pub async fn create_promo_code(
    State(state): State<AppState>,
    Json(body): Json<CreatePromoRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.valid_from >= body.valid_until {
        return Err(ApiError::BadRequest(
            "valid_from must be before valid_until".to_string(),
        ));
    }
    if body.discount_value <= 0 {
        return Err(ApiError::BadRequest(
            "discount_value must be positive".to_string(),
        ));
    }
    if body.discount_type == DiscountType::Percentage && body.discount_value > 100 {
        return Err(ApiError::BadRequest(
            "percentage discount cannot exceed 100".to_string(),
        ));
    }

    let promo: PromoCode = sqlx::query_as(
        r#"
        INSERT INTO promo_codes
            (id, code, discount_type, discount_value, max_usage, max_usage_per_user,
             valid_from, valid_until, min_amount, max_discount, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(body.code.trim().to_uppercase())
    .bind(body.discount_type)
    .bind(body.discount_value)
    .bind(body.max_usage)
    .bind(body.max_usage_per_user)
    .bind(body.valid_from)
    .bind(body.valid_until)
    .bind(body.min_amount)
    .bind(body.max_discount)
    .fetch_one(&state.pool)
    .await?;

    Ok(ok(promo))
}

/// All plans, inactive included. The public plans route filters to active.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plans: Vec<SubscriptionPlan> =
        sqlx::query_as("SELECT * FROM subscription_plans ORDER BY sort_order ASC")
            .fetch_all(&state.pool)
            .await?;
    Ok(ok(plans))
}

#[derive(Deserialize)]
pub struct UpdatePlanRequest {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub monthly_price: Option<i64>,
    #[serde(default)]
    pub yearly_price: Option<i64>,
}

/// Price changes apply to future charges only; running periods keep what
/// they paid.
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(body): Json<UpdatePlanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.monthly_price.is_some_and(|p| p < 0) || body.yearly_price.is_some_and(|p| p < 0) {
        return Err(ApiError::BadRequest("prices must not be negative".to_string()));
    }

    let plan: Option<SubscriptionPlan> = sqlx::query_as(
        r#"
        UPDATE subscription_plans
        SET is_active = COALESCE($1, is_active),
            monthly_price = COALESCE($2, monthly_price),
            yearly_price = COALESCE($3, yearly_price),
            updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(body.is_active)
    .bind(body.monthly_price)
    .bind(body.yearly_price)
    .bind(plan_id)
    .fetch_optional(&state.pool)
    .await?;

    let plan = plan.ok_or_else(|| ApiError::NotFound(format!("plan {}", plan_id)))?;
    Ok(ok(plan))
}

pub async fn list_promo_codes(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let promos: Vec<PromoCode> =
        sqlx::query_as("SELECT * FROM promo_codes ORDER BY created_at DESC")
            .fetch_all(&state.pool)
            .await?;
    Ok(ok(promos))
}

#[derive(Deserialize)]
pub struct UpdatePromoRequest {
    pub is_active: bool,
}

pub async fn update_promo_code(
    State(state): State<AppState>,
    Path(promo_id): Path<Uuid>,
    Json(body): Json<UpdatePromoRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let promo: Option<PromoCode> = sqlx::query_as(
        "UPDATE promo_codes SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(body.is_active)
    .bind(promo_id)
    .fetch_optional(&state.pool)
    .await?;

    let promo = promo.ok_or_else(|| ApiError::NotFound(format!("promo code {}", promo_id)))?;
    Ok(ok(promo))
}

pub async fn list_pending_topups(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let requests = state.topups.list_under_review(100).await?;
    Ok(ok(requests))
}

#[derive(Deserialize, Default)]
pub struct ReviewRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn approve_topup(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(topup_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = state
        .topups
        .approve(topup_id, admin.user_id, body.notes.as_deref())
        .await?;
    Ok(ok(request))
}

pub async fn reject_topup(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(topup_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = state
        .topups
        .reject(topup_id, admin.user_id, body.notes.as_deref())
        .await?;
    Ok(ok(request))
}

pub async fn run_invariants(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let checker = narra_billing::InvariantChecker::new(state.pool.clone());
    let violations = checker.check_all().await?;
    Ok(ok(serde_json::json!({
        "clean": violations.is_empty(),
        "violations": violations,
    })))
}
