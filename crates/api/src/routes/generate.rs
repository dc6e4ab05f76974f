//! AI generation endpoint
//!
//! The one place quota is enforced. The period count comes from the
//! append-only call log, never from the cached counter, and the call itself
//! is logged whatever the upstream outcome.

use axum::extract::State;
use axum::{Extension, Json};
use narra_shared::{ApiCallStatus, SubscriptionStatus, UserSubscription};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::ok;
use crate::state::AppState;

const ENDPOINT: &str = "/api/v1/generate";

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

/// A subscription row entitles generation only while ACTIVE and inside its
/// paid period. Canceled, suspended, and expired rows still exist (for
/// history and resubscription) but grant nothing; calls made after
/// current_period_end would also escape the period-bounded usage count.
fn entitles_generation(sub: &UserSubscription, now: OffsetDateTime) -> bool {
    sub.status == SubscriptionStatus::Active && now <= sub.current_period_end
}

pub async fn generate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<GenerateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }

    let details = state
        .subscriptions
        .get_subscription(user.user_id)
        .await?
        .ok_or_else(|| {
            ApiError::PaymentRequired("an active subscription is required".to_string())
        })?;

    let sub = &details.subscription;
    if !entitles_generation(sub, OffsetDateTime::now_utc()) {
        return Err(ApiError::PaymentRequired(
            "an active subscription is required".to_string(),
        ));
    }

    if !details.plan.is_unlimited() && sub.requests_used >= sub.requests_limit {
        state
            .reconciler
            .record_call(
                user.user_id,
                ENDPOINT,
                ApiCallStatus::RateLimited,
                0,
                Some("monthly quota exhausted"),
            )
            .await?;
        return Err(ApiError::PaymentRequired(format!(
            "monthly quota of {} requests exhausted",
            sub.requests_limit
        )));
    }

    match state.gemini.generate(&body.prompt).await {
        Ok(result) => {
            state
                .reconciler
                .record_call(
                    user.user_id,
                    ENDPOINT,
                    ApiCallStatus::Success,
                    result.total_tokens,
                    None,
                )
                .await?;

            Ok(ok(json!({
                "text": result.text,
                "total_tokens": result.total_tokens,
                "requests_used": sub.requests_used + 1,
                "requests_limit": sub.requests_limit,
            })))
        }
        Err(err) => {
            state
                .reconciler
                .record_call(
                    user.user_id,
                    ENDPOINT,
                    ApiCallStatus::Failed,
                    0,
                    Some(&err.to_string()),
                )
                .await?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use narra_shared::BillingCycle;
    use time::Duration;
    use uuid::Uuid;

    fn subscription(status: SubscriptionStatus, period_end: OffsetDateTime) -> UserSubscription {
        let now = OffsetDateTime::now_utc();
        UserSubscription {
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            billing_cycle: BillingCycle::Monthly,
            status,
            current_period_start: period_end - Duration::days(30),
            current_period_end: period_end,
            requests_used: 0,
            requests_limit: 100,
            auto_renew: true,
            cancel_at_period_end: false,
            canceled_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_active_subscription_in_period_entitles() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription(SubscriptionStatus::Active, now + Duration::days(10));
        assert!(entitles_generation(&sub, now));
    }

    #[test]
    fn test_inactive_statuses_do_not_entitle() {
        let now = OffsetDateTime::now_utc();
        for status in [
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Expired,
        ] {
            let sub = subscription(status, now + Duration::days(10));
            assert!(!entitles_generation(&sub, now), "{:?}", status);
        }
    }

    #[test]
    fn test_active_row_past_period_end_does_not_entitle() {
        // A stale ACTIVE row whose period already ended must not serve:
        // calls recorded now fall outside the period window, so the usage
        // count would never grow to meet the limit.
        let now = OffsetDateTime::now_utc();
        let sub = subscription(SubscriptionStatus::Active, now - Duration::hours(1));
        assert!(!entitles_generation(&sub, now));
    }

    #[test]
    fn test_period_end_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription(SubscriptionStatus::Active, now);
        assert!(entitles_generation(&sub, now));
    }
}
