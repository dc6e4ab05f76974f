//! Subscription lifecycle management
//!
//! Owns upgrades, auto-renewal, and cancellation, including the
//! period-rollover and quota-reset rules. All writes to user_subscriptions go
//! through this service and carry an optimistic version check, so a scheduler
//! renewal racing a user cancel fails loudly instead of silently overwriting.

use narra_shared::{
    BillingCycle, PaymentStatus, PaymentType, SubscriptionPlan, SubscriptionStatus,
    UserSubscription,
};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::usage::UsageReconciler;
use crate::wallet::WalletService;

/// Lookahead before current_period_end during which renewal may fire
pub const RENEWAL_WINDOW: Duration = Duration::hours(24);

/// A downgrade is blocked while more than this much paid period remains
pub const DOWNGRADE_GRACE: Duration = Duration::days(7);

/// Advance a timestamp by one billing cycle (calendar month or year).
/// Month arithmetic clamps the day to the target month's length, so a period
/// starting Jan 31 rolls to Feb 28 (29 in leap years).
pub fn advance_period(ts: OffsetDateTime, cycle: BillingCycle) -> OffsetDateTime {
    match cycle {
        BillingCycle::Monthly => add_months(ts, 1),
        BillingCycle::Yearly => add_months(ts, 12),
    }
}

fn add_months(ts: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = ts.date();
    let total = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = total.div_euclid(12);
    let month = time::Month::try_from((total.rem_euclid(12) + 1) as u8)
        .unwrap_or(time::Month::January);
    let day = date.day().min(month.length(year));
    let new_date = time::Date::from_calendar_date(year, month, day).unwrap_or(date);
    ts.replace_date(new_date)
}

/// Whether a subscription ending at `period_end` is eligible for renewal now.
/// Past-due periods stay eligible so a late scheduler run can still renew.
pub fn is_within_renewal_window(period_end: OffsetDateTime, now: OffsetDateTime) -> bool {
    period_end - now <= RENEWAL_WINDOW
}

/// The anti-downgrade-abuse rule: moving to a cheaper plan is rejected while
/// more than seven days of the paid period remain. Returns the user-facing
/// rejection message, or None when the change is allowed.
pub fn downgrade_block_reason(
    new_price: i64,
    current_price: i64,
    period_end: OffsetDateTime,
    now: OffsetDateTime,
) -> Option<String> {
    if new_price >= current_price {
        return None;
    }
    let remaining = period_end - now;
    if remaining <= DOWNGRADE_GRACE {
        return None;
    }
    Some(format!(
        "Cannot downgrade with {} days remaining in the current period. Please wait for the natural renewal.",
        remaining.whole_days()
    ))
}

/// Subscription plus its plan, returned by reads
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionDetails {
    pub subscription: UserSubscription,
    pub plan: SubscriptionPlan,
}

/// Result of a successful plan upgrade
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpgradeResult {
    pub payment_id: Uuid,
    pub subscription: UserSubscription,
}

/// What an auto-renewal attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalAction {
    NotDue,
    Renewed,
    DisabledAutoRenew,
}

/// Outcome of a `process_auto_renew` call
#[derive(Debug, Clone, serde::Serialize)]
pub struct RenewalOutcome {
    pub success: bool,
    pub action: RenewalAction,
    pub message: String,
}

/// Subscription lifecycle manager
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    wallet: WalletService,
    reconciler: UsageReconciler,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        let wallet = WalletService::new(pool.clone());
        let reconciler = UsageReconciler::new(pool.clone());
        Self {
            pool,
            wallet,
            reconciler,
        }
    }

    /// Fetch a user's subscription with its plan, reconciling the cached
    /// usage counter against api_call_logs before returning it. The counter
    /// is never authoritative on its own.
    pub async fn get_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionDetails>> {
        let Some(mut subscription) = self.fetch_subscription(user_id).await? else {
            return Ok(None);
        };

        subscription.requests_used = self
            .reconciler
            .reconcile(
                user_id,
                subscription.current_period_start,
                subscription.current_period_end,
            )
            .await?;

        let plan = self.fetch_plan(subscription.plan_id).await?;
        Ok(Some(SubscriptionDetails { subscription, plan }))
    }

    /// List active plans ordered by tier
    pub async fn list_plans(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        let plans = sqlx::query_as(
            "SELECT * FROM subscription_plans WHERE is_active = TRUE ORDER BY sort_order ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    /// Change to a new plan or billing cycle, charging the wallet.
    ///
    /// Any successful change opens a fresh commercial period: usage resets to
    /// zero and the period restarts at `now`, whether the move is an upgrade,
    /// a downgrade, or a cycle change.
    pub async fn upgrade_plan(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        cycle: BillingCycle,
    ) -> BillingResult<UpgradeResult> {
        let now = OffsetDateTime::now_utc();
        let plan = self.fetch_plan(plan_id).await?;
        if !plan.is_active {
            return Err(BillingError::PlanNotFound(format!(
                "plan {} is not active",
                plan_id
            )));
        }

        let current = self.fetch_subscription(user_id).await?;

        if let Some(ref sub) = current {
            if sub.status == SubscriptionStatus::Active {
                if sub.plan_id == plan_id && sub.billing_cycle == cycle {
                    return Err(BillingError::AlreadySubscribed(format!(
                        "already on plan {} ({})",
                        plan.name, cycle
                    )));
                }

                let current_plan = self.fetch_plan(sub.plan_id).await?;
                let current_price = current_plan.price_for(sub.billing_cycle);
                if let Some(reason) = downgrade_block_reason(
                    plan.price_for(cycle),
                    current_price,
                    sub.current_period_end,
                    now,
                ) {
                    return Err(BillingError::DowngradeRejected(reason));
                }
            }
        }

        let price = plan.price_for(cycle);
        let period_start = now;
        let period_end = advance_period(now, cycle);

        let mut tx = self.pool.begin().await?;

        self.wallet.apply_debit(&mut tx, user_id, price).await?;

        let payment_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payment_history
                (id, user_id, payment_type, amount, status, payment_method, plan_id, notes)
            VALUES ($1, $2, $3, $4, $5, 'WALLET', $6, $7)
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(PaymentType::Subscription)
        .bind(price)
        .bind(PaymentStatus::Completed)
        .bind(plan_id)
        .bind(format!("{} plan, {} billing", plan.name, cycle))
        .execute(&mut *tx)
        .await?;

        match current {
            Some(sub) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE user_subscriptions
                    SET plan_id = $1,
                        billing_cycle = $2,
                        status = $3,
                        current_period_start = $4,
                        current_period_end = $5,
                        requests_used = 0,
                        requests_limit = $6,
                        auto_renew = TRUE,
                        cancel_at_period_end = FALSE,
                        canceled_at = NULL,
                        version = version + 1,
                        updated_at = NOW()
                    WHERE user_id = $7 AND version = $8
                    "#,
                )
                .bind(plan_id)
                .bind(cycle)
                .bind(SubscriptionStatus::Active)
                .bind(period_start)
                .bind(period_end)
                .bind(plan.monthly_requests)
                .bind(user_id)
                .bind(sub.version)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    return Err(BillingError::ConcurrentModification(
                        "subscription was modified by another operation, please retry".to_string(),
                    ));
                }
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO user_subscriptions
                        (user_id, plan_id, billing_cycle, status, current_period_start,
                         current_period_end, requests_used, requests_limit, auto_renew,
                         cancel_at_period_end)
                    VALUES ($1, $2, $3, $4, $5, $6, 0, $7, TRUE, FALSE)
                    "#,
                )
                .bind(user_id)
                .bind(plan_id)
                .bind(cycle)
                .bind(SubscriptionStatus::Active)
                .bind(period_start)
                .bind(period_end)
                .bind(plan.monthly_requests)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan.name,
            cycle = %cycle,
            price = price,
            period_end = %period_end,
            "Subscription upgraded"
        );

        let subscription = self
            .fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::Internal("subscription vanished after upgrade".into()))?;

        Ok(UpgradeResult {
            payment_id,
            subscription,
        })
    }

    /// Attempt an auto-renewal. Safe to call speculatively: outside the
    /// renewal window it reports "not yet due" with no side effects.
    pub async fn process_auto_renew(&self, user_id: Uuid) -> BillingResult<RenewalOutcome> {
        let now = OffsetDateTime::now_utc();
        let sub = self
            .fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        if !sub.auto_renew || sub.status != SubscriptionStatus::Active {
            return Ok(RenewalOutcome {
                success: false,
                action: RenewalAction::NotDue,
                message: "auto-renew is not enabled for this subscription".to_string(),
            });
        }

        if !is_within_renewal_window(sub.current_period_end, now) {
            return Ok(RenewalOutcome {
                success: false,
                action: RenewalAction::NotDue,
                message: "renewal is not yet due".to_string(),
            });
        }

        let plan = self.fetch_plan(sub.plan_id).await?;
        let price = plan.price_for(sub.billing_cycle);

        let balance = self.wallet.get_wallet(user_id).await?.balance;
        if balance < price {
            // No debit happens. Suspend and stop renewing; the user resolves
            // this by topping up and upgrading again.
            let updated = sqlx::query(
                r#"
                UPDATE user_subscriptions
                SET auto_renew = FALSE,
                    cancel_at_period_end = TRUE,
                    status = $1,
                    version = version + 1,
                    updated_at = NOW()
                WHERE user_id = $2 AND version = $3
                "#,
            )
            .bind(SubscriptionStatus::Suspended)
            .bind(user_id)
            .bind(sub.version)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(BillingError::ConcurrentModification(
                    "subscription changed while suspending, please retry".to_string(),
                ));
            }

            tracing::warn!(
                user_id = %user_id,
                balance = balance,
                price = price,
                "Insufficient balance for renewal, subscription suspended"
            );

            return Ok(RenewalOutcome {
                success: false,
                action: RenewalAction::DisabledAutoRenew,
                message: format!(
                    "insufficient balance ({} < {}), auto-renew disabled",
                    balance, price
                ),
            });
        }

        // Extend from the old period end, not from now: a late scheduler run
        // must not drift the billing anchor.
        let new_start = sub.current_period_end;
        let new_end = advance_period(sub.current_period_end, sub.billing_cycle);

        let mut tx = self.pool.begin().await?;

        self.wallet.apply_debit(&mut tx, user_id, price).await?;

        sqlx::query(
            r#"
            INSERT INTO payment_history
                (id, user_id, payment_type, amount, status, payment_method, plan_id, notes)
            VALUES ($1, $2, $3, $4, $5, 'WALLET', $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(PaymentType::Subscription)
        .bind(price)
        .bind(PaymentStatus::Completed)
        .bind(sub.plan_id)
        .bind(format!("Auto-renewal: {} plan, {} billing", plan.name, sub.billing_cycle))
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET current_period_start = $1,
                current_period_end = $2,
                requests_used = 0,
                status = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $4 AND version = $5
            "#,
        )
        .bind(new_start)
        .bind(new_end)
        .bind(SubscriptionStatus::Active)
        .bind(user_id)
        .bind(sub.version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(BillingError::ConcurrentModification(
                "subscription changed during renewal, please retry".to_string(),
            ));
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan.name,
            price = price,
            new_period_end = %new_end,
            "Subscription auto-renewed"
        );

        Ok(RenewalOutcome {
            success: true,
            action: RenewalAction::Renewed,
            message: format!("renewed until {}", new_end),
        })
    }

    /// Cancel a subscription, either immediately or at the end of the period.
    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
        immediately: bool,
    ) -> BillingResult<UserSubscription> {
        let sub = self
            .fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        let updated = if immediately {
            sqlx::query(
                r#"
                UPDATE user_subscriptions
                SET status = $1,
                    auto_renew = FALSE,
                    canceled_at = NOW(),
                    version = version + 1,
                    updated_at = NOW()
                WHERE user_id = $2 AND version = $3
                "#,
            )
            .bind(SubscriptionStatus::Canceled)
            .bind(user_id)
            .bind(sub.version)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE user_subscriptions
                SET auto_renew = FALSE,
                    cancel_at_period_end = TRUE,
                    canceled_at = NOW(),
                    version = version + 1,
                    updated_at = NOW()
                WHERE user_id = $1 AND version = $2
                "#,
            )
            .bind(user_id)
            .bind(sub.version)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if updated == 0 {
            return Err(BillingError::ConcurrentModification(
                "subscription changed during cancellation, please retry".to_string(),
            ));
        }

        tracing::info!(
            user_id = %user_id,
            immediately = immediately,
            "Subscription canceled"
        );

        self.fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::Internal("subscription vanished after cancel".into()))
    }

    /// Toggle auto-renew. Enabling it also clears the at-period-end cancel.
    pub async fn set_auto_renew(
        &self,
        user_id: Uuid,
        enabled: bool,
    ) -> BillingResult<UserSubscription> {
        let sub = self
            .fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET auto_renew = $1,
                cancel_at_period_end = CASE WHEN $1 THEN FALSE ELSE cancel_at_period_end END,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $2 AND version = $3
            "#,
        )
        .bind(enabled)
        .bind(user_id)
        .bind(sub.version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(BillingError::ConcurrentModification(
                "subscription changed while updating auto-renew, please retry".to_string(),
            ));
        }

        self.fetch_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::Internal("subscription vanished after update".into()))
    }

    async fn fetch_subscription(&self, user_id: Uuid) -> BillingResult<Option<UserSubscription>> {
        let sub = sqlx::query_as("SELECT * FROM user_subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sub)
    }

    async fn fetch_plan(&self, plan_id: Uuid) -> BillingResult<SubscriptionPlan> {
        let plan: Option<SubscriptionPlan> =
            sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        plan.ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_advance_period_monthly() {
        let start = datetime!(2025-03-15 08:30:00 UTC);
        assert_eq!(
            advance_period(start, BillingCycle::Monthly),
            datetime!(2025-04-15 08:30:00 UTC)
        );
    }

    #[test]
    fn test_advance_period_clamps_month_end() {
        let jan31 = datetime!(2025-01-31 00:00:00 UTC);
        assert_eq!(
            advance_period(jan31, BillingCycle::Monthly),
            datetime!(2025-02-28 00:00:00 UTC)
        );

        let jan31_leap = datetime!(2024-01-31 00:00:00 UTC);
        assert_eq!(
            advance_period(jan31_leap, BillingCycle::Monthly),
            datetime!(2024-02-29 00:00:00 UTC)
        );
    }

    #[test]
    fn test_advance_period_december_rollover() {
        let dec = datetime!(2025-12-05 12:00:00 UTC);
        assert_eq!(
            advance_period(dec, BillingCycle::Monthly),
            datetime!(2026-01-05 12:00:00 UTC)
        );
    }

    #[test]
    fn test_advance_period_yearly() {
        let start = datetime!(2025-06-01 00:00:00 UTC);
        assert_eq!(
            advance_period(start, BillingCycle::Yearly),
            datetime!(2026-06-01 00:00:00 UTC)
        );

        // Leap day clamps to Feb 28 the following year
        let leap = datetime!(2024-02-29 00:00:00 UTC);
        assert_eq!(
            advance_period(leap, BillingCycle::Yearly),
            datetime!(2025-02-28 00:00:00 UTC)
        );
    }

    #[test]
    fn test_renewal_window() {
        let now = datetime!(2025-05-10 00:00:00 UTC);
        assert!(is_within_renewal_window(now + Duration::hours(23), now));
        assert!(is_within_renewal_window(now + Duration::hours(24), now));
        assert!(!is_within_renewal_window(now + Duration::hours(25), now));
        // Past-due periods remain eligible for a late renewal
        assert!(is_within_renewal_window(now - Duration::hours(5), now));
    }

    #[test]
    fn test_downgrade_blocked_with_time_remaining() {
        let now = datetime!(2025-05-01 00:00:00 UTC);
        let period_end = now + Duration::days(20);

        // PRO (35k/mo) -> BASIC (15k/mo) with 20 days remaining
        let reason = downgrade_block_reason(15_000, 35_000, period_end, now).unwrap();
        assert!(reason.contains("20 days remaining"), "got: {}", reason);
    }

    #[test]
    fn test_downgrade_allowed_near_renewal() {
        let now = datetime!(2025-05-01 00:00:00 UTC);
        assert!(downgrade_block_reason(15_000, 35_000, now + Duration::days(7), now).is_none());
        assert!(downgrade_block_reason(15_000, 35_000, now + Duration::days(2), now).is_none());
    }

    #[test]
    fn test_upgrade_never_blocked() {
        let now = datetime!(2025-05-01 00:00:00 UTC);
        let period_end = now + Duration::days(25);
        assert!(downgrade_block_reason(35_000, 15_000, period_end, now).is_none());
        // Equal price (cycle change) is not a downgrade
        assert!(downgrade_block_reason(35_000, 35_000, period_end, now).is_none());
    }
}
