//! Promo code validation and redemption
//!
//! Validation is a stateless rule evaluation over the promo row; redemption
//! is the separate write step that records a promo_usages row and bumps the
//! global counter, and only runs after the associated payment is COMPLETED.

use narra_shared::{DiscountType, PromoCode, UNLIMITED_USAGE};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Outcome of validating a promo code against an amount
#[derive(Debug, Clone, serde::Serialize)]
pub struct PromoValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<PromoCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PromoValidation {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            promo_code: None,
            discount_amount: None,
            error_message: Some(message.into()),
        }
    }

    fn accepted(promo: PromoCode, discount: i64) -> Self {
        Self {
            is_valid: true,
            promo_code: Some(promo),
            discount_amount: Some(discount),
            error_message: None,
        }
    }
}

/// Compute the discount for a promo against an amount.
/// PERCENTAGE is integer math clamped by max_discount when set; FIXED is flat
/// and deliberately NOT clamped to the amount itself. Callers floor the final
/// charge at zero.
pub fn compute_discount(promo: &PromoCode, amount: i64) -> i64 {
    match promo.discount_type {
        DiscountType::Percentage => {
            // amount is client-supplied; the multiply must not overflow i64
            let raw = i128::from(amount) * i128::from(promo.discount_value) / 100;
            let raw = i64::try_from(raw).unwrap_or(i64::MAX);
            match promo.max_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => promo.discount_value,
    }
}

/// Evaluate the promo rules in order, short-circuiting on the first failure.
/// Returns the discount amount on success, the user-facing message otherwise.
pub fn evaluate_promo(
    promo: &PromoCode,
    amount: i64,
    user_usage_count: i64,
    now: OffsetDateTime,
) -> Result<i64, String> {
    if !promo.is_active || now < promo.valid_from || now > promo.valid_until {
        return Err("Invalid or expired promo code".to_string());
    }

    if amount < promo.min_amount {
        return Err(format!(
            "Minimum amount for this promo code is Rp {}",
            format_idr(promo.min_amount)
        ));
    }

    if promo.max_usage != UNLIMITED_USAGE && promo.current_usage >= promo.max_usage {
        return Err("Promo code usage limit reached".to_string());
    }

    if user_usage_count >= i64::from(promo.max_usage_per_user) {
        return Err("You have already used this promo code".to_string());
    }

    Ok(compute_discount(promo, amount))
}

/// Format a whole-IDR amount with dot thousand separators (e.g. 10.000)
pub fn format_idr(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    if amount < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Promo validation and redemption service
#[derive(Clone)]
pub struct PromoService {
    pool: PgPool,
}

impl PromoService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate a code for a user and amount. Read-only; never redeems.
    pub async fn validate(
        &self,
        code: &str,
        amount: i64,
        user_id: Uuid,
    ) -> BillingResult<PromoValidation> {
        let normalized = code.trim().to_uppercase();

        let promo: Option<PromoCode> =
            sqlx::query_as("SELECT * FROM promo_codes WHERE code = $1")
                .bind(&normalized)
                .fetch_optional(&self.pool)
                .await?;

        let Some(promo) = promo else {
            return Ok(PromoValidation::rejected("Invalid or expired promo code"));
        };

        let user_usage_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM promo_usages WHERE user_id = $1 AND promo_code_id = $2",
        )
        .bind(user_id)
        .bind(promo.id)
        .fetch_one(&self.pool)
        .await?;

        let now = OffsetDateTime::now_utc();
        match evaluate_promo(&promo, amount, user_usage_count, now) {
            Ok(discount) => Ok(PromoValidation::accepted(promo, discount)),
            Err(message) => Ok(PromoValidation::rejected(message)),
        }
    }

    /// Redeem a promo for a confirmed payment, atomically: re-checks both
    /// usage caps under a row lock, records the promo_usages row, and bumps
    /// current_usage. Called only after the payment is COMPLETED, in its own
    /// transaction so a rejection here cannot abort the settlement.
    pub async fn apply(
        &self,
        user_id: Uuid,
        promo_code_id: Uuid,
        payment_history_id: Uuid,
        discount_amount: i64,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        // Lock the promo row so the cap re-checks and the increment are
        // serialized against concurrent redemptions.
        let promo: Option<PromoCode> =
            sqlx::query_as("SELECT * FROM promo_codes WHERE id = $1 FOR UPDATE")
                .bind(promo_code_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(promo) = promo else {
            return Err(BillingError::PromoRejected(format!(
                "promo code {} no longer exists",
                promo_code_id
            )));
        };

        if promo.max_usage != UNLIMITED_USAGE && promo.current_usage >= promo.max_usage {
            return Err(BillingError::PromoRejected(
                "Promo code usage limit reached".to_string(),
            ));
        }

        let user_usage_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM promo_usages WHERE user_id = $1 AND promo_code_id = $2",
        )
        .bind(user_id)
        .bind(promo_code_id)
        .fetch_one(&mut *tx)
        .await?;

        if user_usage_count >= i64::from(promo.max_usage_per_user) {
            return Err(BillingError::PromoRejected(
                "You have already used this promo code".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO promo_usages (id, user_id, promo_code_id, payment_history_id, discount_amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(promo_code_id)
        .bind(payment_history_id)
        .bind(discount_amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE promo_codes SET current_usage = current_usage + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(promo_code_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            promo_code = %promo.code,
            discount_amount = discount_amount,
            payment_id = %payment_history_id,
            "Promo code redeemed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use time::Duration;

    fn percentage_promo(value: i64, max_discount: Option<i64>, min_amount: i64) -> PromoCode {
        let now = OffsetDateTime::now_utc();
        PromoCode {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: value,
            max_usage: UNLIMITED_USAGE,
            max_usage_per_user: 1,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            min_amount,
            max_discount,
            current_usage: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn fixed_promo(value: i64) -> PromoCode {
        let mut promo = percentage_promo(0, None, 0);
        promo.code = "FLAT5K".to_string();
        promo.discount_type = DiscountType::Fixed;
        promo.discount_value = value;
        promo
    }

    #[test]
    fn test_percentage_discount_capped_by_max_discount() {
        // SAVE10: 10% with max discount 5.000, min amount 10.000
        let promo = percentage_promo(10, Some(5_000), 10_000);
        assert_eq!(compute_discount(&promo, 100_000), 5_000);
        assert_eq!(compute_discount(&promo, 30_000), 3_000);
    }

    #[test]
    fn test_percentage_discount_on_huge_amount_does_not_overflow() {
        let promo = percentage_promo(10, None, 0);
        assert_eq!(compute_discount(&promo, i64::MAX), i64::MAX / 10);

        let capped = percentage_promo(10, Some(5_000), 0);
        assert_eq!(compute_discount(&capped, i64::MAX), 5_000);
    }

    #[test]
    fn test_fixed_discount_not_clamped_to_amount() {
        let promo = fixed_promo(25_000);
        // Larger than the amount on purpose; callers floor the charge at zero.
        assert_eq!(compute_discount(&promo, 10_000), 25_000);
    }

    #[test]
    fn test_validation_order_short_circuits() {
        let now = OffsetDateTime::now_utc();

        // Inactive beats every other rule
        let mut promo = percentage_promo(10, None, 50_000);
        promo.is_active = false;
        assert_eq!(
            evaluate_promo(&promo, 1_000, 99, now).unwrap_err(),
            "Invalid or expired promo code"
        );

        // Window check
        let mut promo = percentage_promo(10, None, 0);
        promo.valid_until = now - Duration::minutes(1);
        assert_eq!(
            evaluate_promo(&promo, 100_000, 0, now).unwrap_err(),
            "Invalid or expired promo code"
        );

        // Minimum amount comes before usage caps
        let mut promo = percentage_promo(10, None, 10_000);
        promo.max_usage = 1;
        promo.current_usage = 1;
        assert_eq!(
            evaluate_promo(&promo, 5_000, 0, now).unwrap_err(),
            "Minimum amount for this promo code is Rp 10.000"
        );

        // Global cap
        let mut promo = percentage_promo(10, None, 0);
        promo.max_usage = 100;
        promo.current_usage = 100;
        assert_eq!(
            evaluate_promo(&promo, 100_000, 0, now).unwrap_err(),
            "Promo code usage limit reached"
        );

        // Per-user cap
        let promo = percentage_promo(10, None, 0);
        assert_eq!(
            evaluate_promo(&promo, 100_000, 1, now).unwrap_err(),
            "You have already used this promo code"
        );
    }

    #[test]
    fn test_unlimited_global_usage() {
        let mut promo = percentage_promo(10, None, 0);
        promo.current_usage = 1_000_000;
        let now = OffsetDateTime::now_utc();
        assert!(evaluate_promo(&promo, 100_000, 0, now).is_ok());
    }

    #[test]
    fn test_boundary_timestamps_are_inclusive() {
        let promo = percentage_promo(10, None, 0);
        assert!(evaluate_promo(&promo, 100_000, 0, promo.valid_from).is_ok());
        assert!(evaluate_promo(&promo, 100_000, 0, promo.valid_until).is_ok());
    }

    #[test]
    fn test_format_idr() {
        assert_eq!(format_idr(0), "0");
        assert_eq!(format_idr(500), "500");
        assert_eq!(format_idr(10_000), "10.000");
        assert_eq!(format_idr(1_234_567), "1.234.567");
    }
}
