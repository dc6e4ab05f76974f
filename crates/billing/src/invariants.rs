//! Billing invariant checks
//!
//! Cross-table consistency checks run by the worker (and on demand by
//! admins). Each check scans for rows that violate a property the write
//! paths are supposed to preserve; any hit means a bug or manual data edit
//! upstream, never an expected state.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Money is wrong
    Critical,
    /// State is inconsistent but no money moved incorrectly
    Warning,
}

/// One violating row found by a check
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    pub check: &'static str,
    pub severity: Severity,
    pub user_id: Option<Uuid>,
    pub detail: String,
}

/// Runs consistency checks across the billing tables
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run every check and return all violations found.
    pub async fn check_all(&self) -> BillingResult<Vec<InvariantViolation>> {
        let mut violations = Vec::new();
        violations.extend(self.check_balance_non_negative().await?);
        violations.extend(self.check_ledger_reconstructs_balance().await?);
        violations.extend(self.check_period_ordering().await?);
        violations.extend(self.check_promo_usage_counters().await?);
        violations.extend(self.check_suspended_never_auto_renews().await?);

        if violations.is_empty() {
            tracing::info!("All billing invariants hold");
        } else {
            for violation in &violations {
                tracing::error!(
                    check = violation.check,
                    severity = ?violation.severity,
                    user_id = ?violation.user_id,
                    detail = %violation.detail,
                    "Billing invariant violated"
                );
            }
        }

        Ok(violations)
    }

    /// Balances never go below zero. The CHECK constraint enforces this at
    /// the database, so a hit here means the constraint was dropped or
    /// bypassed.
    async fn check_balance_non_negative(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, i64)> =
            sqlx::query_as("SELECT user_id, balance FROM wallets WHERE balance < 0")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, balance)| InvariantViolation {
                check: "balance_non_negative",
                severity: Severity::Critical,
                user_id: Some(user_id),
                detail: format!("balance is {}", balance),
            })
            .collect())
    }

    /// Completed history rows reconstruct the balance: for every wallet,
    /// sum(credits) - sum(debits) over COMPLETED payments equals the stored
    /// balance. Amounts are stored positive; direction comes from the type.
    async fn check_ledger_reconstructs_balance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT w.user_id, w.balance,
                   COALESCE(SUM(
                       CASE WHEN p.payment_type IN ('WALLET_TOPUP', 'REFUND')
                            THEN p.amount ELSE -p.amount END
                   ), 0) AS ledger_balance
            FROM wallets w
            LEFT JOIN payment_history p
              ON p.user_id = w.user_id AND p.status = 'COMPLETED'
            GROUP BY w.user_id, w.balance
            HAVING w.balance <> COALESCE(SUM(
                       CASE WHEN p.payment_type IN ('WALLET_TOPUP', 'REFUND')
                            THEN p.amount ELSE -p.amount END
                   ), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, balance, ledger)| InvariantViolation {
                check: "ledger_reconstructs_balance",
                severity: Severity::Critical,
                user_id: Some(user_id),
                detail: format!("stored balance {} but ledger sums to {}", balance, ledger),
            })
            .collect())
    }

    /// current_period_start is strictly before current_period_end.
    async fn check_period_ordering(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM user_subscriptions WHERE current_period_start >= current_period_end",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id,)| InvariantViolation {
                check: "period_ordering",
                severity: Severity::Warning,
                user_id: Some(user_id),
                detail: "current_period_start is not before current_period_end".to_string(),
            })
            .collect())
    }

    /// promo_codes.current_usage matches the count of promo_usages rows.
    async fn check_promo_usage_counters(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT pc.id, pc.code, pc.current_usage, COUNT(pu.id) AS actual
            FROM promo_codes pc
            LEFT JOIN promo_usages pu ON pu.promo_code_id = pc.id
            GROUP BY pc.id, pc.code, pc.current_usage
            HAVING pc.current_usage <> COUNT(pu.id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(_, code, counter, actual)| InvariantViolation {
                check: "promo_usage_counters",
                severity: Severity::Warning,
                user_id: None,
                detail: format!(
                    "promo {} counter says {} but {} usages recorded",
                    code, counter, actual
                ),
            })
            .collect())
    }

    /// A SUSPENDED subscription must have auto_renew off; suspension exists
    /// precisely because renewal could not proceed.
    async fn check_suspended_never_auto_renews(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM user_subscriptions WHERE status = 'SUSPENDED' AND auto_renew = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id,)| InvariantViolation {
                check: "suspended_never_auto_renews",
                severity: Severity::Warning,
                user_id: Some(user_id),
                detail: "suspended subscription still has auto_renew enabled".to_string(),
            })
            .collect())
    }
}
