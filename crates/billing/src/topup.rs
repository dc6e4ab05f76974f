//! Wallet top-up orchestration
//!
//! Two ways money enters a wallet: the manual flow (bank transfer with a
//! proof image, reviewed by an admin) and the automatic flow (a Midtrans Snap
//! session settled by webhook). Manual approvals credit the wallet here;
//! automatic settlements credit it in the webhook handler.

use narra_shared::{PaymentStatus, PaymentType, TopupRequest, TopupStatus};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{MidtransClient, SnapSession};
use crate::promo::PromoService;

/// Smallest accepted top-up, in whole IDR
pub const MIN_TOPUP_AMOUNT: i64 = 10_000;

/// The final charge for a discounted top-up, floored at zero.
/// The wallet is still credited with the full base amount on settlement.
pub fn final_charge(base_amount: i64, discount: i64) -> i64 {
    (base_amount - discount).max(0)
}

fn generate_order_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "TOPUP-{}-{}",
        OffsetDateTime::now_utc().unix_timestamp(),
        suffix
    )
}

/// Everything the client needs to complete an automatic top-up
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutomaticTopup {
    pub order_id: String,
    pub payment_id: Uuid,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub snap: SnapSession,
}

/// Top-up orchestrator for both the manual and automatic flows
#[derive(Clone)]
pub struct TopupService {
    pool: PgPool,
    gateway: MidtransClient,
    promos: PromoService,
}

impl TopupService {
    pub fn new(pool: PgPool, gateway: MidtransClient) -> Self {
        let promos = PromoService::new(pool.clone());
        Self {
            pool,
            gateway,
            promos,
        }
    }

    // ------------------------------------------------------------------
    // Manual flow
    // ------------------------------------------------------------------

    /// Open a manual top-up request in PENDING, awaiting a proof upload.
    pub async fn create_manual(
        &self,
        user_id: Uuid,
        amount: i64,
        payment_method: &str,
    ) -> BillingResult<TopupRequest> {
        if amount < MIN_TOPUP_AMOUNT {
            return Err(BillingError::InvalidAmount(format!(
                "minimum top-up is {} IDR, got {}",
                MIN_TOPUP_AMOUNT, amount
            )));
        }

        let request: TopupRequest = sqlx::query_as(
            r#"
            INSERT INTO topup_requests (id, user_id, amount, payment_method, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount)
        .bind(payment_method)
        .bind(TopupStatus::Pending)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            topup_id = %request.id,
            amount = amount,
            "Manual top-up request created"
        );

        Ok(request)
    }

    /// Attach a transfer proof, moving the request PENDING -> UNDER_REVIEW.
    pub async fn submit_proof(
        &self,
        user_id: Uuid,
        topup_id: Uuid,
        proof_image_url: &str,
    ) -> BillingResult<TopupRequest> {
        let updated: Option<TopupRequest> = sqlx::query_as(
            r#"
            UPDATE topup_requests
            SET status = $1, proof_image_url = $2, updated_at = NOW()
            WHERE id = $3 AND user_id = $4 AND status = $5
            RETURNING *
            "#,
        )
        .bind(TopupStatus::UnderReview)
        .bind(proof_image_url)
        .bind(topup_id)
        .bind(user_id)
        .bind(TopupStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(request) => Ok(request),
            None => Err(self.transition_error(topup_id, TopupStatus::Pending).await?),
        }
    }

    /// Admin approval: credit the wallet and close the request, atomically.
    /// The status transition is a conditional update, so two admins approving
    /// the same request credit the wallet exactly once.
    pub async fn approve(
        &self,
        topup_id: Uuid,
        admin_id: Uuid,
        review_notes: Option<&str>,
    ) -> BillingResult<TopupRequest> {
        let mut tx = self.pool.begin().await?;

        let request: Option<TopupRequest> = sqlx::query_as(
            r#"
            UPDATE topup_requests
            SET status = $1, reviewed_by = $2, review_notes = $3,
                reviewed_at = NOW(), updated_at = NOW()
            WHERE id = $4 AND status = $5
            RETURNING *
            "#,
        )
        .bind(TopupStatus::Approved)
        .bind(admin_id)
        .bind(review_notes)
        .bind(topup_id)
        .bind(TopupStatus::UnderReview)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = request else {
            return Err(self
                .transition_error(topup_id, TopupStatus::UnderReview)
                .await?);
        };

        let wallet = crate::wallet::WalletService::new(self.pool.clone());
        wallet
            .apply_credit(&mut tx, request.user_id, request.amount)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO payment_history
                (id, user_id, payment_type, amount, status, payment_method, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(PaymentType::WalletTopup)
        .bind(request.amount)
        .bind(PaymentStatus::Completed)
        .bind(&request.payment_method)
        .bind(format!("Manual top-up approved (request {})", request.id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            topup_id = %topup_id,
            user_id = %request.user_id,
            admin_id = %admin_id,
            amount = request.amount,
            "Manual top-up approved and credited"
        );

        Ok(request)
    }

    /// Admin rejection. No wallet effect.
    pub async fn reject(
        &self,
        topup_id: Uuid,
        admin_id: Uuid,
        review_notes: Option<&str>,
    ) -> BillingResult<TopupRequest> {
        let updated: Option<TopupRequest> = sqlx::query_as(
            r#"
            UPDATE topup_requests
            SET status = $1, reviewed_by = $2, review_notes = $3,
                reviewed_at = NOW(), updated_at = NOW()
            WHERE id = $4 AND status = $5
            RETURNING *
            "#,
        )
        .bind(TopupStatus::Rejected)
        .bind(admin_id)
        .bind(review_notes)
        .bind(topup_id)
        .bind(TopupStatus::UnderReview)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(request) => {
                tracing::info!(
                    topup_id = %topup_id,
                    admin_id = %admin_id,
                    "Manual top-up rejected"
                );
                Ok(request)
            }
            None => Err(self
                .transition_error(topup_id, TopupStatus::UnderReview)
                .await?),
        }
    }

    /// Requests awaiting admin review, oldest first.
    pub async fn list_under_review(&self, limit: i64) -> BillingResult<Vec<TopupRequest>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM topup_requests
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(TopupStatus::UnderReview)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// A user's own top-up requests, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<TopupRequest>> {
        let rows = sqlx::query_as(
            "SELECT * FROM topup_requests WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Automatic flow
    // ------------------------------------------------------------------

    /// Start an automatic top-up: validate the promo, create a Snap session
    /// for the discounted charge, and record a PENDING payment keyed by the
    /// order id. The PENDING row stores the full base amount; the webhook
    /// credits that amount on settlement, so a discount never shrinks the
    /// credit, only the charge.
    pub async fn create_automatic(
        &self,
        user_id: Uuid,
        customer_email: &str,
        base_amount: i64,
        promo_code: Option<&str>,
    ) -> BillingResult<AutomaticTopup> {
        if base_amount < MIN_TOPUP_AMOUNT {
            return Err(BillingError::InvalidAmount(format!(
                "minimum top-up is {} IDR, got {}",
                MIN_TOPUP_AMOUNT, base_amount
            )));
        }

        let (promo_code_id, discount_amount) = match promo_code {
            Some(code) => {
                let validation = self.promos.validate(code, base_amount, user_id).await?;
                if !validation.is_valid {
                    return Err(BillingError::PromoRejected(
                        validation
                            .error_message
                            .unwrap_or_else(|| "Invalid or expired promo code".to_string()),
                    ));
                }
                (
                    validation.promo_code.map(|p| p.id),
                    validation.discount_amount.unwrap_or(0),
                )
            }
            None => (None, 0),
        };

        let final_amount = final_charge(base_amount, discount_amount);
        if final_amount == 0 {
            // Midtrans rejects zero-amount transactions; a fully-discounted
            // top-up has to go through the manual flow instead.
            return Err(BillingError::InvalidAmount(
                "discount covers the full amount, cannot create a gateway session".to_string(),
            ));
        }

        let order_id = generate_order_id();
        let snap = self
            .gateway
            .create_transaction(&order_id, final_amount, customer_email)
            .await?;

        let payment_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payment_history
                (id, user_id, payment_type, amount, status, payment_method,
                 external_id, promo_code_id, discount_amount, notes)
            VALUES ($1, $2, $3, $4, $5, 'MIDTRANS', $6, $7, $8, $9)
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(PaymentType::WalletTopup)
        .bind(base_amount)
        .bind(PaymentStatus::Pending)
        .bind(&order_id)
        .bind(promo_code_id)
        .bind(if discount_amount > 0 {
            Some(discount_amount)
        } else {
            None
        })
        .bind(format!("Automatic top-up, charged {}", final_amount))
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            order_id = %order_id,
            base_amount = base_amount,
            discount_amount = discount_amount,
            final_amount = final_amount,
            "Automatic top-up session created"
        );

        Ok(AutomaticTopup {
            order_id,
            payment_id,
            base_amount,
            discount_amount,
            final_amount,
            snap,
        })
    }

    /// Build an InvalidTopupState error carrying the actual current state,
    /// or TopupNotFound when the row does not exist at all.
    async fn transition_error(
        &self,
        topup_id: Uuid,
        expected: TopupStatus,
    ) -> BillingResult<BillingError> {
        let found: Option<TopupStatus> =
            sqlx::query_scalar("SELECT status FROM topup_requests WHERE id = $1")
                .bind(topup_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match found {
            Some(status) => BillingError::InvalidTopupState {
                expected: expected.to_string(),
                found: status.to_string(),
            },
            None => BillingError::TopupNotFound(topup_id.to_string()),
        })
    }
}
