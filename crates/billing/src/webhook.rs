//! Midtrans webhook processing
//!
//! Settlement is the only place the automatic top-up flow credits a wallet.
//! Idempotency hangs on one conditional update: the PENDING payment row flips
//! to COMPLETED with `WHERE external_id = $1 AND status = 'PENDING'`, and a
//! zero row count means another delivery already won, so the whole handler
//! becomes a logged no-op. Midtrans retries deliveries aggressively.

use narra_shared::{PaymentHistory, PaymentStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{MidtransClient, MidtransNotification};
use crate::promo::PromoService;
use crate::wallet::WalletService;

/// What processing a notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Payment completed and wallet credited
    Settled,
    /// Payment marked FAILED, no wallet effect
    Failed,
    /// A previous delivery already finalized this payment
    Duplicate,
    /// Non-terminal status (pending, challenge), nothing to do yet
    Ignored,
}

/// Processes Midtrans payment notifications
#[derive(Clone)]
pub struct WebhookHandler {
    pool: PgPool,
    gateway: MidtransClient,
    wallet: WalletService,
    promos: PromoService,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, gateway: MidtransClient) -> Self {
        let wallet = WalletService::new(pool.clone());
        let promos = PromoService::new(pool.clone());
        Self {
            pool,
            gateway,
            wallet,
            promos,
        }
    }

    /// Verify and apply one notification. Always re-runnable for the same
    /// order id with the same final result.
    pub async fn handle_notification(
        &self,
        notification: &MidtransNotification,
    ) -> BillingResult<WebhookOutcome> {
        if !self.gateway.verify_signature(notification) {
            tracing::warn!(
                order_id = %notification.order_id,
                "Webhook signature verification failed"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        if notification.is_settled() {
            self.settle(&notification.order_id).await
        } else if notification.is_failed() {
            self.fail(&notification.order_id, &notification.transaction_status)
                .await
        } else {
            tracing::info!(
                order_id = %notification.order_id,
                transaction_status = %notification.transaction_status,
                "Ignoring non-terminal webhook status"
            );
            Ok(WebhookOutcome::Ignored)
        }
    }

    /// Complete the payment and credit the wallet with the stored base amount
    /// in one transaction, then redeem the promo if one was attached.
    async fn settle(&self, order_id: &str) -> BillingResult<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        let payment: Option<PaymentHistory> = sqlx::query_as(
            r#"
            UPDATE payment_history
            SET status = $1, updated_at = NOW()
            WHERE external_id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(PaymentStatus::Completed)
        .bind(order_id)
        .bind(PaymentStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payment) = payment else {
            return self.finalized_or_missing(order_id).await;
        };

        self.wallet
            .apply_credit(&mut tx, payment.user_id, payment.amount)
            .await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            user_id = %payment.user_id,
            amount = payment.amount,
            "Webhook settlement credited wallet"
        );

        // Redemption runs in its own transaction after the settlement commit.
        // Sharing the settlement transaction would let a redemption error
        // abort it, rolling back a credit the user already paid for.
        if let Some(promo_code_id) = payment.promo_code_id {
            let discount = payment.discount_amount.unwrap_or(0);
            if let Err(err) = self
                .promos
                .apply(payment.user_id, promo_code_id, payment.id, discount)
                .await
            {
                tracing::warn!(
                    order_id = %order_id,
                    promo_code_id = %promo_code_id,
                    error = %err,
                    "Promo redemption failed after settlement, credit stands"
                );
            }
        }

        Ok(WebhookOutcome::Settled)
    }

    /// Mark the payment FAILED. The wallet is untouched.
    async fn fail(&self, order_id: &str, transaction_status: &str) -> BillingResult<WebhookOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE payment_history
            SET status = $1, updated_at = NOW(),
                notes = COALESCE(notes, '') || ' (gateway: ' || $2 || ')'
            WHERE external_id = $3 AND status = $4
            "#,
        )
        .bind(PaymentStatus::Failed)
        .bind(transaction_status)
        .bind(order_id)
        .bind(PaymentStatus::Pending)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return self.finalized_or_missing(order_id).await;
        }

        tracing::info!(
            order_id = %order_id,
            transaction_status = transaction_status,
            "Payment marked failed from webhook"
        );

        Ok(WebhookOutcome::Failed)
    }

    /// Distinguish an already-finalized payment (duplicate delivery, fine)
    /// from an order id we have never seen (an error worth surfacing).
    async fn finalized_or_missing(&self, order_id: &str) -> BillingResult<WebhookOutcome> {
        let existing: Option<(Uuid, PaymentStatus)> =
            sqlx::query_as("SELECT id, status FROM payment_history WHERE external_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            Some((payment_id, status)) => {
                tracing::info!(
                    order_id = %order_id,
                    payment_id = %payment_id,
                    status = %status,
                    "Duplicate webhook delivery, payment already finalized"
                );
                Ok(WebhookOutcome::Duplicate)
            }
            None => Err(BillingError::PaymentNotFound(order_id.to_string())),
        }
    }
}
