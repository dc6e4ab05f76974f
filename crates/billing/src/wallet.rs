//! Wallet ledger service
//!
//! The single path through which a wallet balance ever changes. Every mutation
//! pairs the balance change with exactly one payment_history row inside one
//! database transaction, so the ledger always reconstructs the balance.

use narra_shared::{PaymentStatus, PaymentType, Wallet};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Metadata recorded alongside a balance mutation
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub payment_type: PaymentType,
    pub payment_method: String,
    pub description: String,
    pub plan_id: Option<Uuid>,
}

impl LedgerEntry {
    pub fn new(payment_type: PaymentType, method: &str, description: &str) -> Self {
        Self {
            payment_type,
            payment_method: method.to_string(),
            description: description.to_string(),
            plan_id: None,
        }
    }

    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }
}

/// Wallet ledger service
#[derive(Clone)]
pub struct WalletService {
    pool: PgPool,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a user's wallet, creating it with a zero balance if absent.
    pub async fn get_wallet(&self, user_id: Uuid) -> BillingResult<Wallet> {
        sqlx::query(
            "INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let wallet: Wallet = sqlx::query_as("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(wallet)
    }

    /// Credit the wallet and write a COMPLETED history row, atomically.
    /// Returns the payment_history id.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        entry: LedgerEntry,
    ) -> BillingResult<Uuid> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;
        self.apply_credit(&mut tx, user_id, amount).await?;
        let payment_id = insert_history(&mut tx, user_id, amount, &entry).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            payment_id = %payment_id,
            payment_type = ?entry.payment_type,
            "Wallet credited"
        );

        Ok(payment_id)
    }

    /// Debit the wallet and write a COMPLETED history row, atomically.
    /// Fails with InsufficientFunds when the locked balance cannot cover the
    /// amount; the balance check and decrement share one transaction so
    /// concurrent debits cannot jointly overdraw.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        entry: LedgerEntry,
    ) -> BillingResult<Uuid> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "debit amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;
        self.apply_debit(&mut tx, user_id, amount).await?;
        let payment_id = insert_history(&mut tx, user_id, amount, &entry).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            payment_id = %payment_id,
            payment_type = ?entry.payment_type,
            "Wallet debited"
        );

        Ok(payment_id)
    }

    /// Apply a credit inside a caller-owned transaction.
    /// The caller is responsible for pairing this with its own history row
    /// (e.g. the webhook handler completing a PENDING top-up payment).
    pub async fn apply_credit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        amount: i64,
    ) -> BillingResult<()> {
        lock_or_create_wallet(tx, user_id).await?;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $1,
                total_deposited = total_deposited + $1,
                updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Apply a debit inside a caller-owned transaction, rejecting underflow.
    pub async fn apply_debit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        amount: i64,
    ) -> BillingResult<()> {
        let balance = lock_or_create_wallet(tx, user_id).await?;

        if balance < amount {
            return Err(BillingError::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance - $1,
                total_spent = total_spent + $1,
                updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// List a user's payment history, newest first.
    pub async fn get_history(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<narra_shared::PaymentHistory>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM payment_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Lock the wallet row for update, creating it first if the user has none.
/// Returns the current balance under the lock.
async fn lock_or_create_wallet(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> BillingResult<i64> {
    sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let balance: i64 =
        sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;

    Ok(balance)
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: i64,
    entry: &LedgerEntry,
) -> BillingResult<Uuid> {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();

    sqlx::query(
        r#"
        INSERT INTO payment_history
            (id, user_id, payment_type, amount, status, payment_method, plan_id, notes, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(entry.payment_type)
    .bind(amount)
    .bind(PaymentStatus::Completed)
    .bind(&entry.payment_method)
    .bind(entry.plan_id)
    .bind(&entry.description)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use narra_shared::PaymentType;

    #[test]
    fn test_ledger_entry_builder() {
        let plan_id = Uuid::new_v4();
        let entry = LedgerEntry::new(PaymentType::Subscription, "WALLET", "PRO upgrade")
            .with_plan(plan_id);
        assert_eq!(entry.plan_id, Some(plan_id));
        assert_eq!(entry.payment_method, "WALLET");
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_concurrent_debits_never_overdraw() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = narra_shared::create_pool(&url, 5).await.unwrap();
        let service = WalletService::new(pool.clone());

        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
            .bind(user_id)
            .bind(format!("{}@test.local", user_id))
            .execute(&pool)
            .await
            .unwrap();

        service
            .credit(
                user_id,
                50_000,
                LedgerEntry::new(PaymentType::WalletTopup, "TEST", "seed"),
            )
            .await
            .unwrap();

        // Ten concurrent 10k debits against a 50k balance: exactly five win.
        let mut handles = Vec::new();
        for _ in 0..10 {
            let svc = service.clone();
            handles.push(tokio::spawn(async move {
                svc.debit(
                    user_id,
                    10_000,
                    LedgerEntry::new(PaymentType::Deduction, "TEST", "drain"),
                )
                .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 5);

        let wallet = service.get_wallet(user_id).await.unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.total_deposited, 50_000);
        assert_eq!(wallet.total_spent, 50_000);
    }
}
