//! End-to-end subscription lifecycle against a live database.
//!
//! Run with: DATABASE_URL=... cargo test -p narra-billing -- --ignored

#![allow(clippy::unwrap_used, clippy::expect_used)]

use narra_billing::{BillingError, LedgerEntry, SubscriptionService, WalletService};
use narra_shared::{BillingCycle, PaymentType, SubscriptionStatus};
use sqlx::PgPool;
use uuid::Uuid;

async fn setup() -> (PgPool, Uuid) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = narra_shared::create_pool(&url, 5).await.unwrap();

    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
        .bind(user_id)
        .bind(format!("{}@test.local", user_id))
        .execute(&pool)
        .await
        .unwrap();

    (pool, user_id)
}

async fn seed_plan(pool: &PgPool, name: &str, monthly_price: i64, sort_order: i32) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO subscription_plans
            (id, name, monthly_requests, monthly_price, yearly_price, is_active, sort_order)
        VALUES ($1, $2, 1000, $3, $4, TRUE, $5)
        "#,
    )
    .bind(id)
    .bind(format!("{}-{}", name, id.simple()))
    .bind(monthly_price)
    .bind(monthly_price * 10)
    .bind(sort_order)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[tokio::test]
#[ignore] // Requires database
async fn upgrade_charges_wallet_and_opens_fresh_period() {
    let (pool, user_id) = setup().await;
    let plan_id = seed_plan(&pool, "PRO", 35_000, 2).await;

    let wallet = WalletService::new(pool.clone());
    let subscriptions = SubscriptionService::new(pool.clone());

    wallet
        .credit(
            user_id,
            100_000,
            LedgerEntry::new(PaymentType::WalletTopup, "TEST", "seed"),
        )
        .await
        .unwrap();

    let result = subscriptions
        .upgrade_plan(user_id, plan_id, BillingCycle::Monthly)
        .await
        .unwrap();

    assert_eq!(result.subscription.status, SubscriptionStatus::Active);
    assert_eq!(result.subscription.requests_used, 0);
    assert!(result.subscription.auto_renew);
    assert_eq!(wallet.get_wallet(user_id).await.unwrap().balance, 65_000);

    // Re-buying the same plan and cycle is a no-op error, not a second charge
    let err = subscriptions
        .upgrade_plan(user_id, plan_id, BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadySubscribed(_)));
    assert_eq!(wallet.get_wallet(user_id).await.unwrap().balance, 65_000);
}

#[tokio::test]
#[ignore] // Requires database
async fn downgrade_rejected_mid_period_but_upgrade_allowed() {
    let (pool, user_id) = setup().await;
    let pro = seed_plan(&pool, "PRO", 35_000, 2).await;
    let basic = seed_plan(&pool, "BASIC", 15_000, 1).await;
    let max = seed_plan(&pool, "MAX", 95_000, 3).await;

    let wallet = WalletService::new(pool.clone());
    let subscriptions = SubscriptionService::new(pool.clone());

    wallet
        .credit(
            user_id,
            200_000,
            LedgerEntry::new(PaymentType::WalletTopup, "TEST", "seed"),
        )
        .await
        .unwrap();

    subscriptions
        .upgrade_plan(user_id, pro, BillingCycle::Monthly)
        .await
        .unwrap();

    // Cheaper plan with a month of paid period left
    let err = subscriptions
        .upgrade_plan(user_id, basic, BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::DowngradeRejected(_)));

    // Moving up is always allowed
    subscriptions
        .upgrade_plan(user_id, max, BillingCycle::Monthly)
        .await
        .unwrap();

    let details = subscriptions
        .get_subscription(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.subscription.plan_id, max);
}

#[tokio::test]
#[ignore] // Requires database
async fn renewal_extends_from_old_period_end_and_resets_usage() {
    let (pool, user_id) = setup().await;
    let plan_id = seed_plan(&pool, "PRO", 35_000, 2).await;

    let wallet = WalletService::new(pool.clone());
    let subscriptions = SubscriptionService::new(pool.clone());

    wallet
        .credit(
            user_id,
            100_000,
            LedgerEntry::new(PaymentType::WalletTopup, "TEST", "seed"),
        )
        .await
        .unwrap();

    subscriptions
        .upgrade_plan(user_id, plan_id, BillingCycle::Monthly)
        .await
        .unwrap();

    // Pull the period end to within the renewal window, with some usage
    sqlx::query(
        r#"
        UPDATE user_subscriptions
        SET current_period_end = NOW() + INTERVAL '1 hour', requests_used = 42
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();

    let before: time::OffsetDateTime = sqlx::query_scalar(
        "SELECT current_period_end FROM user_subscriptions WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let outcome = subscriptions.process_auto_renew(user_id).await.unwrap();
    assert!(outcome.success, "outcome: {:?}", outcome);

    let sub: narra_shared::UserSubscription =
        sqlx::query_as("SELECT * FROM user_subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();

    // Anchored to the old end, not the renewal time
    assert_eq!(sub.current_period_start, before);
    assert!(sub.current_period_end > before);
    assert_eq!(wallet.get_wallet(user_id).await.unwrap().balance, 30_000);

    // Second call in the same window is a no-op: the extended period is no
    // longer due
    let again = subscriptions.process_auto_renew(user_id).await.unwrap();
    assert!(!again.success);
    assert_eq!(wallet.get_wallet(user_id).await.unwrap().balance, 30_000);
}

#[tokio::test]
#[ignore] // Requires database
async fn failed_renewal_suspends_without_charging() {
    let (pool, user_id) = setup().await;
    let plan_id = seed_plan(&pool, "PRO", 35_000, 2).await;

    let wallet = WalletService::new(pool.clone());
    let subscriptions = SubscriptionService::new(pool.clone());

    wallet
        .credit(
            user_id,
            40_000,
            LedgerEntry::new(PaymentType::WalletTopup, "TEST", "seed"),
        )
        .await
        .unwrap();

    subscriptions
        .upgrade_plan(user_id, plan_id, BillingCycle::Monthly)
        .await
        .unwrap();
    // 5,000 left, not enough for the next cycle

    sqlx::query(
        "UPDATE user_subscriptions SET current_period_end = NOW() + INTERVAL '1 hour' WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();

    let outcome = subscriptions.process_auto_renew(user_id).await.unwrap();
    assert!(!outcome.success);

    let sub: narra_shared::UserSubscription =
        sqlx::query_as("SELECT * FROM user_subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Suspended);
    assert!(!sub.auto_renew);
    assert!(sub.cancel_at_period_end);

    // Balance untouched by the failed attempt
    assert_eq!(wallet.get_wallet(user_id).await.unwrap().balance, 5_000);
}
