//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Insufficient funds: balance {balance} is less than {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Subscription not found for user: {0}")]
    SubscriptionNotFound(String),

    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("Downgrade rejected: {0}")]
    DowngradeRejected(String),

    #[error("Promo code rejected: {0}")]
    PromoRejected(String),

    #[error("Top-up request not found: {0}")]
    TopupNotFound(String),

    #[error("Invalid top-up state: expected {expected}, found {found}")]
    InvalidTopupState { expected: String, found: String },

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Payment not found for order: {0}")]
    PaymentNotFound(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
