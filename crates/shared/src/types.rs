//! Common types used across the Narra platform

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Billing cycle for subscription pricing and period rollover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Suspended,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of a payment history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Subscription,
    WalletTopup,
    Deduction,
    Refund,
}

impl PaymentType {
    /// Whether this payment type moves money into the wallet.
    /// Amounts are stored positive; direction derives from the type.
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::WalletTopup | Self::Refund)
    }
}

/// Status of a payment history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Promo discount kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// Manual top-up request state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopupStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl TopupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for TopupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a proxied API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiCallStatus {
    Success,
    Failed,
    Timeout,
    RateLimited,
}

// =============================================================================
// Row types
// =============================================================================

/// Per-user wallet. Balance only ever changes through the wallet ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: i64,
    pub total_deposited: i64,
    pub total_spent: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Append-only transaction log row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_type: PaymentType,
    pub amount: i64,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub external_id: Option<String>,
    pub plan_id: Option<Uuid>,
    pub promo_code_id: Option<Uuid>,
    pub discount_amount: Option<i64>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Catalog entry for a purchasable plan
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub monthly_requests: i64,
    pub monthly_price: i64,
    pub yearly_price: i64,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Sentinel for unlimited monthly requests
pub const UNLIMITED_REQUESTS: i64 = -1;

impl SubscriptionPlan {
    pub fn is_unlimited(&self) -> bool {
        self.monthly_requests == UNLIMITED_REQUESTS
    }

    /// Price for one billing cycle of this plan
    pub fn price_for(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.yearly_price,
        }
    }
}

/// A user's subscription (1:1 with users; terminal states persist)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub requests_used: i64,
    pub requests_limit: i64,
    pub auto_renew: bool,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Sentinel for unlimited global promo usage
pub const UNLIMITED_USAGE: i64 = -1;

/// Admin-authored promo code
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub max_usage: i64,
    pub max_usage_per_user: i32,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub min_amount: i64,
    pub max_discount: Option<i64>,
    pub current_usage: i64,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One application of a promo code to a payment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoUsage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub promo_code_id: Uuid,
    pub payment_history_id: Uuid,
    pub discount_amount: i64,
    pub created_at: OffsetDateTime,
}

/// Manual top-up request
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopupRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub status: TopupStatus,
    pub proof_image_url: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub review_notes: Option<String>,
    pub reviewed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Append-only per-request record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiCallLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub status: ApiCallStatus,
    pub total_tokens: i32,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_payment_type_direction() {
        assert!(PaymentType::WalletTopup.is_credit());
        assert!(PaymentType::Refund.is_credit());
        assert!(!PaymentType::Subscription.is_credit());
        assert!(!PaymentType::Deduction.is_credit());
    }

    #[test]
    fn test_plan_price_for_cycle() {
        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "PRO".to_string(),
            monthly_requests: 10_000,
            monthly_price: 35_000,
            yearly_price: 350_000,
            is_active: true,
            sort_order: 2,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(plan.price_for(BillingCycle::Monthly), 35_000);
        assert_eq!(plan.price_for(BillingCycle::Yearly), 350_000);
        assert!(!plan.is_unlimited());
    }

    #[test]
    fn test_unlimited_sentinel() {
        let mut plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "ENTERPRISE".to_string(),
            monthly_requests: UNLIMITED_REQUESTS,
            monthly_price: 500_000,
            yearly_price: 5_000_000,
            is_active: true,
            sort_order: 4,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert!(plan.is_unlimited());
        plan.monthly_requests = 0;
        assert!(!plan.is_unlimited());
    }

    #[test]
    fn test_enum_serde_wire_format() {
        assert_eq!(
            serde_json::to_string(&TopupStatus::UnderReview).unwrap(),
            "\"UNDER_REVIEW\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentType::WalletTopup).unwrap(),
            "\"WALLET_TOPUP\""
        );
        assert_eq!(
            serde_json::to_string(&ApiCallStatus::RateLimited).unwrap(),
            "\"RATE_LIMITED\""
        );
        let cycle: BillingCycle = serde_json::from_str("\"MONTHLY\"").unwrap();
        assert_eq!(cycle, BillingCycle::Monthly);
    }
}
