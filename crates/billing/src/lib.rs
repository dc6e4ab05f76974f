//! Narra billing: wallets, subscriptions, promos, and top-ups
//!
//! Everything that moves money or entitlements lives here. The API and
//! worker crates only orchestrate; all balance, subscription, and promo
//! writes go through the services in this crate.

pub mod error;
pub mod gateway;
pub mod invariants;
pub mod promo;
pub mod subscription;
pub mod sweeps;
pub mod topup;
pub mod usage;
pub mod wallet;
pub mod webhook;

pub use error::{BillingError, BillingResult};
pub use gateway::{MidtransClient, MidtransNotification, SnapSession};
pub use invariants::{InvariantChecker, InvariantViolation, Severity};
pub use promo::{PromoService, PromoValidation};
pub use subscription::{
    RenewalAction, RenewalOutcome, SubscriptionDetails, SubscriptionService, UpgradeResult,
};
pub use sweeps::{BillingSweeper, SweepReport};
pub use topup::{AutomaticTopup, TopupService};
pub use usage::UsageReconciler;
pub use wallet::{LedgerEntry, WalletService};
pub use webhook::{WebhookHandler, WebhookOutcome};
