//! Midtrans payment gateway client
//!
//! Wraps the Snap API for creating hosted payment sessions and the core API
//! for status lookups. Webhook authenticity is a SHA-512 digest over
//! order_id + status_code + gross_amount + server_key; the comparison happens
//! here so handler code never touches raw key material.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{BillingError, BillingResult};

pub const MIDTRANS_SANDBOX_BASE_URL: &str = "https://app.sandbox.midtrans.com";
pub const MIDTRANS_PRODUCTION_BASE_URL: &str = "https://app.midtrans.com";

/// A hosted payment session created through Snap
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapSession {
    pub token: String,
    pub redirect_url: String,
}

/// The subset of a Midtrans notification payload the webhook handler needs
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub transaction_status: String,
    pub signature_key: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

impl MidtransNotification {
    /// Whether the transaction status means the money has settled.
    /// `capture` counts only when fraud screening accepted it.
    pub fn is_settled(&self) -> bool {
        match self.transaction_status.as_str() {
            "settlement" => true,
            "capture" => self.fraud_status.as_deref() == Some("accept"),
            _ => false,
        }
    }

    /// Whether the transaction terminally failed
    pub fn is_failed(&self) -> bool {
        matches!(
            self.transaction_status.as_str(),
            "deny" | "cancel" | "expire" | "failure"
        )
    }
}

#[derive(Debug, Serialize)]
struct SnapRequest<'a> {
    transaction_details: TransactionDetails<'a>,
    customer_details: CustomerDetails<'a>,
}

#[derive(Debug, Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct CustomerDetails<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct MidtransErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
}

/// Midtrans API client
#[derive(Clone)]
pub struct MidtransClient {
    http: reqwest::Client,
    base_url: String,
    server_key: String,
    pub client_key: String,
}

impl MidtransClient {
    pub fn new(server_key: String, client_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            server_key,
            client_key,
        }
    }

    /// Create a Snap session for a payment the user will complete on the
    /// Midtrans-hosted page.
    pub async fn create_transaction(
        &self,
        order_id: &str,
        gross_amount: i64,
        customer_email: &str,
    ) -> BillingResult<SnapSession> {
        let body = SnapRequest {
            transaction_details: TransactionDetails {
                order_id,
                gross_amount,
            },
            customer_details: CustomerDetails {
                email: customer_email,
            },
        };

        let response = self
            .http
            .post(format!("{}/snap/v1/transactions", self.base_url))
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error: MidtransErrorBody = response.json().await.unwrap_or(MidtransErrorBody {
                error_messages: Vec::new(),
            });
            return Err(BillingError::Gateway(format!(
                "Snap transaction creation failed ({}): {}",
                status,
                error.error_messages.join("; ")
            )));
        }

        let session: SnapSession = response.json().await?;

        tracing::info!(
            order_id = order_id,
            gross_amount = gross_amount,
            "Created Midtrans Snap session"
        );

        Ok(session)
    }

    /// Look up the current transaction status for an order.
    pub async fn get_status(&self, order_id: &str) -> BillingResult<MidtransNotification> {
        let response = self
            .http
            .get(format!("{}/v2/{}/status", self.base_url, order_id))
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::Gateway(format!(
                "status lookup for {} failed: {}",
                order_id,
                response.status()
            )));
        }

        let status: MidtransNotification = response.json().await?;
        Ok(status)
    }

    /// Verify a notification's signature_key:
    /// sha512(order_id + status_code + gross_amount + server_key), hex-encoded.
    pub fn verify_signature(&self, notification: &MidtransNotification) -> bool {
        let mut hasher = Sha512::new();
        hasher.update(notification.order_id.as_bytes());
        hasher.update(notification.status_code.as_bytes());
        hasher.update(notification.gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        let expected = hex::encode(hasher.finalize());
        expected == notification.signature_key
    }
}
