//! API error type and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use narra_billing::BillingError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment required: {0}")]
    PaymentRequired(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the logs, not the response body
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "error": { "code": code, "message": message },
        });

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientFunds { .. } => Self::PaymentRequired(err.to_string()),
            BillingError::InvalidAmount(_)
            | BillingError::PromoRejected(_)
            | BillingError::DowngradeRejected(_) => Self::BadRequest(err.to_string()),
            BillingError::PlanNotFound(_)
            | BillingError::SubscriptionNotFound(_)
            | BillingError::TopupNotFound(_)
            | BillingError::PaymentNotFound(_) => Self::NotFound(err.to_string()),
            BillingError::AlreadySubscribed(_)
            | BillingError::InvalidTopupState { .. }
            | BillingError::ConcurrentModification(_) => Self::Conflict(err.to_string()),
            BillingError::WebhookSignatureInvalid => {
                Self::Unauthorized("invalid webhook signature".to_string())
            }
            BillingError::Gateway(msg) => Self::Upstream(msg),
            BillingError::Database(msg)
            | BillingError::Config(msg)
            | BillingError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use narra_billing::BillingError;

    #[test]
    fn test_billing_error_mapping() {
        let err: ApiError = BillingError::InsufficientFunds {
            balance: 100,
            required: 500,
        }
        .into();
        assert!(matches!(err, ApiError::PaymentRequired(_)));

        let err: ApiError = BillingError::ConcurrentModification("racing".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
