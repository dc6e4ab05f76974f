//! HTTP route definitions

pub mod admin;
pub mod billing;
pub mod generate;
pub mod health;
pub mod promo;
pub mod topup;
pub mod wallet;

use axum::http::{header, Method};
use axum::middleware;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin, require_auth};
use crate::state::AppState;

/// Standard success envelope
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any);

    // No auth: probes and the gateway callback (authenticated by signature)
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/api/v1/topup/webhook/midtrans", post(topup::midtrans_webhook));

    let authed = Router::new()
        .route("/api/v1/billing/plans", get(billing::list_plans))
        .route("/api/v1/billing/subscription", get(billing::get_subscription))
        .route("/api/v1/billing/subscription/upgrade", post(billing::upgrade))
        .route("/api/v1/billing/subscription/cancel", post(billing::cancel))
        .route(
            "/api/v1/billing/subscription/auto-renew",
            put(billing::set_auto_renew),
        )
        .route("/api/v1/wallet", get(wallet::get_wallet))
        .route("/api/v1/wallet/history", get(wallet::get_history))
        .route("/api/v1/promo/validate", post(promo::validate))
        .route("/api/v1/topup/manual", post(topup::create_manual))
        .route("/api/v1/topup/manual/:id/proof", post(topup::submit_proof))
        .route("/api/v1/topup/automatic", post(topup::create_automatic))
        .route("/api/v1/topup/requests", get(topup::list_own))
        .route("/api/v1/generate", post(generate::generate))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route(
            "/api/v1/admin/plans",
            get(admin::list_plans).post(admin::create_plan),
        )
        .route("/api/v1/admin/plans/:id", patch(admin::update_plan))
        .route(
            "/api/v1/admin/promo-codes",
            get(admin::list_promo_codes).post(admin::create_promo_code),
        )
        .route(
            "/api/v1/admin/promo-codes/:id",
            patch(admin::update_promo_code),
        )
        .route("/api/v1/admin/topup/pending", get(admin::list_pending_topups))
        .route("/api/v1/admin/topup/:id/approve", post(admin::approve_topup))
        .route("/api/v1/admin/topup/:id/reject", post(admin::reject_topup))
        .route("/api/v1/admin/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(authed)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
