//! Shared application state

use narra_billing::{
    MidtransClient, PromoService, SubscriptionService, TopupService, UsageReconciler,
    WalletService, WebhookHandler,
};
use sqlx::PgPool;

use crate::ai::GeminiClient;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub wallet: WalletService,
    pub subscriptions: SubscriptionService,
    pub promos: PromoService,
    pub topups: TopupService,
    pub webhooks: WebhookHandler,
    pub reconciler: UsageReconciler,
    pub gemini: GeminiClient,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let gateway = MidtransClient::new(
            config.midtrans_server_key.clone(),
            config.midtrans_client_key.clone(),
            config.midtrans_base_url.clone(),
        );

        Self {
            wallet: WalletService::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            promos: PromoService::new(pool.clone()),
            topups: TopupService::new(pool.clone(), gateway.clone()),
            webhooks: WebhookHandler::new(pool.clone(), gateway),
            reconciler: UsageReconciler::new(pool.clone()),
            gemini: GeminiClient::new(
                config.gemini_api_key.clone(),
                config.gemini_base_url.clone(),
            ),
            pool,
            config,
        }
    }
}
