//! Narra API server entry point

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use narra_api::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let migration_pool = narra_shared::create_migration_pool(&config.database_url)
        .await
        .context("connecting for migrations")?;
    narra_shared::run_migrations(&migration_pool)
        .await
        .context("running migrations")?;
    migration_pool.close().await;

    let pool = narra_shared::create_pool(&config.database_url, config.max_connections)
        .await
        .context("connecting to database")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;

    tracing::info!(address = %bind_address, "Narra API listening");

    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
