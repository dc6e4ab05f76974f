//! Narra billing worker
//!
//! Runs the periodic billing sweeps and the nightly invariant checks.
//! Every job body lives in narra-billing as a plain async method, so the
//! scheduler here only decides WHEN things run, never WHAT they do.

use anyhow::Context;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use narra_billing::{BillingSweeper, InvariantChecker};

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

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
    let pool = narra_shared::create_pool(&database_url, 5)
        .await
        .context("connecting to database")?;

    let sweeper = Arc::new(BillingSweeper::new(pool.clone()));
    let checker = Arc::new(InvariantChecker::new(pool));

    let scheduler = JobScheduler::new().await?;

    // Renewal sweep every 6 hours; the 24h renewal window means a due
    // subscription gets several attempts before its period actually ends.
    let renewal_sweeper = Arc::clone(&sweeper);
    scheduler
        .add(Job::new_async("0 0 */6 * * *", move |_id, _lock| {
            let sweeper = Arc::clone(&renewal_sweeper);
            Box::pin(async move {
                match sweeper.run_renewal_sweep().await {
                    Ok(report) => tracing::info!(
                        processed = report.processed,
                        renewed = report.renewed,
                        suspended = report.suspended,
                        failed = report.failed,
                        "Scheduled renewal sweep done"
                    ),
                    Err(err) => tracing::error!(error = %err, "Renewal sweep failed"),
                }
            })
        })?)
        .await?;

    // Expiry sweep every 12 hours
    let expiry_sweeper = Arc::clone(&sweeper);
    scheduler
        .add(Job::new_async("0 30 */12 * * *", move |_id, _lock| {
            let sweeper = Arc::clone(&expiry_sweeper);
            Box::pin(async move {
                match sweeper.run_expiry_sweep().await {
                    Ok(report) => {
                        if report.expired > 0 {
                            tracing::info!(
                                expired = report.expired,
                                "Scheduled expiry sweep done"
                            );
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "Expiry sweep failed"),
                }
            })
        })?)
        .await?;

    // Invariant checks nightly at 03:15 UTC
    scheduler
        .add(Job::new_async("0 15 3 * * *", move |_id, _lock| {
            let checker = Arc::clone(&checker);
            Box::pin(async move {
                match checker.check_all().await {
                    Ok(violations) if violations.is_empty() => {}
                    Ok(violations) => tracing::error!(
                        count = violations.len(),
                        "Nightly invariant check found violations"
                    ),
                    Err(err) => tracing::error!(error = %err, "Invariant check failed"),
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Narra worker started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down worker");

    Ok(())
}
