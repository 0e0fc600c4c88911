//! SmsFlow Reconciler Daemon
//!
//! Periodically sweeps messages that still have recipients awaiting a
//! delivery confirmation, polls the provider for each, and rolls message,
//! campaign, and account counters up from the recipient rows.
//!
//! Configuration comes from `smsflow.toml` / `config.toml` (or the file
//! named by `SMSFLOW_CONFIG`), with `SMSFLOW_*` environment overrides.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tracing::{error, info};

use sf_config::ConfigLoader;
use sf_engine::{ReconcileSettings, SmsEngine};
use sf_gateway::{GatewayConfig, HttpSmsGateway};

#[tokio::main]
async fn main() -> Result<()> {
    sf_common::logging::init_logging("sf-reconcilerd");

    info!("Starting SmsFlow reconciler");

    let config = ConfigLoader::new().load()?;
    config.validate()?;

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!(url = %config.database.url, "Database pool ready");

    let gateway = HttpSmsGateway::new(GatewayConfig {
        base_url: config.provider.base_url.clone(),
        api_key: config.provider.api_key.clone(),
        client_id: config.provider.client_id.clone(),
        connect_timeout: Duration::from_secs(config.provider.connect_timeout_seconds),
        request_timeout: Duration::from_secs(config.provider.request_timeout_seconds),
    })?;

    let engine = SmsEngine::new(
        pool,
        Arc::new(gateway),
        ReconcileSettings {
            concurrency: config.reconciler.status_concurrency,
            stale_after: chrono::Duration::hours(config.reconciler.stale_after_hours),
        },
    );
    engine.init_schema().await?;

    let sweep_interval = Duration::from_secs(config.reconciler.sweep_interval_seconds);
    let batch_size = config.reconciler.batch_size;
    info!(
        interval_seconds = config.reconciler.sweep_interval_seconds,
        batch_size,
        "Reconciler running"
    );

    let mut interval = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.sweep(batch_size).await {
                    Ok(0) => {}
                    Ok(count) => info!(messages = count, "Sweep completed"),
                    // A failed sweep is retried on the next tick
                    Err(e) => error!(error = %e, "Sweep failed"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Reconciler stopped");
    Ok(())
}
