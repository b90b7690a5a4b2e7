//! zkrep-syncd
//!
//! Follows a JSON-lines ledger export and keeps a SQLite projection of
//! zkrep epoch state up to date.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use zkrep_sync::{JsonLinesEventSource, SyncConfig, Synchronizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkrep_sync=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = match std::env::var("ZKREP_CONFIG") {
        Ok(path) => SyncConfig::from_file(path)?,
        Err(_) => SyncConfig::from_env()?,
    };
    let events_path = config
        .events_path
        .clone()
        .context("ZKREP_EVENTS_PATH must be set")?;

    info!("Starting zkrep-syncd");
    info!("Event log: {}", events_path.display());
    match &config.db_path {
        Some(path) => info!("Projection database: {}", path.display()),
        None => info!("Projection database: in-memory"),
    }
    info!("Settings fingerprint: {}", config.settings.fingerprint());

    let source = Arc::new(JsonLinesEventSource::new(events_path));
    let synchronizer = Synchronizer::new(config, source)?;
    let follow = synchronizer.config().follow;
    let mut status = synchronizer.subscribe();
    synchronizer.start()?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down zkrep-syncd...");
                break;
            }
            done = synchronizer.wait_until_idle(), if !follow => {
                let current = done?;
                info!("Caught up at block {:?}", current.synced_block);
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(err) = &status.borrow_and_update().last_error {
                    error!("sync error: {}", err);
                }
            }
        }
    }

    synchronizer.stop().await;
    Ok(())
}
