//! Daemon command for running the notification scheduler.
//!
//! Loads the record store, arms every enabled subscriber, then waits for
//! Ctrl-C. Timers run on the tokio runtime; each fired run re-arms its owner.
//! Every `rescan_interval` the store is checked for newly enabled owners.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use homebot_scheduler::{
    BootstrapReport, Clock, ContentProvider, Notifier, NotifyConfig, SchedulerDriver,
    SubscriberRepository, SystemClock, TaskScheduler, TokioTaskScheduler,
};

use crate::notifier::{LogNotifier, WebhookNotifier};
use crate::store::JsonStore;

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_file: PathBuf,
    pub webhook_url: Option<String>,
    pub notify: NotifyConfig,
    pub rescan_interval: Duration,
}

/// Build a driver over the JSON store at `data_file`.
pub async fn open_driver(
    data_file: &Path,
    notifier: Arc<dyn Notifier>,
    config: NotifyConfig,
) -> Result<SchedulerDriver> {
    let store = Arc::new(
        JsonStore::load(data_file)
            .await
            .map_err(|e| miette::miette!("failed to load {}: {}", data_file.display(), e))?,
    );

    Ok(SchedulerDriver::new(
        Arc::clone(&store) as Arc<dyn SubscriberRepository>,
        store as Arc<dyn ContentProvider>,
        notifier,
        Arc::new(TokioTaskScheduler::current()) as Arc<dyn TaskScheduler>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        config,
    ))
}

/// Run the daemon.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!(data_file = %config.data_file.display(), "starting homebot daemon");

    let notifier: Arc<dyn Notifier> = match config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            let webhook = WebhookNotifier::new(url)
                .map_err(|e| miette::miette!("failed to create webhook client: {}", e))?;
            info!(url = webhook.url(), "delivering through webhook");
            Arc::new(webhook)
        }
        None => {
            warn!("no webhook configured, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let driver = open_driver(&config.data_file, notifier, config.notify).await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    serve(&driver, config.rescan_interval, shutdown_rx).await?;
    Ok(())
}

/// Bootstrap `driver` and keep it running until `shutdown_rx` flips to true.
pub async fn serve(
    driver: &SchedulerDriver,
    rescan_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<BootstrapReport> {
    let report = driver
        .bootstrap()
        .await
        .map_err(|e| miette::miette!("bootstrap failed: {}", e))?;
    for owner in &report.failed {
        warn!(%owner, "subscriber not scheduled");
    }

    let mut rescan = tokio::time::interval(rescan_interval);
    // The first tick completes immediately; bootstrap already covered it.
    rescan.tick().await;

    while !*shutdown_rx.borrow() {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            _ = rescan.tick() => {
                match driver.reconcile().await {
                    Ok(armed) if !armed.is_empty() => {
                        info!(count = armed.len(), "armed new subscribers");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "subscriber rescan failed"),
                }
            }
        }
    }

    let cancelled = driver.shutdown();
    info!(cancelled, "daemon stopped");
    Ok(report)
}
