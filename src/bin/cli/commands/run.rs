use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::app::App;
use scribe_sync_lib::sync::start_sync_scheduler;

/// How long Ctrl-C waits for an in-flight pass before exiting anyway
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(app: &App) -> Result<()> {
    let manager = Arc::new(app.manager()?);
    let scheduler = start_sync_scheduler(manager.clone(), app.config.interval());

    #[cfg(unix)]
    spawn_signal_handlers(manager.clone(), &scheduler)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Interrupted, shutting down");

    manager.persist_session();
    scheduler.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler.join()).await.is_err() {
        log::warn!("Sync pass still running after {:?}, exiting", SHUTDOWN_GRACE);
    }
    Ok(())
}

/// SIGUSR1 forces a sync, SIGUSR2 logs the last result
#[cfg(unix)]
fn spawn_signal_handlers(
    manager: Arc<scribe_sync_lib::sync::SyncManager>,
    scheduler: &scribe_sync_lib::sync::SyncScheduler,
) -> Result<()> {
    use scribe_sync_lib::sync::SyncSchedulerMessage;
    use tokio::signal::unix::{signal, SignalKind};

    let mut force = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
    let mut report = signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;

    let sender = scheduler.sender_clone();
    tokio::spawn(async move {
        while force.recv().await.is_some() {
            log::info!("SIGUSR1: force sync");
            if sender.try_send(SyncSchedulerMessage::ForceSync).is_err() {
                log::warn!("Sync scheduler is not accepting requests");
            }
        }
    });

    tokio::spawn(async move {
        while report.recv().await.is_some() {
            match manager.status() {
                Some(status) => log::info!("{}", status.summary()),
                None => log::info!("No Updates"),
            }
        }
    });

    Ok(())
}
