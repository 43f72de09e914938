//! Top-level runner: relay listener, rotation controller, watcher and signals.

use crate::config::{ConfigSource, StoveConfig};
use crate::rebuild::BuildStep;
use crate::rotation::{RelayListener, RotationController};
use crate::trigger::{self, ReloadReason, TriggerBatch, TriggerReceiver, TriggerSender};
use crate::watcher::FileWatcher;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Cloneable shutdown flag; every waiter sees it once it is raised.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Stove {
    source: Arc<dyn ConfigSource>,
    config: StoveConfig,
    watch: bool,
}

impl Stove {
    pub fn new(source: Arc<dyn ConfigSource>) -> Result<Self> {
        let config = source.load().context("Failed to load configuration")?;
        Ok(Self {
            source,
            config,
            watch: true,
        })
    }

    /// Skip the filesystem watcher; reloads then only come from triggers.
    pub fn without_watcher(mut self) -> Self {
        self.watch = false;
        self
    }

    pub fn config(&self) -> &StoveConfig {
        &self.config
    }

    /// Run until SIGINT/SIGTERM (Ctrl+C elsewhere). SIGHUP forces a reload.
    pub async fn run(self) -> Result<()> {
        let shutdown = Shutdown::new();
        let (tx, rx) = trigger::channel();
        install_signal_handlers(shutdown.clone(), tx.clone())?;
        self.run_until(tx, rx, shutdown).await
    }

    /// Run with caller-provided trigger channel and shutdown flag.
    pub async fn run_until(
        self,
        triggers: TriggerSender,
        mut receiver: TriggerReceiver,
        shutdown: Shutdown,
    ) -> Result<()> {
        info!("Stove starting...");
        let mut controller = RotationController::new(Arc::clone(&self.source), &self.config);

        let relay = RelayListener::bind(&self.config.listen_addr(), controller.live_target())
            .await
            .with_context(|| format!("Failed to listen on {}", self.config.listen_addr()))?
            .with_client_timeout(self.config.client_timeout());

        let relay_shutdown = shutdown.clone();
        let relay_task = tokio::spawn(async move { relay.run(relay_shutdown.wait()).await });

        let _watcher = if self.watch {
            Some(FileWatcher::start(&self.config, triggers.clone()).with_context(|| {
                format!("Failed to watch {}", self.config.watch_dir.display())
            })?)
        } else {
            None
        };

        triggers.fire(ReloadReason::Initial);
        let mut debounce = self.config.debounce();

        loop {
            tokio::select! {
                batch = receiver.next_batch(debounce) => {
                    let Some(batch) = batch else {
                        info!("Reload triggers closed");
                        break;
                    };
                    if let Some(config) = reload(&mut controller, self.source.as_ref(), batch).await {
                        debounce = config.debounce();
                    }
                }
                _ = shutdown.wait() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        shutdown.trigger();
        info!("Stopping all workers...");
        controller.shutdown().await;

        match relay_task.await {
            Ok(result) => result?,
            Err(e) => warn!("Relay task ended abnormally: {}", e),
        }

        info!("Stove stopped");
        Ok(())
    }
}

/// Rebuild and rotate for one trigger batch. On any failure the current
/// workers stay in place. Returns the config snapshot that was applied.
async fn reload(
    controller: &mut RotationController,
    source: &dyn ConfigSource,
    batch: TriggerBatch,
) -> Option<StoveConfig> {
    info!("Reloading: {} ({} trigger(s))", batch.reason, batch.count);

    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            error!("Keeping current workers, configuration is invalid: {}", e);
            return None;
        }
    };

    if let Err(e) = BuildStep::run(config.build.as_deref(), config.working_dir.as_deref()).await {
        error!("Keeping current workers: {}", e);
        return None;
    }

    match controller.rotate_with(&config).await {
        Ok(report) => {
            info!(
                epoch = report.epoch,
                spawned = report.spawned.len(),
                retired = report.retired.len(),
                forced = report.forced_kills(),
                live = ?controller.live().map(|a| a.to_string()),
                "Rotation complete"
            );
        }
        Err(e) if e.is_fatal() => error!("Rotation aborted: {}", e),
        Err(e) => warn!("Rotation incomplete: {}", e),
    }
    Some(config)
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: Shutdown, triggers: TriggerSender) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    shutdown.trigger();
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    shutdown.trigger();
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    triggers.fire(ReloadReason::Manual);
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown: Shutdown, _triggers: TriggerSender) -> Result<()> {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C");
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_reaches_late_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_wakes_existing_waiters() {
        let shutdown = Shutdown::new();
        let waiter = {
            let s = shutdown.clone();
            tokio::spawn(async move { s.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn invalid_initial_config_is_rejected() {
        let config = StoveConfig::default(); // no command
        assert!(Stove::new(Arc::new(config)).is_err());
    }
}
