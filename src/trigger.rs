//! Reload trigger channel.
//!
//! Any number of sources (file watcher, signals, tests) hold a
//! [`TriggerSender`]; the runner drains the single [`TriggerReceiver`] and
//! folds bursts into one rotation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

/// Why a reload was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadReason {
    Initial,
    FileChanged(PathBuf),
    Manual,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadReason::Initial => write!(f, "initial launch"),
            ReloadReason::FileChanged(path) => write!(f, "{} changed", path.display()),
            ReloadReason::Manual => write!(f, "manual reload"),
        }
    }
}

/// One or more triggers that arrived close together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBatch {
    /// The trigger that opened the batch
    pub reason: ReloadReason,
    /// Total triggers folded into this batch, including the first
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<ReloadReason>,
}

impl TriggerSender {
    /// Queue a reload. Never blocks; when the queue is full a reload is
    /// already pending, so the trigger is dropped.
    pub fn fire(&self, reason: ReloadReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(reason)) => {
                trace!(%reason, "Reload already pending, dropping trigger");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<ReloadReason>,
}

impl TriggerReceiver {
    /// Wait for a trigger, then keep collecting for `settle` so a burst
    /// becomes one batch. `None` once every sender is gone.
    pub async fn next_batch(&mut self, settle: Duration) -> Option<TriggerBatch> {
        let reason = self.rx.recv().await?;
        let mut count = 1;

        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        while self.rx.try_recv().is_ok() {
            count += 1;
        }

        Some(TriggerBatch { reason, count })
    }
}

pub fn channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (TriggerSender { tx }, TriggerReceiver { rx })
}
