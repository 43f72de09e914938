use super::addr::{AddrAllocator, Address};
use super::relay::{LivePointer, LiveTarget};
use super::slots::WorkerSlots;
use super::supervisor::{RetireOutcome, Worker, WorkerSupervisor};
use crate::config::{ConfigSource, StoveConfig};
use crate::error::{Result, StoveError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What one `rotate` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub epoch: u64,
    pub spawned: Vec<Address>,
    pub retired: Vec<(Address, RetireOutcome)>,
}

impl RotationReport {
    pub fn forced_kills(&self) -> usize {
        self.retired
            .iter()
            .filter(|(_, outcome)| *outcome == RetireOutcome::Forced)
            .count()
    }
}

/// Swaps workers on every reload and keeps the live pointer on the newest.
///
/// Must be driven by one caller at a time; `rotate` takes `&mut self`.
pub struct RotationController {
    source: Arc<dyn ConfigSource>,
    allocator: AddrAllocator,
    supervisor: WorkerSupervisor,
    slots: WorkerSlots,
    live: LivePointer,
    epoch: u64,
    retire_timeout: Duration,
}

impl RotationController {
    pub fn new(source: Arc<dyn ConfigSource>, initial: &StoveConfig) -> Self {
        Self {
            source,
            allocator: allocator_for(initial),
            supervisor: WorkerSupervisor::new(),
            slots: WorkerSlots::new(initial.workers),
            live: LivePointer::new(),
            epoch: 0,
            retire_timeout: initial.retire_timeout(),
        }
    }

    /// Read handle for the relay listener.
    pub fn live_target(&self) -> LiveTarget {
        self.live.target()
    }

    pub fn live(&self) -> Option<Address> {
        self.live.get()
    }

    /// Number of rotations attempted so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Tracked workers, oldest first.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.slots.iter()
    }

    /// Workers whose process is still running.
    pub fn alive_count(&mut self) -> usize {
        self.slots
            .iter_mut()
            .map(|w| w.is_alive())
            .filter(|alive| *alive)
            .count()
    }

    /// Fetch a fresh config snapshot and rotate every slot.
    pub async fn rotate(&mut self) -> Result<RotationReport> {
        let config = self.source.load()?;
        self.rotate_with(&config).await
    }

    /// Rotate every slot using an already loaded `config`.
    ///
    /// Per slot: allocate a port, retire the oldest worker if the set is
    /// full, spawn the replacement, then point new connections at it. The
    /// old worker is gone before the new one starts, so there is a short
    /// window where the pointer names an address nobody listens on yet.
    pub async fn rotate_with(&mut self, config: &StoveConfig) -> Result<RotationReport> {
        self.epoch += 1;
        let mut report = RotationReport {
            epoch: self.epoch,
            ..Default::default()
        };

        self.apply_config(config, &mut report).await;
        let entry = config.worker_entry();

        for slot in 0..config.workers {
            let address = self.allocator.allocate().await?;

            if let Some(old) = self.slots.evict_oldest_if_full() {
                self.retire_into(old, &mut report).await;
            }

            let worker = self.supervisor.spawn(&entry, address.clone())?;
            if let Err(rejected) = self.slots.push(worker) {
                // Dropping the handle kills the process.
                error!(worker = rejected.id(), "Worker slot set unexpectedly full");
                return Err(StoveError::Config("worker slot set is full".into()));
            }

            self.live.set(address.clone());
            info!(epoch = self.epoch, slot, address = %address, "Worker slot rotated");
            report.spawned.push(address);
        }

        Ok(report)
    }

    /// Retire every tracked worker, oldest first.
    pub async fn shutdown(&mut self) -> RotationReport {
        let mut report = RotationReport {
            epoch: self.epoch,
            ..Default::default()
        };
        for worker in self.slots.drain() {
            self.retire_into(worker, &mut report).await;
        }
        info!(retired = report.retired.len(), "All workers stopped");
        report
    }

    async fn apply_config(&mut self, config: &StoveConfig, report: &mut RotationReport) {
        self.retire_timeout = config.retire_timeout();

        if self.allocator.host() != config.host {
            info!(from = %self.allocator.host(), to = %config.host, "Worker host changed");
            self.allocator.set_host(config.host.clone());
        }
        self.allocator
            .set_limits(config.max_port_attempts, config.probe_timeout());

        if config.workers != self.slots.capacity() {
            info!(
                from = self.slots.capacity(),
                to = config.workers,
                "Worker count changed"
            );
            for worker in self.slots.resize(config.workers) {
                self.retire_into(worker, report).await;
            }
        }
    }

    async fn retire_into(&self, worker: Worker, report: &mut RotationReport) {
        let address = worker.address().clone();
        match self.supervisor.retire(worker, self.retire_timeout).await {
            Ok(outcome) => {
                if outcome == RetireOutcome::Forced {
                    warn!(address = %address, "Worker force killed");
                }
                report.retired.push((address, outcome));
            }
            // Not fatal: the handle is gone and kill-on-drop covers the process.
            Err(e) => error!(address = %address, "Failed to retire worker: {}", e),
        }
    }
}

fn allocator_for(config: &StoveConfig) -> AddrAllocator {
    let mut allocator = AddrAllocator::new(config.host.clone());
    allocator.set_limits(config.max_port_attempts, config.probe_timeout());
    allocator
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Config source whose snapshot tests can swap between rotations.
    struct SharedSource(Mutex<StoveConfig>);

    impl ConfigSource for SharedSource {
        fn load(&self) -> Result<StoveConfig> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn sleeper(workers: usize) -> StoveConfig {
        StoveConfig {
            host: "127.0.0.1".into(),
            workers,
            timeout: 2.0,
            command: vec!["sleep".into(), "30".into()],
            ..Default::default()
        }
    }

    fn controller(config: StoveConfig) -> (RotationController, Arc<SharedSource>) {
        let source = Arc::new(SharedSource(Mutex::new(config.clone())));
        let controller = RotationController::new(source.clone(), &config);
        (controller, source)
    }

    #[tokio::test]
    async fn first_rotation_retires_nothing() {
        let (mut controller, _) = controller(sleeper(1));
        assert!(controller.live().is_none());

        let report = controller.rotate().await.unwrap();
        assert_eq!(report.epoch, 1);
        assert_eq!(report.spawned.len(), 1);
        assert!(report.retired.is_empty());
        assert_eq!(controller.live().as_ref(), report.spawned.last());
        assert_eq!(controller.alive_count(), 1);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn second_rotation_replaces_worker() {
        let (mut controller, _) = controller(sleeper(1));
        let first = controller.rotate().await.unwrap();
        let second = controller.rotate().await.unwrap();

        assert_eq!(second.epoch, 2);
        assert_eq!(second.retired.len(), 1);
        assert_eq!(second.retired[0].0, first.spawned[0]);
        assert_eq!(second.retired[0].1, RetireOutcome::Graceful);
        assert_ne!(second.spawned[0], first.spawned[0]);
        assert_eq!(controller.live().as_ref(), second.spawned.last());
        assert_eq!(controller.worker_count(), 1);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn slot_set_never_exceeds_worker_count() {
        let (mut controller, _) = controller(sleeper(2));
        for _ in 0..3 {
            let report = controller.rotate().await.unwrap();
            assert!(controller.worker_count() <= 2);
            assert_eq!(controller.live().as_ref(), report.spawned.last());
        }
        let report = controller.shutdown().await;
        assert_eq!(report.retired.len(), 2);
        assert_eq!(controller.worker_count(), 0);
    }

    #[tokio::test]
    async fn shrinking_worker_count_retires_oldest() {
        let (mut controller, source) = controller(sleeper(3));
        let first = controller.rotate().await.unwrap();

        source.0.lock().unwrap().workers = 1;
        let second = controller.rotate().await.unwrap();

        assert_eq!(controller.capacity(), 1);
        assert_eq!(controller.worker_count(), 1);
        // Two evicted by the resize, one by the rotation itself.
        let retired: Vec<_> = second.retired.iter().map(|(a, _)| a.clone()).collect();
        assert_eq!(retired, first.spawned);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn stubborn_worker_is_forced_and_rotation_completes() {
        let mut config = sleeper(1);
        config.command = vec![
            "sh".into(),
            "-c".into(),
            "trap '' TERM; exec sleep 30".into(),
        ];
        config.timeout = 0.2;
        let (mut controller, _) = controller(config);

        let first = controller.rotate().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = controller.rotate().await.unwrap();

        assert_eq!(second.forced_kills(), 1);
        assert_ne!(controller.live().as_ref(), first.spawned.last());
        assert_eq!(controller.live().as_ref(), second.spawned.last());

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_snapshot_aborts_before_touching_workers() {
        let good = sleeper(1);
        let bad = StoveConfig {
            command: Vec::new(),
            ..good.clone()
        };
        let mut controller = RotationController::new(Arc::new(bad), &good);
        controller.rotate_with(&good).await.unwrap();
        let live = controller.live();

        let err = controller.rotate().await.unwrap_err();
        assert!(matches!(err, StoveError::Config(_)));
        assert_eq!(controller.live(), live);
        assert_eq!(controller.alive_count(), 1);

        controller.shutdown().await;
    }
}
