//! Lesson maintenance background daemon.
//!
//! Runs scheduled upkeep for the lesson store:
//! - Applying queued patches in periodic batch passes
//! - Purging decay-eligible lessons when a capability upgrade is announced

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::domain::errors::DomainResult;
use crate::domain::models::{CapabilityUpgrade, PatcherConfig};
use crate::services::lesson_store::PurgeReport;
use crate::services::patcher::{BatchReport, Patcher};

/// Configuration for the maintenance daemon.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between batch passes.
    pub batch_interval: Duration,
    /// Whether to run a batch pass on startup.
    pub run_on_startup: bool,
    /// Maximum consecutive failed passes before stopping.
    pub max_consecutive_failures: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_patcher(&PatcherConfig::default())
    }
}

impl MaintenanceConfig {
    /// Take the batch interval from the patcher settings.
    pub fn from_patcher(config: &PatcherConfig) -> Self {
        Self {
            batch_interval: config.batch_interval(),
            run_on_startup: false,
            max_consecutive_failures: 5,
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            batch_interval: interval,
            ..Default::default()
        }
    }
}

/// Event emitted by the maintenance daemon.
#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    Started,
    BatchStarted {
        run_number: u64,
    },
    BatchCompleted {
        run_number: u64,
        report: BatchReport,
        duration_ms: u64,
    },
    BatchFailed {
        run_number: u64,
        error: String,
    },
    /// A capability upgrade went through the decay policy.
    UpgradeApplied {
        upgrade: CapabilityUpgrade,
        report: PurgeReport,
    },
    UpgradeFailed {
        upgrade: CapabilityUpgrade,
        error: String,
    },
    Stopped {
        reason: StopReason,
    },
}

/// Reason the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

/// Status of the maintenance daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<Instant>,
    /// Lessons committed by batch passes.
    pub lessons_applied: u64,
    /// Requests dropped as duplicates by batch passes.
    pub requests_merged: u64,
    pub upgrades_seen: u64,
    /// Lessons retired by the decay policy.
    pub lessons_retired: u64,
}

/// Handle to control the maintenance daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    status: Arc<RwLock<DaemonStatus>>,
    upgrades: mpsc::Sender<CapabilityUpgrade>,
}

impl DaemonHandle {
    /// Request the daemon to stop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_signal.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    /// Hand a capability upgrade to the daemon. Returns false when the
    /// daemon is no longer running.
    pub async fn announce_upgrade(&self, upgrade: CapabilityUpgrade) -> bool {
        self.upgrades.send(upgrade).await.is_ok()
    }
}

/// Lesson maintenance background daemon.
pub struct MaintenanceDaemon {
    patcher: Arc<Patcher>,
    config: MaintenanceConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    upgrades_tx: mpsc::Sender<CapabilityUpgrade>,
    upgrades_rx: mpsc::Receiver<CapabilityUpgrade>,
}

impl MaintenanceDaemon {
    pub fn new(patcher: Arc<Patcher>, config: MaintenanceConfig) -> Self {
        let (upgrades_tx, upgrades_rx) = mpsc::channel(16);
        Self {
            patcher,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            upgrades_tx,
            upgrades_rx,
        }
    }

    /// Daemon whose interval follows the patcher's batch settings.
    pub fn with_defaults(patcher: Arc<Patcher>) -> Self {
        let config = MaintenanceConfig::from_patcher(patcher.config());
        Self::new(patcher, config)
    }

    /// Get a handle to control the daemon.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            stop_signal: self.stop_signal.clone(),
            status: self.status.clone(),
            upgrades: self.upgrades_tx.clone(),
        }
    }

    /// Run the daemon on its own task, returning a channel for events.
    pub fn run(self) -> mpsc::Receiver<MaintenanceEvent> {
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            self.run_loop(tx).await;
        });

        rx
    }

    async fn run_loop(mut self, tx: mpsc::Sender<MaintenanceEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(MaintenanceEvent::Started).await;

        let mut consecutive_failures = 0u32;
        let mut ticker = interval(self.config.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            // The first tick of an interval completes immediately.
            ticker.tick().await;
        }

        let reason = loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }

            tokio::select! {
                () = self.stop_signal.notified() => {
                    break StopReason::Requested;
                }
                _ = ticker.tick() => {
                    self.run_batch_cycle(&tx, &mut consecutive_failures).await;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        tracing::error!(
                            failures = consecutive_failures,
                            "Maintenance daemon stopping after repeated failures"
                        );
                        break StopReason::TooManyFailures;
                    }
                }
                // The daemon holds a sender, so the channel never closes.
                Some(upgrade) = self.upgrades_rx.recv() => {
                    self.apply_upgrade(&tx, upgrade).await;
                }
            }
        };

        self.status.write().await.running = false;
        let _ = tx.send(MaintenanceEvent::Stopped { reason }).await;
    }

    async fn run_batch_cycle(
        &self,
        tx: &mpsc::Sender<MaintenanceEvent>,
        consecutive_failures: &mut u32,
    ) {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };

        let _ = tx.send(MaintenanceEvent::BatchStarted { run_number }).await;

        let start = Instant::now();
        let result = self.patcher.run_batch().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                *consecutive_failures = 0;
                {
                    let mut status = self.status.write().await;
                    status.successful_runs += 1;
                    status.last_run = Some(Instant::now());
                    status.lessons_applied += report.applied.len() as u64;
                    status.requests_merged += report.merged as u64;
                }

                let _ = tx
                    .send(MaintenanceEvent::BatchCompleted {
                        run_number,
                        report,
                        duration_ms,
                    })
                    .await;
            }
            Err(e) => {
                *consecutive_failures += 1;
                self.status.write().await.failed_runs += 1;
                tracing::warn!(run_number, error = %e, "Batch patch pass failed");

                let _ = tx
                    .send(MaintenanceEvent::BatchFailed {
                        run_number,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn apply_upgrade(&self, tx: &mpsc::Sender<MaintenanceEvent>, upgrade: CapabilityUpgrade) {
        self.status.write().await.upgrades_seen += 1;

        let event = match self.patcher.store().purge(&upgrade).await {
            Ok(report) => {
                self.status.write().await.lessons_retired += report.retired.len() as u64;
                MaintenanceEvent::UpgradeApplied { upgrade, report }
            }
            Err(e) => {
                tracing::warn!(to = %upgrade.to_model, error = %e, "Capability upgrade purge failed");
                MaintenanceEvent::UpgradeFailed {
                    upgrade,
                    error: e.to_string(),
                }
            }
        };
        let _ = tx.send(event).await;
    }

    /// Run one batch pass outside the schedule.
    pub async fn run_once(&self) -> DomainResult<BatchReport> {
        self.patcher.run_batch().await
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }
}
