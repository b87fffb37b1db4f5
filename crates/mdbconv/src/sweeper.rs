//! Periodic cleanup of expired jobs and orphaned files.
//!
//! Runs on its own thread with a current-thread runtime, ticking at a fixed
//! interval and on manual trigger. Jobs a worker owns are never touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ConvertError;
use crate::job::{Job, JobError, JobState};
use crate::orchestrator::Orchestrator;
use crate::storage;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Terminal jobs removed with their files.
    pub reaped: Vec<String>,
    /// Idle jobs failed as expired; removed on a later sweep.
    pub expired: Vec<String>,
    /// Files and directories without a registered job.
    pub orphans_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reaped.is_empty() && self.expired.is_empty() && self.orphans_removed == 0
    }
}

pub struct CleanupSweeper {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    retention: Duration,
    shutdown: Arc<AtomicBool>,
    trigger: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupSweeper {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let settings = orchestrator.settings();
        let (interval, retention) = (settings.cleanup_interval(), settings.retention());
        Self::with_timing(orchestrator, interval, retention)
    }

    pub fn with_timing(
        orchestrator: Arc<Orchestrator>,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        let (trigger, _) = broadcast::channel(4);
        Self {
            orchestrator,
            interval,
            retention,
            shutdown: Arc::new(AtomicBool::new(false)),
            trigger,
            handle: Mutex::new(None),
        }
    }

    /// Start the sweep loop in a background thread.
    pub fn start(&self) -> std::io::Result<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = Arc::clone(&self.shutdown);
        let mut trigger_rx = self.trigger.subscribe();
        let interval = self.interval;
        let retention = self.retention;

        let handle = std::thread::Builder::new()
            .name("mdbconv-sweeper".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Cleanup sweeper could not start its runtime: {}", e);
                        return;
                    }
                };

                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual cleanup triggered");
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        let report = sweep_once(&orchestrator, retention);
                        if !report.is_empty() {
                            log::info!(
                                "Cleanup: {} jobs reaped, {} expired, {} orphans removed",
                                report.reaped.len(),
                                report.expired.len(),
                                report.orphans_removed
                            );
                        }
                    }
                });
            })?;

        let mut slot = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(handle);
        log::info!(
            "Cleanup sweeper started (every {}s, retention {}s)",
            self.interval.as_secs(),
            self.retention.as_secs()
        );
        Ok(())
    }

    /// Asks the running loop for an immediate sweep.
    pub fn sweep_now(&self) {
        let _ = self.trigger.send(());
    }

    /// Runs one sweep on the calling thread.
    pub fn sweep_once(&self) -> SweepReport {
        sweep_once(&self.orchestrator, self.retention)
    }

    /// Signals the loop to stop and joins it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake up the select loop so it sees the shutdown
        let _ = self.trigger.send(());

        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Cleanup sweeper thread panicked");
            }
        }
    }
}

fn idle_for(job: &Job, now: DateTime<Utc>) -> Duration {
    (now - job.last_touched_at).to_std().unwrap_or_default()
}

fn sweep_once(orchestrator: &Orchestrator, retention: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let registry = orchestrator.registry();
    let now = Utc::now();

    for cell in registry.cells() {
        let (state, idle) = {
            let job = cell.read();
            (job.state, idle_for(&job, now))
        };
        if state.is_busy() || idle <= retention {
            continue;
        }

        if state.is_terminal() {
            let removed = registry.remove_if(cell.id(), |job| {
                job.state.is_terminal() && idle_for(job, now) > retention
            });
            if let Some(removed) = removed {
                orchestrator.remove_files(&removed);
                log::debug!("Reaped job {}", removed.id());
                report.reaped.push(removed.id().to_string());
            }
            continue;
        }

        // Idle before conversion: expire now, reap on a later sweep.
        let expired = cell.update(|job| {
            let still_idle = matches!(job.state, JobState::Uploaded | JobState::TablesListed)
                && idle_for(job, now) > retention;
            still_idle && job.fail(JobError::from_error(&ConvertError::Expired)).is_ok()
        });
        if expired {
            log::info!("Expired idle job {}", cell.id());
            orchestrator.publish(&cell);
            report.expired.push(cell.id().to_string());
        }
    }

    report.orphans_removed = remove_orphans(orchestrator, retention);
    report
}

fn remove_orphans(orchestrator: &Orchestrator, retention: Duration) -> usize {
    let registry = orchestrator.registry();
    let dirs = [
        orchestrator.uploads().upload_dir(),
        orchestrator.exports().export_dir(),
    ];

    let mut removed = 0;
    for dir in dirs {
        for orphan in storage::find_orphans(dir, |id| registry.contains(id), retention) {
            match storage::remove_path(&orphan) {
                Ok(()) => {
                    log::debug!("Removed orphan {}", orphan.display());
                    removed += 1;
                }
                Err(e) => log::warn!("Failed to remove orphan: {}", e),
            }
        }
    }
    removed
}
