//! Background scheduling of health checks
//!
//! A check becomes due after the initial delay and then once per period. A
//! due check is deferred while the user was active within the idle debounce
//! or while the machine runs on battery, and is retried on the next poll.
//! A started check always runs to completion; shutdown waits for it.

use super::checker::HealthChecker;
use super::report::HealthReport;
use crate::vfs::VfsStore;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use fsrecords_common::config::HealthCheckConfig;
use fsrecords_common::{Error, Result};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Source of the idle and power signals
pub trait ActivityMonitor: Send + Sync {
    /// Last user interaction, if any
    fn last_activity(&self) -> Option<Instant>;

    fn on_battery(&self) -> bool;
}

/// Activity monitor driven by explicit calls
#[derive(Default)]
pub struct ManualActivityMonitor {
    last_activity: Mutex<Option<Instant>>,
    on_battery: AtomicBool,
}

impl ManualActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_activity(&self, at: Instant) {
        *self.last_activity.lock() = Some(at);
    }

    pub fn set_on_battery(&self, on_battery: bool) {
        self.on_battery.store(on_battery, Ordering::Release);
    }
}

impl ActivityMonitor for ManualActivityMonitor {
    fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.lock()
    }

    fn on_battery(&self) -> bool {
        self.on_battery.load(Ordering::Acquire)
    }
}

/// What one poll did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Disabled,
    NotDue,
    /// Due, but the user is active
    UserActive,
    /// Due, but running on battery
    OnBattery,
    Completed(Box<HealthReport>),
    /// The check panicked; counted and dropped
    Failed,
}

/// Periodic health check runner
pub struct HealthCheckScheduler {
    store: Arc<VfsStore>,
    monitor: Arc<dyn ActivityMonitor>,
    config: HealthCheckConfig,
    next_run: Mutex<Instant>,
    runs: AtomicU64,
    failures: AtomicU64,
    last_report: Mutex<Option<HealthReport>>,
}

impl HealthCheckScheduler {
    /// Scheduler whose first check is due `initial_delay` after `started`
    pub fn new(
        store: Arc<VfsStore>,
        monitor: Arc<dyn ActivityMonitor>,
        config: HealthCheckConfig,
        started: Instant,
    ) -> Self {
        let next_run = started + config.initial_delay();
        Self {
            store,
            monitor,
            config,
            next_run: Mutex::new(next_run),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_report: Mutex::new(None),
        }
    }

    /// Run the check if it is due and allowed at `now`
    pub fn poll(&self, now: Instant) -> PollOutcome {
        if !self.config.enabled {
            return PollOutcome::Disabled;
        }
        if now < *self.next_run.lock() {
            return PollOutcome::NotDue;
        }
        if self.config.skip_on_battery && self.monitor.on_battery() {
            debug!("health check deferred: on battery");
            return PollOutcome::OnBattery;
        }
        if let Some(last) = self.monitor.last_activity() {
            if now.saturating_duration_since(last) < self.config.idle_debounce() {
                debug!("health check deferred: user active");
                return PollOutcome::UserActive;
            }
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| {
            HealthChecker::for_store(&self.store, self.config.clone()).check_health()
        })) {
            Ok(report) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                *self.last_report.lock() = Some(report.clone());
                PollOutcome::Completed(Box::new(report))
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!("health check failed; will retry next period");
                PollOutcome::Failed
            }
        };
        *self.next_run.lock() = now + self.config.period();
        outcome
    }

    /// Completed checks
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Checks that failed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.lock().clone()
    }

    pub fn next_run(&self) -> Instant {
        *self.next_run.lock()
    }

    /// Poll every `tick` on a background thread until the handle is dropped
    pub fn spawn(self: Arc<Self>, tick: Duration) -> Result<SchedulerHandle> {
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("fsrecords-health".into())
            .spawn(move || {
                info!("Health check scheduler started");
                loop {
                    match shutdown_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.poll(Instant::now());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Health check scheduler stopped");
            })
            .map_err(|e| Error::internal(format!("failed to spawn health thread: {e}")))?;
        Ok(SchedulerHandle {
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Running background scheduler; stops (after any check in progress) on drop
pub struct SchedulerHandle {
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
