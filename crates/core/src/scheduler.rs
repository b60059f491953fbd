//! Periodic background job runner.
//!
//! One timer per scheduler. A tick that fires while the previous run is still
//! going is skipped, so a slow upstream never piles up concurrent refreshes.
//! Failed runs are logged and the schedule carries on.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

/// Clears the running flag however the job ends, including by panic.
struct RunningGuard(Arc<Counters>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub struct RefreshScheduler {
    name: &'static str,
    counters: Arc<Counters>,
    timer: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn new(name: &'static str) -> Self {
        Self { name, counters: Arc::new(Counters::default()), timer: None }
    }

    /// Run `job` every `every`, first one period from now.
    ///
    /// Replaces any schedule already running on this instance. A zero period
    /// leaves the scheduler stopped and returns false.
    pub fn schedule<F, Fut, E>(&mut self, every: Duration, job: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.stop();

        if every.is_zero() {
            tracing::warn!(scheduler = self.name, "zero period; scheduler not started");
            return false;
        }

        let name = self.name;
        let counters = self.counters.clone();
        let job = Arc::new(job);

        tracing::info!(scheduler = name, every_ms = every.as_millis() as u64, "scheduler started");

        self.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                if counters
                    .running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(scheduler = name, "previous run still in progress; tick skipped");
                    continue;
                }

                let guard = RunningGuard(counters.clone());
                let job = job.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    counters.runs.fetch_add(1, Ordering::Relaxed);
                    let started = Instant::now();
                    match job().await {
                        Ok(()) => {
                            tracing::debug!(
                                scheduler = name,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "scheduled run finished"
                            );
                        }
                        Err(e) => {
                            counters.failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(scheduler = name, error = %e, "scheduled run failed");
                        }
                    }
                });
            }
        }));
        true
    }

    /// Stop ticking. A run already in progress is left to finish.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            tracing::info!(scheduler = self.name, "scheduler stopped");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
