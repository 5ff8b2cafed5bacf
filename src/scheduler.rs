//! Fixed-interval driver for the sampling pipeline
//!
//! The scheduler alternates between two states. It sits `Idle` until the
//! interval elapses, moves to `Sampling` for one pipeline pass, and always
//! returns to `Idle` afterwards, whether the pass succeeded, failed or
//! panicked. The interval is measured from the end of one cycle to the start
//! of the next, so cycles never overlap.

use crate::error::CycleError;
use crate::pipeline::{CycleSummary, Pipeline};
use crate::reporter::Reporter;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Process-wide stop request
///
/// Checked synchronously by the scheduler thread and awaited by the HTTP
/// server's graceful shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Time source and sleeper used by the scheduler
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration`, returning early if shutdown is requested
    fn sleep(&self, duration: Duration, shutdown: &Shutdown);
}

/// Wall-clock time with real, interruptible sleeps
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration, shutdown: &Shutdown) {
        let mut remaining = duration;
        while remaining > Duration::ZERO && !shutdown.is_triggered() {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sampling,
}

/// Counters kept across cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failures: u64,
}

pub struct Scheduler {
    pipeline: Pipeline,
    interval: Duration,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        pipeline: Pipeline,
        interval: Duration,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            pipeline,
            interval,
            clock,
            reporter,
            state: SchedulerState::Idle,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run exactly one cycle
    ///
    /// Failures, including panics inside the pipeline, are logged and passed
    /// to the publisher; they never escape as a panic.
    pub fn tick(&mut self) -> Result<CycleSummary, CycleError> {
        self.state = SchedulerState::Sampling;
        let pipeline = &self.pipeline;
        let clock = self.clock.as_ref();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(clock)))
            .unwrap_or_else(|payload| Err(CycleError::Panicked(panic_message(payload.as_ref()))));
        self.state = SchedulerState::Idle;
        self.stats.cycles += 1;

        let context = self.pipeline.kind().to_string();
        match &outcome {
            Ok(summary) => {
                let message = format!(
                    "Published {} of {} devices to {} ({} bytes)",
                    summary.sampled,
                    summary.requested,
                    self.pipeline.publisher().destination(),
                    summary.bytes
                );
                if summary.up {
                    self.reporter.info(&context, &message);
                } else {
                    self.reporter
                        .warn(&context, &format!("{}, exporter reported down", message));
                }
            }
            Err(e) => {
                self.stats.failures += 1;
                self.reporter
                    .error(&context, &format!("Error collecting metrics: {}", e));
                self.pipeline.publisher().cycle_failed(&e.to_string());
            }
        }
        outcome
    }

    /// Tick until `shutdown` is triggered, sleeping `interval` between cycles
    pub fn run(&mut self, shutdown: &Shutdown) {
        let context = self.pipeline.kind().to_string();
        self.reporter.info(
            &context,
            &format!("Scheduler started with interval {:?}", self.interval),
        );

        while !shutdown.is_triggered() {
            // Outcome is already reported by tick()
            let _ = self.tick();
            if shutdown.is_triggered() {
                break;
            }
            self.clock.sleep(self.interval, shutdown);
        }

        self.reporter.info(
            &context,
            &format!(
                "Scheduler stopped after {} cycles ({} failed)",
                self.stats.cycles, self.stats.failures
            ),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
