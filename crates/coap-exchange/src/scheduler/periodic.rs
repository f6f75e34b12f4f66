// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Self-rescheduling periodic task.
//!
//! Each run is a one-shot timer; the next one is armed after the body
//! returns, whether it returned normally or panicked. A slow run therefore
//! delays the next run but never overlaps with it.
//!
//! ```text
//! start() -> arm(gen) --delay--> fire(gen) -> body(now) -> arm(gen) --delay--> ...
//!                                   |
//!                 stop()/restart bumps gen: stale fires are ignored
//! ```

use super::{Scheduler, TaskHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Shortest delay between two runs; a zero period is stretched to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

type Body = Box<dyn Fn(Instant) + Send + Sync + 'static>;
type Period = Box<dyn Fn() -> Duration + Send + Sync + 'static>;

struct Job {
    body: Body,
    period: Period,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodicStats {
    /// Completed runs (including panicked ones).
    pub runs: u64,
    /// Runs whose body panicked.
    pub panics: u64,
    /// Times the next run could not be armed.
    pub schedule_failures: u64,
}

struct PeriodicState {
    name: &'static str,
    scheduler: RwLock<Arc<dyn Scheduler>>,
    job: Mutex<Option<Arc<Job>>>,
    handle: Mutex<Option<TaskHandle>>,
    generation: AtomicU64,
    running: AtomicBool,
    runs: AtomicU64,
    panics: AtomicU64,
    schedule_failures: AtomicU64,
}

/// Repeating timer with an explicit "run once, then reschedule" contract.
pub struct PeriodicTask {
    state: Arc<PeriodicState>,
}

impl PeriodicTask {
    /// Create a stopped task bound to `scheduler`. `name` prefixes log lines.
    pub fn new(name: &'static str, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: Arc::new(PeriodicState {
                name,
                scheduler: RwLock::new(scheduler),
                job: Mutex::new(None),
                handle: Mutex::new(None),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                panics: AtomicU64::new(0),
                schedule_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Start running `body` every `period()`. No-op if already running.
    ///
    /// `period` is evaluated each time a run is armed, so period changes
    /// apply from the next run on. `body` receives the scheduler's clock.
    pub fn start<B, P>(&self, period: P, body: B)
    where
        B: Fn(Instant) + Send + Sync + 'static,
        P: Fn() -> Duration + Send + Sync + 'static,
    {
        if self.state.running.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.job.lock() = Some(Arc::new(Job {
            body: Box::new(body),
            period: Box::new(period),
        }));
        let gen = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
        PeriodicState::arm(&self.state, gen);
        log::debug!("[{}] Started", self.state.name);
    }

    /// Stop future runs. Idempotent; safe before `start()`.
    pub fn stop(&self) {
        if !self.state.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.state.disarm();
        self.state.job.lock().take();
        log::debug!("[{}] Stopped", self.state.name);
    }

    /// True between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Swap the timer source.
    ///
    /// A running task is disarmed first and re-armed on the new scheduler,
    /// so two schedules never run the body concurrently.
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        let running = self.is_running();
        if running {
            self.state.disarm();
        }
        *self.state.scheduler.write() = scheduler;
        if running {
            let gen = self.state.generation.load(Ordering::Acquire);
            PeriodicState::arm(&self.state, gen);
        }
    }

    /// Current timer source.
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.state.scheduler.read().clone()
    }

    /// Run and failure counters.
    pub fn stats(&self) -> PeriodicStats {
        PeriodicStats {
            runs: self.state.runs.load(Ordering::Relaxed),
            panics: self.state.panics.load(Ordering::Relaxed),
            schedule_failures: self.state.schedule_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PeriodicState {
    /// Invalidate the armed run (if any).
    fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.handle.lock().take() {
            handle.cancel();
        }
    }

    fn arm(state: &Arc<Self>, gen: u64) {
        let Some(job) = state.job.lock().clone() else {
            return;
        };
        let delay = (job.period)().max(MIN_PERIOD);
        let weak: Weak<Self> = Arc::downgrade(state);
        let scheduler = state.scheduler.read().clone();

        let result = scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    Self::fire(&state, gen);
                }
            }),
        );

        match result {
            Ok(handle) => *state.handle.lock() = Some(handle),
            Err(e) => {
                // Losing the chain silently stops maintenance: count it.
                state.schedule_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("[{}] Failed to schedule next run: {}", state.name, e);
            }
        }
    }

    fn is_current(&self, gen: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == gen
    }

    fn fire(state: &Arc<Self>, gen: u64) {
        if !state.is_current(gen) {
            return;
        }
        let Some(job) = state.job.lock().clone() else {
            return;
        };

        let now = state.scheduler.read().now();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (job.body)(now)));
        state.runs.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            state.panics.fetch_add(1, Ordering::Relaxed);
            log::error!("[{}] Run panicked, rescheduling anyway", state.name);
        }

        if state.is_current(gen) {
            Self::arm(state, gen);
        }
    }
}
