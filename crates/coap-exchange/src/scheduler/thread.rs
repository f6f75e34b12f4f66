// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread-backed scheduler: one timer thread and a pool of workers.
//!
//! ```text
//! schedule() --TimerCommand--> [coap-timer] --due Task--> [coap-worker-0..N]
//! execute()  ------------------------------------------> [coap-worker-0..N]
//! ```
//!
//! The timer thread keeps a min-heap of deadlines and sleeps on its command
//! channel until the earliest one. Tasks never run on the timer thread.

use super::{run_guarded, Scheduler, Task, TaskHandle, TimerEntry};
use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default number of worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 2;

enum TimerCommand {
    Schedule(TimerEntry),
    Shutdown,
}

/// Production scheduler.
///
/// Stops and joins its threads on `shutdown()` or drop. Tasks still queued
/// at that point are discarded.
pub struct ThreadScheduler {
    timer_tx: Sender<TimerCommand>,
    job_tx: Mutex<Option<Sender<Task>>>,
    running: AtomicBool,
    seq: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Start a scheduler with [`DEFAULT_WORKER_COUNT`] workers.
    pub fn new() -> Result<Self> {
        Self::with_workers(DEFAULT_WORKER_COUNT)
    }

    /// Start a scheduler with `workers` worker threads (at least one).
    pub fn with_workers(workers: usize) -> Result<Self> {
        let (timer_tx, timer_rx) = channel::unbounded::<TimerCommand>();
        let (job_tx, job_rx) = channel::unbounded::<Task>();
        let mut threads = Vec::with_capacity(workers.max(1) + 1);

        for id in 0..workers.max(1) {
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("coap-worker-{}", id))
                .spawn(move || worker_loop(id, rx))
                .map_err(Error::SpawnFailed)?;
            threads.push(handle);
        }

        let timer_jobs = job_tx.clone();
        let handle = thread::Builder::new()
            .name("coap-timer".to_string())
            .spawn(move || timer_loop(timer_rx, timer_jobs))
            .map_err(Error::SpawnFailed)?;
        threads.push(handle);

        log::debug!("[scheduler] Started with {} workers", workers.max(1));

        Ok(Self {
            timer_tx,
            job_tx: Mutex::new(Some(job_tx)),
            running: AtomicBool::new(true),
            seq: AtomicU64::new(0),
            threads: Mutex::new(threads),
        })
    }

    /// True until `shutdown()`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting tasks and join all threads. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.timer_tx.send(TimerCommand::Shutdown);
        self.job_tx.lock().take();

        let current = thread::current().id();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            // A task may drop the last reference from inside a worker.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        log::debug!("[scheduler] Stopped");
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<TaskHandle> {
        if !self.is_running() {
            return Err(Error::SchedulerShutdown);
        }
        let handle = TaskHandle::new();
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            handle: handle.clone(),
            task,
        };
        self.timer_tx
            .send(TimerCommand::Schedule(entry))
            .map_err(|_| Error::SchedulerShutdown)?;
        Ok(handle)
    }

    fn execute(&self, task: Task) -> Result<()> {
        match self.job_tx.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|_| Error::SchedulerShutdown),
            None => Err(Error::SchedulerShutdown),
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, jobs: Receiver<Task>) {
    while let Ok(task) = jobs.recv() {
        run_guarded("worker", task);
    }
    log::trace!("[scheduler] Worker {} exiting", id);
}

fn timer_loop(commands: Receiver<TimerCommand>, jobs: Sender<Task>) {
    let mut heap: BinaryHeap<TimerEntry> = BinaryHeap::new();

    loop {
        let command = match heap.peek() {
            Some(next) => {
                let wait = next.deadline.saturating_duration_since(Instant::now());
                commands.recv_timeout(wait)
            }
            None => commands
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TimerCommand::Schedule(entry)) => heap.push(entry),
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|e| e.deadline <= now) {
            let Some(entry) = heap.pop() else { break };
            if entry.handle.is_canceled() {
                continue;
            }
            if jobs.send(entry.task).is_err() {
                log::debug!("[scheduler] Worker pool gone, dropping timer");
                return;
            }
        }
    }

    log::trace!("[scheduler] Timer exiting ({} timers dropped)", heap.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_schedule_runs_after_delay() {
        let scheduler = ThreadScheduler::new().expect("scheduler should start");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let start = Instant::now();

        scheduler
            .schedule(
                Duration::from_millis(30),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("schedule should succeed");

        assert!(wait_for(&counter, 1));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_canceled_task_never_runs() {
        let scheduler = ThreadScheduler::new().expect("scheduler should start");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let handle = scheduler
            .schedule(
                Duration::from_millis(20),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("schedule should succeed");
        handle.cancel();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execute_survives_panicking_task() {
        let scheduler = ThreadScheduler::with_workers(1).expect("scheduler should start");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        scheduler
            .execute(Box::new(|| panic!("task failure")))
            .expect("execute should succeed");
        scheduler
            .execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("execute should succeed");

        assert!(wait_for(&counter, 1));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let scheduler = ThreadScheduler::new().expect("scheduler should start");
        scheduler.shutdown();
        scheduler.shutdown();

        assert!(matches!(
            scheduler.execute(Box::new(|| {})),
            Err(Error::SchedulerShutdown)
        ));
        assert!(matches!(
            scheduler.schedule(Duration::ZERO, Box::new(|| {})),
            Err(Error::SchedulerShutdown)
        ));
    }
}
