// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer service shared by the deduplicators and the observe layer.
//!
//! Periodic maintenance (mark-and-sweep, crop rotation) is expressed as
//! one-shot tasks that reschedule themselves at the end of each run, so a
//! slow run delays the next one instead of overlapping with it.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`ThreadScheduler`] | Production: timer thread + worker pool |
//! | [`ManualScheduler`] | Tests: virtual clock advanced by hand |
//!
//! [`PeriodicTask`] wraps either one into a cancellable repeating timer.

mod manual;
mod periodic;
mod thread;

pub use manual::ManualScheduler;
pub use periodic::{PeriodicStats, PeriodicTask, MIN_PERIOD};
pub use thread::{ThreadScheduler, DEFAULT_WORKER_COUNT};

use crate::Result;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unit of work run by a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Injectable timer source.
///
/// Implementations must be callable from any thread, including from inside
/// a task they are running.
pub trait Scheduler: Send + Sync {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> Result<TaskHandle>;

    /// Run `task` as soon as possible on another execution unit.
    fn execute(&self, task: Task) -> Result<()>;
}

/// Cancellation handle for a scheduled task.
///
/// Cancelling is idempotent; a task already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    canceled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// True once `cancel()` was called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Run a task, containing any panic so the calling thread survives.
pub(crate) fn run_guarded(context: &str, task: Task) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
    if result.is_err() {
        log::error!("[scheduler] {} task panicked", context);
    }
}

/// Pending timer, ordered so that `BinaryHeap` pops the earliest deadline.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) seq: u64,
    pub(crate) handle: TaskHandle,
    pub(crate) task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: max-heap becomes min-heap on (deadline, seq).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(deadline: Instant, seq: u64) -> TimerEntry {
        TimerEntry {
            deadline,
            seq,
            handle: TaskHandle::new(),
            task: Box::new(|| {}),
        }
    }

    #[test]
    fn test_timer_heap_pops_earliest_first() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(entry(base + Duration::from_millis(30), 0));
        heap.push(entry(base + Duration::from_millis(10), 1));
        heap.push(entry(base + Duration::from_millis(10), 2));
        heap.push(entry(base + Duration::from_millis(20), 3));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_task_handle_cancel_shared() {
        let handle = TaskHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_canceled());
        handle.cancel();
        handle.cancel();
        assert!(clone.is_canceled());
    }

    #[test]
    fn test_run_guarded_contains_panic() {
        run_guarded("test", Box::new(|| panic!("boom")));
    }
}
