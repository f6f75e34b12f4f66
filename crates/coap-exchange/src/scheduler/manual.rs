// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deterministic scheduler driven by a virtual clock.
//!
//! Nothing runs until the test calls [`ManualScheduler::advance`] or
//! [`ManualScheduler::run_pending`]. Tasks run on the calling thread, in
//! deadline order, with the clock set to each task's deadline while it runs,
//! so self-rescheduling tasks observe the same timeline they would in
//! production.

use super::{run_guarded, Scheduler, Task, TaskHandle, TimerEntry};
use crate::Result;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, VecDeque};
use std::time::{Duration, Instant};

struct ManualState {
    now: Instant,
    seq: u64,
    timers: BinaryHeap<TimerEntry>,
    ready: VecDeque<Task>,
}

/// Scheduler for tests.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at the current instant.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                seq: 0,
                timers: BinaryHeap::new(),
                ready: VecDeque::new(),
            }),
        }
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Tasks scheduled by running tasks are honoured if they fall inside the
    /// window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut ran = self.run_pending();

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.timers.peek() {
                    Some(entry) if entry.deadline <= target => {
                        let entry = state.timers.pop();
                        if let Some(e) = &entry {
                            if e.deadline > state.now {
                                state.now = e.deadline;
                            }
                        }
                        entry
                    }
                    _ => None,
                }
            };
            let Some(entry) = next else { break };
            if !entry.handle.is_canceled() {
                run_guarded("manual timer", entry.task);
                ran += 1;
            }
            ran += self.run_pending();
        }

        self.state.lock().now = target;
        ran
    }

    /// Run every task handed over with `execute()`. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.lock().ready.pop_front();
            let Some(task) = task else { break };
            run_guarded("manual", task);
            ran += 1;
        }
        ran
    }

    /// Timers not yet due and not cancelled.
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|e| !e.handle.is_canceled())
            .count()
    }

    /// Tasks waiting in the `execute()` queue.
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().ready.len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<TaskHandle> {
        let handle = TaskHandle::new();
        let mut state = self.state.lock();
        let entry = TimerEntry {
            deadline: state.now + delay,
            seq: state.seq,
            handle: handle.clone(),
            task,
        };
        state.seq += 1;
        state.timers.push(entry);
        Ok(handle)
    }

    fn execute(&self, task: Task) -> Result<()> {
        self.state.lock().ready.push_back(task);
        Ok(())
    }
}
