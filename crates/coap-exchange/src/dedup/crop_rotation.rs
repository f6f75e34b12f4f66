// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crop-rotation deduplicator.
//!
//! Three buckets, two of them active. New exchanges go into both active
//! buckets; every `crop_rotation_period` the window slides by one and the
//! bucket that falls out is cleared:
//!
//! ```text
//! window     first second   cleared
//! initial      0     1        -
//! rotate #1    1     2        0
//! rotate #2    2     0        1
//! rotate #3    0     1        2
//! ```
//!
//! An entry therefore survives at least one and at most two periods. No
//! per-entry timestamps are inspected.

use super::Deduplicator;
use crate::config::NetworkConfig;
use crate::exchange::{Exchange, ExchangeKey};
use crate::scheduler::{PeriodicStats, PeriodicTask, Scheduler};
use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;

const BUCKETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    first: usize,
    second: usize,
}

impl Window {
    const INITIAL: Window = Window { first: 0, second: 1 };

    /// Slide by one; returns the bucket that left the window.
    fn rotate(&mut self) -> usize {
        let retired = self.first;
        self.first = self.second;
        self.second = (self.second + 1) % BUCKETS;
        retired
    }
}

struct Buckets {
    maps: [DashMap<ExchangeKey, Arc<Exchange>>; BUCKETS],
    // Readers share the window; rotation takes it exclusively so lookups
    // never straddle two windows.
    window: RwLock<Window>,
    period: ArcSwap<Duration>,
}

impl Buckets {
    fn rotate(&self) {
        let mut window = self.window.write();
        let retired = window.rotate();
        let dropped = self.maps[retired].len();
        self.maps[retired].clear();
        log::trace!(
            "[crop] Rotated to ({}, {}), dropped {} exchanges",
            window.first,
            window.second,
            dropped
        );
    }

    fn insert_if_absent(
        map: &DashMap<ExchangeKey, Arc<Exchange>>,
        key: ExchangeKey,
        exchange: &Arc<Exchange>,
    ) -> Option<Arc<Exchange>> {
        match map.entry(key) {
            Entry::Occupied(e) => Some(Arc::clone(e.get())),
            Entry::Vacant(v) => {
                v.insert(Arc::clone(exchange));
                None
            }
        }
    }
}

/// Deduplicator with time-bucketed retention.
pub struct CropRotation {
    buckets: Arc<Buckets>,
    task: PeriodicTask,
}

impl CropRotation {
    /// Create a stopped deduplicator rotating every `config.crop_rotation_period`.
    pub fn new(config: &NetworkConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            buckets: Arc::new(Buckets {
                maps: [DashMap::new(), DashMap::new(), DashMap::new()],
                window: RwLock::new(Window::INITIAL),
                period: ArcSwap::from_pointee(config.sanitized().crop_rotation_period),
            }),
            task: PeriodicTask::new("crop", scheduler),
        }
    }

    /// Apply a new rotation period from the next rotation on.
    pub fn update_config(&self, config: &NetworkConfig) {
        self.buckets
            .period
            .store(Arc::new(config.sanitized().crop_rotation_period));
    }

    /// Rotate immediately on the calling thread.
    pub fn rotate_now(&self) {
        self.buckets.rotate();
    }

    /// True while rotation is armed.
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Rotation counters.
    pub fn stats(&self) -> PeriodicStats {
        self.task.stats()
    }
}

impl Deduplicator for CropRotation {
    fn start(&self) {
        let period_buckets: Weak<Buckets> = Arc::downgrade(&self.buckets);
        let rotate_buckets: Weak<Buckets> = Arc::downgrade(&self.buckets);
        self.task.start(
            move || {
                period_buckets
                    .upgrade()
                    .map(|b| **b.period.load())
                    .unwrap_or_default()
            },
            move |_now| {
                if let Some(buckets) = rotate_buckets.upgrade() {
                    buckets.rotate();
                }
            },
        );
    }

    fn stop(&self) {
        self.task.stop();
        self.clear();
    }

    fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        self.task.set_scheduler(scheduler);
    }

    fn find_previous(&self, key: ExchangeKey, exchange: Arc<Exchange>) -> Option<Arc<Exchange>> {
        let window = self.buckets.window.read();
        let maps = &self.buckets.maps;

        if let Some(previous) = Buckets::insert_if_absent(&maps[window.first], key, &exchange) {
            return Some(previous);
        }
        if window.first == window.second {
            return None;
        }
        Buckets::insert_if_absent(&maps[window.second], key, &exchange)
    }

    fn find(&self, key: &ExchangeKey) -> Option<Arc<Exchange>> {
        let window = self.buckets.window.read();
        let maps = &self.buckets.maps;

        if let Some(found) = maps[window.first].get(key) {
            return Some(Arc::clone(found.value()));
        }
        if window.first == window.second {
            return None;
        }
        maps[window.second].get(key).map(|e| Arc::clone(e.value()))
    }

    fn clear(&self) {
        let _window = self.buckets.window.write();
        for map in &self.buckets.maps {
            map.clear();
        }
    }

    fn len(&self) -> usize {
        // An entry lives in up to two buckets; count distinct keys.
        let window = self.buckets.window.read();
        let maps = &self.buckets.maps;
        let first = maps[window.first].len();
        if window.first == window.second {
            return first;
        }
        first
            + maps[window.second]
                .iter()
                .filter(|e| !maps[window.first].contains_key(e.key()))
                .count()
    }
}
