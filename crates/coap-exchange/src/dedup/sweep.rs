// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mark-and-sweep deduplicator.
//!
//! One concurrent map holds every exchange. Every `mark_and_sweep_interval`
//! a sweep walks the map and evicts exchanges older than
//! `exchange_lifetime`. Exchanges that carry a live observe relation are
//! kept: the registration stays answerable for as long as it is observed.

use super::Deduplicator;
use crate::config::NetworkConfig;
use crate::exchange::{Exchange, ExchangeKey};
use crate::scheduler::{PeriodicTask, Scheduler};
use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct SweepSettings {
    lifetime: Duration,
    interval: Duration,
}

impl SweepSettings {
    fn from_config(config: &NetworkConfig) -> Self {
        let config = config.sanitized();
        Self {
            lifetime: config.exchange_lifetime,
            interval: config.mark_and_sweep_interval,
        }
    }
}

/// Sweep counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Completed sweeps.
    pub sweeps: u64,
    /// Exchanges evicted since creation.
    pub evicted: u64,
    /// Sweeps that panicked.
    pub panics: u64,
    /// Times the next sweep could not be scheduled.
    pub schedule_failures: u64,
}

struct SweepTable {
    incoming: DashMap<ExchangeKey, Arc<Exchange>>,
    settings: ArcSwap<SweepSettings>,
    evicted: AtomicU64,
}

impl SweepTable {
    fn sweep(&self, now: Instant) {
        let lifetime = self.settings.load().lifetime;
        let before = self.incoming.len();

        self.incoming.retain(|key, exchange| {
            if exchange.age(now) <= lifetime {
                return true;
            }
            // Only the exchange a live relation notifies on is kept.
            if exchange
                .relation()
                .is_some_and(|r| !r.is_canceled() && Arc::ptr_eq(r.exchange(), exchange))
            {
                return true;
            }
            log::trace!("[sweep] Evicting {}", key);
            false
        });

        let evicted = before.saturating_sub(self.incoming.len());
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            log::debug!(
                "[sweep] Evicted {} exchanges, {} remaining",
                evicted,
                self.incoming.len()
            );
        }
    }
}

/// Deduplicator backed by a single map and a periodic sweep.
pub struct SweepDeduplicator {
    table: Arc<SweepTable>,
    task: PeriodicTask,
}

impl SweepDeduplicator {
    /// Create a stopped deduplicator using `config`'s lifetime and interval.
    pub fn new(config: &NetworkConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            table: Arc::new(SweepTable {
                incoming: DashMap::new(),
                settings: ArcSwap::from_pointee(SweepSettings::from_config(config)),
                evicted: AtomicU64::new(0),
            }),
            task: PeriodicTask::new("sweep", scheduler),
        }
    }

    /// Apply new lifetime and interval; both take effect from the next run.
    pub fn update_config(&self, config: &NetworkConfig) {
        self.table
            .settings
            .store(Arc::new(SweepSettings::from_config(config)));
    }

    /// Run one sweep immediately on the calling thread.
    pub fn sweep_now(&self) {
        self.table.sweep(self.task.scheduler().now());
    }

    /// True while the periodic sweep is armed.
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Sweep counters.
    pub fn stats(&self) -> SweepStats {
        let periodic = self.task.stats();
        SweepStats {
            sweeps: periodic.runs,
            evicted: self.table.evicted.load(Ordering::Relaxed),
            panics: periodic.panics,
            schedule_failures: periodic.schedule_failures,
        }
    }
}

impl Deduplicator for SweepDeduplicator {
    fn start(&self) {
        let period_table: Weak<SweepTable> = Arc::downgrade(&self.table);
        let sweep_table: Weak<SweepTable> = Arc::downgrade(&self.table);
        self.task.start(
            move || {
                period_table
                    .upgrade()
                    .map(|t| t.settings.load().interval)
                    .unwrap_or_default()
            },
            move |now| {
                if let Some(table) = sweep_table.upgrade() {
                    table.sweep(now);
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
        match self.table.incoming.entry(key) {
            Entry::Occupied(e) => Some(Arc::clone(e.get())),
            Entry::Vacant(v) => {
                v.insert(exchange);
                None
            }
        }
    }

    fn find(&self, key: &ExchangeKey) -> Option<Arc<Exchange>> {
        self.table.incoming.get(key).map(|e| Arc::clone(e.value()))
    }

    fn clear(&self) {
        self.table.incoming.clear();
    }

    fn len(&self) -> usize {
        self.table.incoming.len()
    }
}
