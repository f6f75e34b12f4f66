// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::Deduplicator;
use crate::exchange::{Exchange, ExchangeKey};
use crate::scheduler::Scheduler;
use std::sync::Arc;

/// Deduplicator that remembers nothing: every request is new.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeduplicator;

impl Deduplicator for NoDeduplicator {
    fn start(&self) {}

    fn stop(&self) {}

    fn set_scheduler(&self, _scheduler: Arc<dyn Scheduler>) {}

    fn find_previous(&self, _key: ExchangeKey, _exchange: Arc<Exchange>) -> Option<Arc<Exchange>> {
        None
    }

    fn find(&self, _key: &ExchangeKey) -> Option<Arc<Exchange>> {
        None
    }

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}
