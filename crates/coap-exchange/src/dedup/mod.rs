// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplicate detection for inbound requests (RFC 7252 Sec.4.5).
//!
//! A deduplicator remembers every exchange opened by a remote peer, keyed by
//! (address, message id), long enough to recognise a retransmission and
//! replay the answer instead of processing the request twice.
//!
//! | Strategy | Retention | Cost |
//! |----------|-----------|------|
//! | [`NoDeduplicator`] | none | zero |
//! | [`SweepDeduplicator`] | exactly `exchange_lifetime` (+ one sweep interval) | full scan per sweep |
//! | [`CropRotation`] | between 1x and 2x `crop_rotation_period` | O(1) rotation |
//!
//! [`new_deduplicator`] picks one from [`NetworkConfig::deduplicator`].

mod crop_rotation;
mod noop;
mod sweep;

pub use crop_rotation::CropRotation;
pub use noop::NoDeduplicator;
pub use sweep::{SweepDeduplicator, SweepStats};

use crate::config::NetworkConfig;
use crate::exchange::{Exchange, ExchangeKey};
use crate::scheduler::Scheduler;
use crate::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Exchange store keyed by remote endpoint and message id.
///
/// All methods are callable from any thread. `find_previous` is the only
/// way entries are added and is atomic per key.
pub trait Deduplicator: Send + Sync {
    /// Arm background maintenance.
    fn start(&self);

    /// Disarm background maintenance and drop all entries.
    ///
    /// Idempotent; safe to call before `start()`.
    fn stop(&self);

    /// Replace the timer source. A running deduplicator moves its schedule
    /// to the new scheduler without running twice.
    fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>);

    /// Store `exchange` under `key` unless the key is already present.
    ///
    /// Returns the exchange previously stored under `key` (the request is a
    /// duplicate), or `None` if `exchange` was stored.
    fn find_previous(&self, key: ExchangeKey, exchange: Arc<Exchange>) -> Option<Arc<Exchange>>;

    /// Look up `key` without inserting.
    fn find(&self, key: &ExchangeKey) -> Option<Arc<Exchange>>;

    /// Drop all entries.
    fn clear(&self);

    /// Number of stored exchanges.
    fn len(&self) -> usize;

    /// True if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deduplication strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeduplicatorKind {
    /// [`SweepDeduplicator`]
    MarkAndSweep,
    /// [`CropRotation`]
    CropRotation,
    /// [`NoDeduplicator`]
    None,
}

impl DeduplicatorKind {
    /// Parse a configuration value (case-insensitive).
    ///
    /// Accepts `mark-and-sweep`, `crop-rotation`, `none` and the legacy
    /// `DEDUPLICATOR_MARK_AND_SWEEP`, `DEDUPLICATOR_CROP_ROTATION`,
    /// `NO_DEDUPLICATOR` spellings.
    pub fn from_config_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mark-and-sweep" | "mark_and_sweep" | "deduplicator_mark_and_sweep" => {
                Some(Self::MarkAndSweep)
            }
            "crop-rotation" | "crop_rotation" | "deduplicator_crop_rotation" => {
                Some(Self::CropRotation)
            }
            "none" | "no_deduplicator" => Some(Self::None),
            _ => None,
        }
    }

    /// Canonical configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkAndSweep => "mark-and-sweep",
            Self::CropRotation => "crop-rotation",
            Self::None => "none",
        }
    }
}

impl FromStr for DeduplicatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_config_str(s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown deduplicator '{}'", s)))
    }
}

impl fmt::Display for DeduplicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the deduplicator named by `config.deduplicator`.
///
/// Unknown names fall back to [`NoDeduplicator`] with a warning. The
/// returned deduplicator is not started.
pub fn new_deduplicator(
    config: &NetworkConfig,
    scheduler: Arc<dyn Scheduler>,
) -> Arc<dyn Deduplicator> {
    match DeduplicatorKind::from_config_str(&config.deduplicator) {
        Some(DeduplicatorKind::MarkAndSweep) => {
            log::debug!("[dedup] Using mark-and-sweep");
            Arc::new(SweepDeduplicator::new(config, scheduler))
        }
        Some(DeduplicatorKind::CropRotation) => {
            log::debug!("[dedup] Using crop rotation");
            Arc::new(CropRotation::new(config, scheduler))
        }
        Some(DeduplicatorKind::None) => Arc::new(NoDeduplicator),
        None => {
            log::warn!(
                "[dedup] Unknown deduplicator '{}', duplicates will not be detected",
                config.deduplicator
            );
            Arc::new(NoDeduplicator)
        }
    }
}
