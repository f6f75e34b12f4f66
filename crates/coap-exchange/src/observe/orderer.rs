// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observe sequence numbers and notification freshness (RFC 7641 Sec.3.4).
//!
//! Producer side: [`ObserveNotificationOrderer::next_observe_number`] hands
//! out 24-bit numbers in `[1, 2^24)`, wrapping back to 1.
//!
//! Consumer side: [`ObserveNotificationOrderer::is_new`] decides whether an
//! incoming notification supersedes the last accepted one:
//!
//! ```text
//! (V1 < V2 && V2 - V1 < 2^23) ||
//! (V1 > V2 && V1 - V2 > 2^23) ||
//! (T2 > T1 + max_age)
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Observe numbers live in `[0, 2^24)`.
pub const OBSERVE_NUMBER_LIMIT: u32 = 1 << 24;

/// Half of the number space: the reordering window.
const HALF_WINDOW: u32 = 1 << 23;

/// Sequence number generator and freshness arbiter for one relation.
///
/// Any 24-bit value, `0` included, is a valid V1 once accepted; an orderer
/// that has not accepted anything yet takes the first notification as is.
#[derive(Debug)]
pub struct ObserveNotificationOrderer {
    number: AtomicU32,
    // Guards the freshness decision; holds T1, `None` until the first accept.
    timestamp: Mutex<Option<Instant>>,
}

impl Default for ObserveNotificationOrderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserveNotificationOrderer {
    /// New orderer with no number issued or accepted.
    pub fn new() -> Self {
        Self {
            number: AtomicU32::new(0),
            timestamp: Mutex::new(None),
        }
    }

    /// Orderer whose last number is `number` (masked to 24 bits), accepted at `timestamp`.
    pub fn starting_at(number: u32, timestamp: Instant) -> Self {
        Self {
            number: AtomicU32::new(number % OBSERVE_NUMBER_LIMIT),
            timestamp: Mutex::new(Some(timestamp)),
        }
    }

    /// Next observe number, always in `[1, 2^24)`.
    ///
    /// Lock-free: a CAS loop increments the counter and, when the increment
    /// would reach `2^24`, swaps it back so the result restarts at 1.
    pub fn next_observe_number(&self) -> u32 {
        let previous = self
            .number
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(successor(n)))
            .unwrap_or_else(|n| n);
        successor(previous)
    }

    /// Last number issued or accepted.
    pub fn current(&self) -> u32 {
        self.number.load(Ordering::Acquire)
    }

    /// Time of the last accepted notification, `None` before the first.
    pub fn last_accepted_at(&self) -> Option<Instant> {
        *self.timestamp.lock()
    }

    /// Accept `candidate` received at `now` if it is newer than the last one.
    ///
    /// On acceptance V1/T1 become `candidate`/`now`. Serialized per orderer:
    /// two concurrent deliveries never both win against the same V1.
    pub fn is_new(&self, candidate: u32, now: Instant, max_age: Duration) -> bool {
        let candidate = candidate % OBSERVE_NUMBER_LIMIT;
        let mut t1 = self.timestamp.lock();
        let v1 = self.number.load(Ordering::Acquire);

        let fresh = match *t1 {
            None => true,
            Some(t1) => is_newer(v1, candidate) || now > t1 + max_age,
        };
        if fresh {
            *t1 = Some(now);
            self.number.store(candidate, Ordering::Release);
        } else {
            log::trace!(
                "[observe] Dropping stale notification {} (last {})",
                candidate,
                v1
            );
        }
        fresh
    }
}

fn successor(n: u32) -> u32 {
    let next = n.wrapping_add(1);
    if next >= OBSERVE_NUMBER_LIMIT || next == 0 {
        1
    } else {
        next
    }
}

/// 24-bit circular comparison, `v2` strictly after `v1`.
fn is_newer(v1: u32, v2: u32) -> bool {
    (v1 < v2 && v2 - v1 < HALF_WINDOW) || (v1 > v2 && v1 - v2 > HALF_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    const MAX_AGE: Duration = Duration::from_secs(128);

    #[test]
    fn test_first_number_is_one() {
        let orderer = ObserveNotificationOrderer::new();
        assert_eq!(orderer.next_observe_number(), 1);
        assert_eq!(orderer.next_observe_number(), 2);
        assert_eq!(orderer.current(), 2);
    }

    #[test]
    fn test_wraps_to_one() {
        let orderer = ObserveNotificationOrderer::starting_at(OBSERVE_NUMBER_LIMIT - 2, Instant::now());
        assert_eq!(orderer.next_observe_number(), OBSERVE_NUMBER_LIMIT - 1);
        assert_eq!(orderer.next_observe_number(), 1);
        assert_eq!(orderer.next_observe_number(), 2);
    }

    #[test]
    fn test_monotonic_100k_with_single_wrap() {
        let start = OBSERVE_NUMBER_LIMIT - 50_000;
        let orderer = ObserveNotificationOrderer::starting_at(start, Instant::now());
        let mut previous = start;
        let mut wraps = 0;
        let mut seen = HashSet::new();

        for _ in 0..100_000 {
            let n = orderer.next_observe_number();
            assert!(n >= 1 && n < OBSERVE_NUMBER_LIMIT);
            if n < previous {
                assert_eq!(previous, OBSERVE_NUMBER_LIMIT - 1);
                assert_eq!(n, 1);
                wraps += 1;
            } else {
                assert_eq!(n, previous + 1);
            }
            assert!(seen.insert(n), "number {} repeated", n);
            previous = n;
        }

        assert_eq!(wraps, 1);
    }

    #[test]
    fn test_concurrent_numbers_unique() {
        let orderer = Arc::new(ObserveNotificationOrderer::starting_at(
            OBSERVE_NUMBER_LIMIT - 1_000,
            Instant::now(),
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let o = Arc::clone(&orderer);
                thread::spawn(move || (0..500).map(|_| o.next_observe_number()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for n in handle.join().expect("thread should complete") {
                assert!(n >= 1 && n < OBSERVE_NUMBER_LIMIT);
                assert!(seen.insert(n), "number {} issued twice", n);
            }
        }
        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn test_is_new_adjacent_accepted() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::starting_at(10, t0);
        assert!(orderer.is_new(11, t0 + Duration::from_millis(1), MAX_AGE));
        assert_eq!(orderer.current(), 11);
    }

    #[test]
    fn test_is_new_older_rejected() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::starting_at(10, t0);
        assert!(!orderer.is_new(5, t0 + Duration::from_millis(1), MAX_AGE));
        assert_eq!(orderer.current(), 10);
        assert_eq!(orderer.last_accepted_at(), Some(t0));
    }

    #[test]
    fn test_is_new_max_age_escape() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::starting_at(10, t0);
        let late = t0 + MAX_AGE + Duration::from_millis(1);
        assert!(orderer.is_new(5, late, MAX_AGE));
        assert_eq!(orderer.current(), 5);
        assert_eq!(orderer.last_accepted_at(), Some(late));
    }

    #[test]
    fn test_is_new_across_wrap() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::starting_at(OBSERVE_NUMBER_LIMIT - 3, t0);
        assert!(orderer.is_new(2, t0, MAX_AGE));
        assert!(!orderer.is_new(OBSERVE_NUMBER_LIMIT - 1, t0, MAX_AGE));
    }

    #[test]
    fn test_is_new_duplicate_rejected() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::starting_at(42, t0);
        assert!(!orderer.is_new(42, t0 + Duration::from_secs(1), MAX_AGE));
    }

    #[test]
    fn test_unset_accepts_first() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::new();
        assert_eq!(orderer.last_accepted_at(), None);
        assert!(orderer.is_new(HALF_WINDOW + 5, t0, MAX_AGE));
        assert_eq!(orderer.last_accepted_at(), Some(t0));
    }

    #[test]
    fn test_accepted_zero_still_orders() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::new();
        assert!(orderer.is_new(OBSERVE_NUMBER_LIMIT - 6, t0, MAX_AGE));
        // Peer counter wrapped to 0.
        assert!(orderer.is_new(0, t0, MAX_AGE));
        assert_eq!(orderer.current(), 0);
        assert!(!orderer.is_new(OBSERVE_NUMBER_LIMIT - 16, t0, MAX_AGE));
        assert!(!orderer.is_new(0, t0, MAX_AGE));
        assert!(orderer.is_new(1, t0, MAX_AGE));
    }

    #[test]
    fn test_first_notification_zero_then_older_rejected() {
        let t0 = Instant::now();
        let orderer = ObserveNotificationOrderer::new();
        assert!(orderer.is_new(0, t0, MAX_AGE));
        assert!(!orderer.is_new(OBSERVE_NUMBER_LIMIT - 1, t0, MAX_AGE));
        assert!(orderer.is_new(1, t0, MAX_AGE));
    }

    #[test]
    fn test_concurrent_is_new_single_winner() {
        let t0 = Instant::now();
        let orderer = Arc::new(ObserveNotificationOrderer::starting_at(100, t0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let o = Arc::clone(&orderer);
                thread::spawn(move || o.is_new(101, t0, MAX_AGE))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread should complete"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
