// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One observer of one resource.
//!
//! Delivery state (at most one confirmable notification in flight):
//!
//! ```text
//!            send CON                     send while in transit
//!   Idle  ------------->  InFlight  ----------------------------->  InFlightWithPending
//!    ^                     |    ^                                    |   |   (newer send
//!    |   ack/timeout/      |    |  ack: promote `next`               |   |    replaces `next`)
//!    +---- reject ---------+    +------------------------------------+   |
//!                                  retransmission: cancel current,       |
//!                                  send `next` as CON  <-----------------+
//! ```

use super::resource::ObservableResource;
use super::{ObserveNotificationOrderer, ObservingEndpoint};
use crate::exchange::Exchange;
use crate::message::Response;
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_RELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Confirmable-notification bookkeeping of a relation.
#[derive(Debug, Default)]
pub enum DeliveryState {
    /// No confirmable notification in flight.
    #[default]
    Idle,
    /// `current` is a CON awaiting its ACK.
    InFlight {
        /// Notification in flight.
        current: Arc<Response>,
    },
    /// `current` is in flight; `next` waits for it to settle.
    InFlightWithPending {
        /// Notification in flight.
        current: Arc<Response>,
        /// Newest notification, replaced by every newer one.
        next: Arc<Response>,
    },
}

impl DeliveryState {
    /// Notification in flight, if any.
    pub fn current(&self) -> Option<&Arc<Response>> {
        match self {
            Self::Idle => None,
            Self::InFlight { current } | Self::InFlightWithPending { current, .. } => Some(current),
        }
    }

    /// Queued notification, if any.
    pub fn next(&self) -> Option<&Arc<Response>> {
        match self {
            Self::InFlightWithPending { next, .. } => Some(next),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct CheckState {
    interval_start: Instant,
    count: u32,
}

/// Relation between a remote endpoint and an observed resource.
///
/// Owned jointly by the endpoint and the resource; both drop it on
/// [`cancel`](Self::cancel).
pub struct ObserveRelation {
    id: u64,
    endpoint: Arc<ObservingEndpoint>,
    resource: Arc<dyn ObservableResource>,
    path: String,
    exchange: Arc<Exchange>,
    orderer: ObserveNotificationOrderer,
    established: AtomicBool,
    canceled: AtomicBool,
    delivery: Mutex<DeliveryState>,
    check: Mutex<CheckState>,
}

impl ObserveRelation {
    /// Relation for `exchange`'s peer observing `resource`.
    ///
    /// Fails if the resource path is empty or the exchange does not come
    /// from `endpoint`.
    pub fn new(
        endpoint: Arc<ObservingEndpoint>,
        resource: Arc<dyn ObservableResource>,
        exchange: Arc<Exchange>,
    ) -> Result<Self> {
        let path = resource.path().to_string();
        if path.is_empty() {
            return Err(Error::InvalidArgument(
                "observed resource has an empty path".to_string(),
            ));
        }
        if exchange.remote_addr() != endpoint.address() {
            return Err(Error::InvalidArgument(format!(
                "exchange from {} registered on endpoint {}",
                exchange.remote_addr(),
                endpoint.address()
            )));
        }

        let now = exchange.timestamp();
        Ok(Self {
            id: NEXT_RELATION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            resource,
            path,
            exchange,
            orderer: ObserveNotificationOrderer::new(),
            established: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            delivery: Mutex::new(DeliveryState::Idle),
            check: Mutex::new(CheckState {
                interval_start: now,
                count: 0,
            }),
        })
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Observing peer.
    pub fn endpoint(&self) -> &Arc<ObservingEndpoint> {
        &self.endpoint
    }

    /// Peer address.
    pub fn source(&self) -> SocketAddr {
        self.endpoint.address()
    }

    /// Observed resource.
    pub fn resource(&self) -> &Arc<dyn ObservableResource> {
        &self.resource
    }

    /// Path of the observed resource.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Exchange of the registering request; carries all notifications.
    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Server-side observe number generator.
    pub fn orderer(&self) -> &ObserveNotificationOrderer {
        &self.orderer
    }

    /// True once the first successful response went out.
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Mark the relation established (or not).
    pub fn set_established(&self, established: bool) {
        self.established.store(established, Ordering::Release);
    }

    /// True once cancelled.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Should the next notification be confirmable?
    ///
    /// True once `interval` has elapsed or every `count` notifications,
    /// whichever comes first, so an observer that vanished is noticed even
    /// when the resource only sends NON notifications.
    pub fn check(&self, now: Instant, interval: Duration, count: u32) -> bool {
        let mut state = self.check.lock();
        state.count += 1;
        let due = now >= state.interval_start + interval || state.count >= count;
        if due {
            state.interval_start = now;
            state.count = 0;
        }
        due
    }

    /// Lock the delivery state.
    pub(crate) fn delivery(&self) -> MutexGuard<'_, DeliveryState> {
        self.delivery.lock()
    }

    /// Confirmable notification in flight.
    pub fn current_notification(&self) -> Option<Arc<Response>> {
        self.delivery.lock().current().cloned()
    }

    /// Notification waiting for the in-flight one to settle.
    pub fn next_notification(&self) -> Option<Arc<Response>> {
        self.delivery.lock().next().cloned()
    }

    /// End the relation.
    ///
    /// Unregisters from resource and endpoint, completes the exchange and
    /// drops any queued notification. Idempotent: returns `true` only for
    /// the call that cancelled.
    pub fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.established.store(false, Ordering::Release);

        {
            // The in-flight CON keeps running; the queued one is never sent.
            let mut delivery = self.delivery.lock();
            *delivery = match std::mem::take(&mut *delivery) {
                DeliveryState::InFlightWithPending { current, .. } => {
                    DeliveryState::InFlight { current }
                }
                other => other,
            };
        }

        self.resource.remove_observe_relation(self);
        self.endpoint.remove_observe_relation(self);
        self.exchange.set_complete();
        log::debug!(
            "[observe] Canceled relation {} of {} on {}",
            self.id,
            self.source(),
            self.path
        );
        true
    }

    /// Cancel every relation of this relation's endpoint, this one included.
    pub fn cancel_all(&self) -> usize {
        let canceled = self.endpoint.cancel_all();
        // Not registered on the endpoint (lost a creation race): still ours to end.
        if self.cancel() {
            canceled + 1
        } else {
            canceled
        }
    }
}

impl fmt::Debug for ObserveRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveRelation")
            .field("id", &self.id)
            .field("source", &self.source())
            .field("path", &self.path)
            .field("established", &self.is_established())
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}
