// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exchange: correlation unit for one request and its response(s).
//!
//! An exchange is created by the matcher on first sight of a request and is
//! keyed by [`ExchangeKey`] (remote endpoint + message id) in the
//! deduplicator. Its timestamp is the creation time; nothing refreshes it.
//!
//! For observe registrations the exchange stays alive as long as the
//! relation does and carries every notification sent on it.

use crate::message::{Message, Request, Response};
use crate::observe::{ObserveNotificationOrderer, ObserveRelation};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Deduplication key: remote address, remote port and message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeKey {
    addr: SocketAddr,
    mid: u16,
}

impl ExchangeKey {
    /// Build a key.
    pub const fn new(addr: SocketAddr, mid: u16) -> Self {
        Self { addr, mid }
    }

    /// Remote socket address (IP + port).
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Message id.
    pub const fn mid(&self) -> u16 {
        self.mid
    }
}

impl fmt::Display for ExchangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMID[{}, {}]", self.mid, self.addr)
    }
}

/// Who initiated the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// We sent the request (client side).
    Local,
    /// The peer sent the request (server side).
    Remote,
}

#[derive(Default)]
struct ExchangeState {
    current_response: Option<Arc<Response>>,
    empty_ack: Option<Message>,
    relation: Option<Weak<ObserveRelation>>,
}

/// One logical request/response cycle.
pub struct Exchange {
    remote_key: ExchangeKey,
    origin: Origin,
    timestamp: Instant,
    request: Arc<Request>,
    complete: AtomicBool,
    // Client side: freshness of incoming notifications.
    orderer: ObserveNotificationOrderer,
    state: Mutex<ExchangeState>,
}

impl Exchange {
    /// Create an exchange for `request` first seen at `timestamp`.
    pub fn new(remote_key: ExchangeKey, origin: Origin, request: Request, timestamp: Instant) -> Self {
        Self {
            remote_key,
            origin,
            timestamp,
            request: Arc::new(request),
            complete: AtomicBool::new(false),
            orderer: ObserveNotificationOrderer::new(),
            state: Mutex::new(ExchangeState::default()),
        }
    }

    /// Key of the inbound message that created the exchange.
    pub fn remote_key(&self) -> ExchangeKey {
        self.remote_key
    }

    /// Remote endpoint address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_key.addr()
    }

    /// Local or remote origin.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Creation time.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Time elapsed since creation, measured against `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// The request that opened the exchange.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Client-side notification orderer.
    pub fn orderer(&self) -> &ObserveNotificationOrderer {
        &self.orderer
    }

    /// Last response sent on this exchange.
    pub fn current_response(&self) -> Option<Arc<Response>> {
        self.state.lock().current_response.clone()
    }

    /// Remember the response being sent.
    pub fn set_current_response(&self, response: Arc<Response>) {
        self.state.lock().current_response = Some(response);
    }

    /// Empty ACK sent for the request, if any.
    pub fn empty_ack(&self) -> Option<Message> {
        self.state.lock().empty_ack.clone()
    }

    /// Remember the empty ACK sent for the request and mark it acknowledged.
    pub fn set_empty_ack(&self, ack: Message) {
        self.state.lock().empty_ack = Some(ack);
        self.request.set_acknowledged();
    }

    /// Observe relation established by this exchange, if still alive.
    pub fn relation(&self) -> Option<Arc<ObserveRelation>> {
        self.state.lock().relation.as_ref().and_then(Weak::upgrade)
    }

    /// Attach the observe relation.
    pub fn set_relation(&self, relation: &Arc<ObserveRelation>) {
        self.state.lock().relation = Some(Arc::downgrade(relation));
    }

    /// True if an observe relation was attached, even if since dropped.
    pub fn has_relation(&self) -> bool {
        self.state.lock().relation.is_some()
    }

    /// True once completed.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Mark complete. Returns `true` for the first call only.
    pub fn set_complete(&self) -> bool {
        !self.complete.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("remote_key", &self.remote_key)
            .field("origin", &self.origin)
            .field("complete", &self.is_complete())
            .field("has_relation", &self.has_relation())
            .finish_non_exhaustive()
    }
}
