// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CoAP message model (RFC 7252 Sec.3) as seen by the exchange engine.
//!
//! The byte-level codec lives outside this crate. What the engine needs is
//! the header view of a message (type, code, message id, token, observe
//! option) plus the delivery lifecycle of the requests and responses it
//! keeps around:
//!
//! ```text
//!              set_acknowledged()      -> on_acknowledgement
//!   Response --notify_retransmission() -> on_retransmission
//!   (shared)   set_timed_out()         -> on_timeout
//!              set_rejected()          -> on_reject
//!              cancel()                -> on_cancel
//! ```
//!
//! The reliability layer owns retransmission timing and reports each event
//! through the methods above; observers registered on the response (the
//! observe layer's notification controller) react to them.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Largest value carried by the observe option (24 bits).
pub const OBSERVE_MAX: u32 = (1 << 24) - 1;

/// Message type (RFC 7252 Sec.3, 2-bit T field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Confirmable: retransmitted until acknowledged.
    Con,
    /// Non-confirmable.
    Non,
    /// Acknowledgement.
    Ack,
    /// Reset.
    Rst,
}

/// Message code `c.dd` (RFC 7252 Sec.3, 3-bit class + 5-bit detail).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(u8);

impl Code {
    /// 0.00 Empty
    pub const EMPTY: Code = Code::new(0, 0);
    /// 0.01 GET
    pub const GET: Code = Code::new(0, 1);
    /// 0.02 POST
    pub const POST: Code = Code::new(0, 2);
    /// 0.03 PUT
    pub const PUT: Code = Code::new(0, 3);
    /// 0.04 DELETE
    pub const DELETE: Code = Code::new(0, 4);
    /// 2.04 Changed
    pub const CHANGED: Code = Code::new(2, 4);
    /// 2.05 Content
    pub const CONTENT: Code = Code::new(2, 5);
    /// 4.04 Not Found
    pub const NOT_FOUND: Code = Code::new(4, 4);
    /// 4.05 Method Not Allowed
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    /// 5.00 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    /// 5.03 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

    /// Build a code from class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Self(((class & 0x07) << 5) | (detail & 0x1f))
    }

    /// Raw code byte.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Code class (0 = request/empty, 2 = success, 4 = client error, 5 = server error).
    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Code detail.
    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    /// 0.00
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 0.01 - 0.31
    pub const fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    /// 2.xx - 5.xx
    pub const fn is_response(self) -> bool {
        self.class() >= 2 && self.class() <= 5
    }

    /// 2.xx
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self)
    }
}

/// Header view of one CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// CON / NON / ACK / RST
    pub mtype: MessageType,
    /// Method or response code.
    pub code: Code,
    /// Message id, `None` until the lower layer assigns one.
    pub mid: Option<u16>,
    /// Token (0-8 bytes).
    pub token: Vec<u8>,
    /// Observe option value (RFC 7641), 24 bits.
    pub observe: Option<u32>,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// New message with no id, token, options or payload.
    pub fn new(mtype: MessageType, code: Code) -> Self {
        Self {
            mtype,
            code,
            mid: None,
            token: Vec::new(),
            observe: None,
            payload: Vec::new(),
        }
    }

    /// Empty ACK or RST matching `mid`.
    pub fn empty(mtype: MessageType, mid: u16) -> Self {
        let mut msg = Self::new(mtype, Code::EMPTY);
        msg.mid = Some(mid);
        msg
    }

    /// Empty RST answering `msg`.
    pub fn reset_for(msg: &Message) -> Self {
        Self::empty(MessageType::Rst, msg.mid.unwrap_or_default())
    }

    /// Set the message id.
    #[must_use]
    pub fn with_mid(mut self, mid: u16) -> Self {
        self.mid = Some(mid);
        self
    }

    /// Set the token.
    #[must_use]
    pub fn with_token(mut self, token: &[u8]) -> Self {
        self.token = token.to_vec();
        self
    }

    /// Set the observe option.
    #[must_use]
    pub fn with_observe(mut self, observe: u32) -> Self {
        self.observe = Some(observe & OBSERVE_MAX);
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// True for 0.00 messages (ping, ACK, RST).
    pub fn is_empty_message(&self) -> bool {
        self.code.is_empty()
    }

    /// Observe=0 on a request means "register" (RFC 7641 Sec.2).
    pub fn is_observe_register(&self) -> bool {
        self.code.is_request() && self.observe == Some(0)
    }

    /// Observe=1 on a request means "deregister".
    pub fn is_observe_cancel(&self) -> bool {
        self.code.is_request() && self.observe == Some(1)
    }
}

// ============================================================================
// Lifecycle: requests
// ============================================================================

/// A request kept by an exchange, with its delivery flags.
#[derive(Debug)]
pub struct Request {
    message: Mutex<Message>,
    acknowledged: AtomicBool,
    canceled: AtomicBool,
}

impl Request {
    /// Wrap a request message.
    pub fn new(message: Message) -> Self {
        Self {
            message: Mutex::new(message),
            acknowledged: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
        }
    }

    /// Snapshot of the message.
    pub fn message(&self) -> Message {
        self.message.lock().clone()
    }

    /// Message type.
    pub fn mtype(&self) -> MessageType {
        self.message.lock().mtype
    }

    /// True once an ACK (empty or piggy-backed) was sent or received.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Mark as acknowledged.
    pub fn set_acknowledged(&self) {
        self.acknowledged.store(true, Ordering::Release);
    }

    /// True once the application gave up on this request.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Cancel the request (e.g. the client stopped observing).
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }
}

// ============================================================================
// Lifecycle: responses
// ============================================================================

/// Callbacks for the delivery lifecycle of a [`Response`].
///
/// All methods default to no-ops.
pub trait MessageObserver: Send + Sync {
    /// The peer acknowledged the response.
    fn on_acknowledgement(&self, _response: &Response) {}
    /// The reliability layer is about to retransmit the response.
    fn on_retransmission(&self, _response: &Response) {}
    /// Retransmissions exhausted without acknowledgement.
    fn on_timeout(&self, _response: &Response) {}
    /// The peer answered with RST.
    fn on_reject(&self, _response: &Response) {}
    /// The response was cancelled locally.
    fn on_cancel(&self, _response: &Response) {}
}

/// A response (or notification) travelling down to the reliability layer.
///
/// Shared as `Arc<Response>` between the exchange, the observe relation and
/// the lower layer. Terminal lifecycle events fire their observers once.
pub struct Response {
    message: Mutex<Message>,
    last: AtomicBool,
    acknowledged: AtomicBool,
    rejected: AtomicBool,
    timed_out: AtomicBool,
    canceled: AtomicBool,
    observers: Mutex<Vec<Arc<dyn MessageObserver>>>,
}

impl Response {
    /// Wrap a response message.
    pub fn new(message: Message) -> Self {
        Self {
            message: Mutex::new(message),
            last: AtomicBool::new(true),
            acknowledged: AtomicBool::new(false),
            rejected: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the message.
    pub fn message(&self) -> Message {
        self.message.lock().clone()
    }

    /// Message type.
    pub fn mtype(&self) -> MessageType {
        self.message.lock().mtype
    }

    /// Change the message type.
    pub fn set_type(&self, mtype: MessageType) {
        self.message.lock().mtype = mtype;
    }

    /// Response code.
    pub fn code(&self) -> Code {
        self.message.lock().code
    }

    /// Message id.
    pub fn mid(&self) -> Option<u16> {
        self.message.lock().mid
    }

    /// Forget the message id so the lower layer assigns a fresh one.
    pub fn clear_mid(&self) {
        self.message.lock().mid = None;
    }

    /// Observe option.
    pub fn observe(&self) -> Option<u32> {
        self.message.lock().observe
    }

    /// Set the observe option (masked to 24 bits).
    pub fn set_observe(&self, observe: u32) {
        self.message.lock().observe = Some(observe & OBSERVE_MAX);
    }

    /// False for notifications: more responses follow on the same exchange.
    pub fn is_last(&self) -> bool {
        self.last.load(Ordering::Acquire)
    }

    /// Mark whether this is the final response of its exchange.
    pub fn set_last(&self, last: bool) {
        self.last.store(last, Ordering::Release);
    }

    /// Register a lifecycle observer.
    pub fn add_message_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.lock().push(observer);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Acknowledged by the peer.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Rejected (RST) by the peer.
    pub fn is_rejected(&self) -> bool {
        self.rejected.load(Ordering::Acquire)
    }

    /// Retransmissions exhausted.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Cancelled locally.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// CON that is neither acknowledged, rejected, timed out nor cancelled.
    pub fn is_in_transit(&self) -> bool {
        self.mtype() == MessageType::Con
            && !self.is_acknowledged()
            && !self.is_rejected()
            && !self.is_timed_out()
            && !self.is_canceled()
    }

    /// Reported by the reliability layer when the ACK arrives.
    pub fn set_acknowledged(&self) {
        if !self.acknowledged.swap(true, Ordering::AcqRel) {
            self.fire(|o, r| o.on_acknowledgement(r));
        }
    }

    /// Reported by the reliability layer before each retransmission.
    pub fn notify_retransmission(&self) {
        if self.is_in_transit() {
            self.fire(|o, r| o.on_retransmission(r));
        }
    }

    /// Reported by the reliability layer when retransmissions are exhausted.
    pub fn set_timed_out(&self) {
        if !self.timed_out.swap(true, Ordering::AcqRel) {
            self.fire(|o, r| o.on_timeout(r));
        }
    }

    /// Reported by the reliability layer when an RST matches this response.
    pub fn set_rejected(&self) {
        if !self.rejected.swap(true, Ordering::AcqRel) {
            self.fire(|o, r| o.on_reject(r));
        }
    }

    /// Stop any further retransmission of this response.
    pub fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::AcqRel) {
            self.fire(|o, r| o.on_cancel(r));
        }
    }

    fn fire<F>(&self, f: F)
    where
        F: Fn(&dyn MessageObserver, &Response),
    {
        // Snapshot: observers may register further observers or re-enter.
        let observers: Vec<Arc<dyn MessageObserver>> = self.observers.lock().clone();
        for observer in &observers {
            f(observer.as_ref(), self);
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("message", &*self.message.lock())
            .field("last", &self.is_last())
            .field("acknowledged", &self.is_acknowledged())
            .field("rejected", &self.is_rejected())
            .field("timed_out", &self.is_timed_out())
            .field("canceled", &self.is_canceled())
            .field("observers", &self.observer_count())
            .finish()
    }
}
