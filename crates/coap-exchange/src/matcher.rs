// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side matching of inbound messages to exchanges.
//!
//! ```text
//! request ──> find_previous(key) ──┬── absent ──> RequestMatch::New       (dispatch)
//!                                  └── present ─> replay answer,
//!                                                 RequestMatch::Duplicate (drop)
//! ```

use crate::dedup::Deduplicator;
use crate::exchange::{Exchange, ExchangeKey, Origin};
use crate::message::{Message, Request};
use crate::outbox::Outbox;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of [`ServerMatcher::receive_request`].
#[derive(Debug, Clone)]
pub enum RequestMatch {
    /// First sight of this request: process it.
    New(Arc<Exchange>),
    /// Retransmission of a known request: already answered or in progress.
    Duplicate(Arc<Exchange>),
}

impl RequestMatch {
    /// The exchange, new or existing.
    pub fn exchange(&self) -> &Arc<Exchange> {
        match self {
            Self::New(exchange) | Self::Duplicate(exchange) => exchange,
        }
    }

    /// True for a retransmitted request.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Correlates requests from remote peers with their exchanges.
pub struct ServerMatcher {
    deduplicator: Arc<dyn Deduplicator>,
    outbox: Arc<dyn Outbox>,
}

impl ServerMatcher {
    /// Matcher storing exchanges in `deduplicator` and replaying through `outbox`.
    pub fn new(deduplicator: Arc<dyn Deduplicator>, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            deduplicator,
            outbox,
        }
    }

    /// Underlying deduplicator.
    pub fn deduplicator(&self) -> &Arc<dyn Deduplicator> {
        &self.deduplicator
    }

    /// Match a request from `source` received at `now`.
    ///
    /// Duplicates are answered again with whatever was last sent for the
    /// original (response, else empty ACK) and must not be processed.
    pub fn receive_request(
        &self,
        source: SocketAddr,
        message: Message,
        now: Instant,
    ) -> Result<RequestMatch> {
        let mid = message.mid.ok_or_else(|| {
            Error::InvalidArgument(format!("request from {} has no message id", source))
        })?;
        let key = ExchangeKey::new(source, mid);
        let exchange = Arc::new(Exchange::new(key, Origin::Remote, Request::new(message), now));

        let Some(previous) = self.deduplicator.find_previous(key, Arc::clone(&exchange)) else {
            return Ok(RequestMatch::New(exchange));
        };

        log::debug!("[matcher] Duplicate request {}", key);
        if let Some(response) = previous.current_response() {
            log::trace!("[matcher] Replaying response {} for {}", response.code(), key);
            self.outbox.send_response(&previous, response);
        } else if let Some(ack) = previous.empty_ack() {
            log::trace!("[matcher] Replaying empty ACK for {}", key);
            self.outbox.send_empty_message(&previous, ack);
        } else {
            log::trace!("[matcher] {} still being processed", key);
        }
        Ok(RequestMatch::Duplicate(previous))
    }

    /// Find the exchange an empty ACK or RST from `source` refers to.
    pub fn receive_empty_message(
        &self,
        source: SocketAddr,
        message: &Message,
    ) -> Option<Arc<Exchange>> {
        let mid = message.mid?;
        let found = self.deduplicator.find(&ExchangeKey::new(source, mid));
        if found.is_none() {
            log::trace!(
                "[matcher] No exchange for empty message {} from {}",
                mid,
                source
            );
        }
        found
    }

    /// Mark `exchange` complete. It stays in the deduplicator so late
    /// retransmissions are still answered.
    pub fn exchange_completed(&self, exchange: &Arc<Exchange>) {
        if exchange.set_complete() {
            log::trace!("[matcher] Completed {}", exchange.remote_key());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::dedup::{NoDeduplicator, SweepDeduplicator};
    use crate::message::{Code, MessageType, Response};
    use crate::scheduler::ManualScheduler;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingOutbox {
        responses: Mutex<Vec<Code>>,
        empties: Mutex<Vec<Message>>,
    }

    impl Outbox for RecordingOutbox {
        fn send_response(&self, _exchange: &Arc<Exchange>, response: Arc<Response>) {
            self.responses.lock().push(response.code());
        }
        fn send_empty_message(&self, _exchange: &Arc<Exchange>, message: Message) {
            self.empties.lock().push(message);
        }
    }

    fn setup() -> (ServerMatcher, Arc<RecordingOutbox>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let dedup = Arc::new(SweepDeduplicator::new(&NetworkConfig::default(), scheduler));
        let outbox = Arc::new(RecordingOutbox::default());
        (ServerMatcher::new(dedup, outbox.clone()), outbox)
    }

    fn source() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], 40_000))
    }

    fn get(mid: u16) -> Message {
        Message::new(MessageType::Con, Code::GET).with_mid(mid)
    }

    #[test]
    fn test_new_then_duplicate() {
        let (matcher, outbox) = setup();
        let now = Instant::now();

        let first = matcher.receive_request(source(), get(5), now).expect("match");
        assert!(!first.is_duplicate());

        let second = matcher.receive_request(source(), get(5), now).expect("match");
        assert!(second.is_duplicate());
        assert!(Arc::ptr_eq(first.exchange(), second.exchange()));
        // Nothing sent yet for the original: nothing to replay.
        assert!(outbox.responses.lock().is_empty());
        assert!(outbox.empties.lock().is_empty());
    }

    #[test]
    fn test_duplicate_replays_response() {
        let (matcher, outbox) = setup();
        let now = Instant::now();
        let first = matcher.receive_request(source(), get(6), now).expect("match");
        let response = Response::new(Message::new(MessageType::Ack, Code::CONTENT));
        first.exchange().set_current_response(Arc::new(response));

        matcher.receive_request(source(), get(6), now).expect("match");
        assert_eq!(*outbox.responses.lock(), vec![Code::CONTENT]);
    }

    #[test]
    fn test_duplicate_replays_empty_ack() {
        let (matcher, outbox) = setup();
        let now = Instant::now();
        let first = matcher.receive_request(source(), get(7), now).expect("match");
        first.exchange().set_empty_ack(Message::empty(MessageType::Ack, 7));

        matcher.receive_request(source(), get(7), now).expect("match");
        let empties = outbox.empties.lock();
        assert_eq!(empties.len(), 1);
        assert_eq!(empties[0].mtype, MessageType::Ack);
        assert_eq!(empties[0].mid, Some(7));
    }

    #[test]
    fn test_missing_mid_rejected() {
        let (matcher, _) = setup();
        let message = Message::new(MessageType::Con, Code::GET);
        assert!(matches!(
            matcher.receive_request(source(), message, Instant::now()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_message_lookup() {
        let (matcher, _) = setup();
        let first = matcher
            .receive_request(source(), get(8), Instant::now())
            .expect("match");

        let rst = Message::empty(MessageType::Rst, 8);
        let found = matcher.receive_empty_message(source(), &rst).expect("found");
        assert!(Arc::ptr_eq(&found, first.exchange()));
        let unknown = Message::empty(MessageType::Rst, 9);
        assert!(matcher.receive_empty_message(source(), &unknown).is_none());
    }

    #[test]
    fn test_completed_exchange_still_deduplicated() {
        let (matcher, _) = setup();
        let now = Instant::now();
        let first = matcher.receive_request(source(), get(9), now).expect("match");
        matcher.exchange_completed(first.exchange());
        assert!(first.exchange().is_complete());
        let again = matcher.receive_request(source(), get(9), now).expect("match");
        assert!(again.is_duplicate());
    }

    #[test]
    fn test_no_deduplicator_never_matches() {
        let outbox = Arc::new(RecordingOutbox::default());
        let matcher = ServerMatcher::new(Arc::new(NoDeduplicator), outbox);
        let now = Instant::now();
        matcher.receive_request(source(), get(1), now).expect("match");
        let again = matcher.receive_request(source(), get(1), now).expect("match");
        assert!(!again.is_duplicate());
    }
}
