// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # coap-exchange - CoAP message-exchange engine
//!
//! The part of a CoAP stack (RFC 7252 / RFC 7641) that sits between the
//! reliability layer and the resources: it recognises retransmitted
//! requests, keeps observe relations, and delivers notifications with at
//! most one confirmable notification in flight per observer.
//!
//! ## Quick Start
//!
//! ```rust
//! use coap_exchange::{
//!     new_deduplicator, Code, Message, MessageType, NetworkConfig, ManualScheduler,
//!     Outbox, Exchange, Response, ServerMatcher,
//! };
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! struct Discard;
//! impl Outbox for Discard {
//!     fn send_response(&self, _: &Arc<Exchange>, _: Arc<Response>) {}
//!     fn send_empty_message(&self, _: &Arc<Exchange>, _: Message) {}
//! }
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let dedup = new_deduplicator(&NetworkConfig::default(), scheduler.clone());
//! dedup.start();
//!
//! let matcher = ServerMatcher::new(dedup, Arc::new(Discard));
//! let peer: SocketAddr = "192.0.2.7:5683".parse().unwrap();
//! let get = Message::new(MessageType::Con, Code::GET).with_mid(0x1234);
//!
//! let first = matcher.receive_request(peer, get.clone(), scheduler.now()).unwrap();
//! let again = matcher.receive_request(peer, get, scheduler.now()).unwrap();
//! assert!(!first.is_duplicate());
//! assert!(again.is_duplicate());
//! # use coap_exchange::Scheduler;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Resources                                  |
//! |   ObservableResource::changed() -> ObserveLayer::notify_observers   |
//! +---------------------------------------------------------------------+
//! |                       Observe (RFC 7641)                            |
//! |   ObserveManager -> ObservingEndpoint -> ObserveRelation            |
//! |   ObserveLayer: CON/NON mixing, postpone, replace, cancel fan-out   |
//! +---------------------------------------------------------------------+
//! |                       Exchange matching                             |
//! |   ServerMatcher -> Deduplicator (none / mark-and-sweep / crop)      |
//! +---------------------------------------------------------------------+
//! |                  Outbox (reliability + transport)                   |
//! +---------------------------------------------------------------------+
//!            Scheduler: ThreadScheduler (prod) | ManualScheduler (tests)
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Deduplicator`] | Remembers inbound exchanges to detect retransmissions |
//! | [`ServerMatcher`] | Matches requests to exchanges, replays answers to duplicates |
//! | [`ObserveLayer`] | Notification delivery state machine |
//! | [`ObserveNotificationOrderer`] | Observe numbers and freshness checks |
//! | [`NetworkConfig`] | Lifetimes, periods and strategy selection |

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Engine configuration (defaults, builders, YAML loader).
pub mod config;
/// Duplicate detection strategies.
pub mod dedup;
/// Error type and `Result` alias.
pub mod error;
/// Exchange and its deduplication key.
pub mod exchange;
/// Server-side request matching.
pub mod matcher;
/// Message header model and delivery lifecycle.
pub mod message;
/// Resource observation (relations, delivery layer, ordering).
pub mod observe;
/// Hand-off trait for the layers below.
pub mod outbox;
/// Injectable timers and worker pool.
pub mod scheduler;

pub use config::NetworkConfig;
pub use dedup::{
    new_deduplicator, CropRotation, Deduplicator, DeduplicatorKind, NoDeduplicator,
    SweepDeduplicator, SweepStats,
};
pub use error::{Error, Result};
pub use exchange::{Exchange, ExchangeKey, Origin};
pub use matcher::{RequestMatch, ServerMatcher};
pub use message::{Code, Message, MessageObserver, MessageType, Request, Response};
pub use observe::{
    Delivery, ObservableResource, ObserveLayer, ObserveManager, ObserveNotificationOrderer,
    ObserveRelation, ObserveRelationContainer, ObservingEndpoint,
};
pub use outbox::Outbox;
pub use scheduler::{ManualScheduler, PeriodicTask, Scheduler, TaskHandle, ThreadScheduler};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
