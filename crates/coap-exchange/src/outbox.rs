// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hand-off to the reliability and transport layers below the engine.

use crate::exchange::Exchange;
use crate::message::{Message, Response};
use std::sync::Arc;

/// Downstream sink for outgoing messages.
///
/// The implementation assigns message ids, runs retransmission for CON
/// messages and reports delivery events on the [`Response`]
/// (`set_acknowledged`, `notify_retransmission`, `set_timed_out`,
/// `set_rejected`). Calls may come from any thread, including from inside
/// those event callbacks, so implementations must not block on them.
pub trait Outbox: Send + Sync {
    /// Send a response or notification on `exchange`.
    fn send_response(&self, exchange: &Arc<Exchange>, response: Arc<Response>);

    /// Send an empty ACK or RST on `exchange`.
    fn send_empty_message(&self, exchange: &Arc<Exchange>, message: Message);
}
