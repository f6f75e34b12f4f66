// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observe delivery layer.
//!
//! Sits between resources and the [`Outbox`]. Outbound, it turns responses
//! on an observe exchange into notifications and enforces "at most one CON
//! in flight per relation"; newer notifications replace a queued one.
//! Inbound, it drops stale notifications and rejects notifications for
//! requests the application cancelled.
//!
//! Each relation's delivery state is only touched under that relation's
//! lock. Sending always happens after the lock is released.

use super::relation::DeliveryState;
use super::resource::ObservableResource;
use super::{ObserveRelation, ObservingEndpoint};
use crate::config::NetworkConfig;
use crate::exchange::{Exchange, Origin};
use crate::message::{Message, MessageObserver, MessageType, Response};
use crate::outbox::Outbox;
use crate::scheduler::Scheduler;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Verdict on an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Hand the response to the application.
    Deliver,
    /// The request was cancelled: an RST was sent, drop the response.
    Rejected,
    /// An equal or newer notification was already delivered.
    Stale,
}

/// Observe layer shared by all exchanges of an endpoint.
pub struct ObserveLayer {
    outbox: Arc<dyn Outbox>,
    scheduler: RwLock<Arc<dyn Scheduler>>,
    config: ArcSwap<NetworkConfig>,
}

impl ObserveLayer {
    /// Create the layer.
    pub fn new(
        config: &NetworkConfig,
        outbox: Arc<dyn Outbox>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outbox,
            scheduler: RwLock::new(scheduler),
            config: ArcSwap::from_pointee(config.sanitized()),
        })
    }

    /// Replace the scheduler used for clocks and hand-offs.
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        *self.scheduler.write() = scheduler;
    }

    /// Apply new notification settings.
    pub fn update_config(&self, config: &NetworkConfig) {
        self.config.store(Arc::new(config.sanitized()));
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.read().clone()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Send `response` on `exchange`, applying notification rules if the
    /// exchange carries an observe relation.
    pub fn send_response(self: &Arc<Self>, exchange: &Arc<Exchange>, response: Arc<Response>) {
        let Some(relation) = exchange.relation() else {
            self.transmit(exchange, response);
            return;
        };
        if relation.is_canceled() {
            log::debug!(
                "[observe] Dropping notification {} for canceled relation {}",
                response.code(),
                relation.id()
            );
            return;
        }

        if !relation.is_established() {
            if !response.code().is_success() {
                // Registration refused: plain final response.
                relation.cancel();
                self.transmit(exchange, response);
                return;
            }
            relation.set_established(true);
            if response.observe().is_none() {
                response.set_observe(relation.orderer().next_observe_number());
            }
        }

        let terminal = !response.code().is_success();
        let request = exchange.request();
        if request.is_acknowledged() || request.mtype() == MessageType::Non {
            if terminal {
                response.set_type(MessageType::Con);
                relation.cancel();
            } else {
                let config = self.config.load();
                let confirm = relation.check(
                    self.scheduler().now(),
                    config.notification_check_interval,
                    config.notification_check_interval_count,
                ) || relation.resource().observe_type() == Some(MessageType::Con);
                response.set_type(if confirm {
                    MessageType::Con
                } else {
                    MessageType::Non
                });
            }
        } else {
            // First response to a CON registration: piggy-backed.
            response.set_type(MessageType::Ack);
        }

        response.set_last(false);
        if response.mtype() == MessageType::Con {
            response.add_message_observer(Arc::new(NotificationController::new(
                self, exchange, &relation,
            )));
        }

        {
            let mut delivery = relation.delivery();
            let in_transit = delivery.current().filter(|c| c.is_in_transit()).cloned();
            if let Some(current) = in_transit {
                if let Some(superseded) = delivery.next() {
                    log::trace!(
                        "[observe] Notification {:?} superseded before sending",
                        superseded.observe()
                    );
                }
                log::trace!(
                    "[observe] CON still in transit on relation {}, postponing",
                    relation.id()
                );
                *delivery = DeliveryState::InFlightWithPending {
                    current,
                    next: response,
                };
                return;
            }
            *delivery = if response.mtype() == MessageType::Con {
                DeliveryState::InFlight {
                    current: Arc::clone(&response),
                }
            } else {
                DeliveryState::Idle
            };
        }

        if relation.is_canceled() && !terminal {
            log::debug!(
                "[observe] Relation {} canceled while sending, dropping notification",
                relation.id()
            );
            return;
        }
        self.transmit(exchange, response);
    }

    /// Notify every observer of `resource` with a fresh representation.
    pub fn notify_observers<R: ObservableResource + ?Sized>(self: &Arc<Self>, resource: &R) {
        let relations = resource.relations().snapshot();
        log::trace!(
            "[observe] {} changed, notifying {} observers",
            resource.path(),
            relations.len()
        );
        for relation in relations {
            self.notify(&relation);
        }
    }

    /// Notify one observer with a fresh representation of its resource.
    pub fn notify(self: &Arc<Self>, relation: &Arc<ObserveRelation>) {
        if relation.is_canceled() || !relation.is_established() {
            return;
        }
        let request = relation.exchange().request().message();
        let message = relation.resource().handle_request(&request);
        self.notify_with(relation, message);
    }

    /// Send `message` as the next notification of `relation`.
    ///
    /// Success codes get the next observe number; any other code ends the
    /// relation after delivery.
    pub fn notify_with(self: &Arc<Self>, relation: &Arc<ObserveRelation>, mut message: Message) {
        let exchange = Arc::clone(relation.exchange());
        message.token = exchange.request().message().token;
        message.mid = None;
        message.observe = if message.code.is_success() {
            Some(relation.orderer().next_observe_number())
        } else {
            None
        };
        self.send_response(&exchange, Arc::new(Response::new(message)));
    }

    fn transmit(&self, exchange: &Arc<Exchange>, response: Arc<Response>) {
        if response.mtype() == MessageType::Ack {
            exchange.request().set_acknowledged();
        }
        exchange.set_current_response(Arc::clone(&response));
        self.outbox.send_response(exchange, response);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Decide what to do with a response received on a local exchange.
    pub fn receive_response(&self, exchange: &Arc<Exchange>, response: &Message) -> Delivery {
        let Some(number) = response.observe else {
            return Delivery::Deliver;
        };
        if exchange.request().is_canceled() {
            log::debug!(
                "[observe] Rejecting notification {} for canceled request",
                number
            );
            self.outbox
                .send_empty_message(exchange, Message::reset_for(response));
            return Delivery::Rejected;
        }

        let max_age = self.config.load().notification_max_age;
        if exchange
            .orderer()
            .is_new(number, self.scheduler().now(), max_age)
        {
            Delivery::Deliver
        } else {
            Delivery::Stale
        }
    }

    /// Handle an empty message matched to `exchange`.
    ///
    /// An RST from the observer ends its relation.
    pub fn receive_empty_message(&self, exchange: &Arc<Exchange>, message: &Message) {
        if message.mtype != MessageType::Rst || exchange.origin() != Origin::Remote {
            return;
        }
        if let Some(relation) = exchange.relation() {
            log::debug!(
                "[observe] RST from {}, canceling relation {}",
                relation.source(),
                relation.id()
            );
            relation.cancel();
        }
    }
}

// ============================================================================
// Delivery events of confirmable notifications
// ============================================================================

/// Reacts to the lifecycle of one confirmable notification.
#[derive(Clone)]
struct NotificationController {
    layer: Weak<ObserveLayer>,
    exchange: Weak<Exchange>,
    relation: Weak<ObserveRelation>,
    endpoint: Weak<ObservingEndpoint>,
}

impl NotificationController {
    fn new(
        layer: &Arc<ObserveLayer>,
        exchange: &Arc<Exchange>,
        relation: &Arc<ObserveRelation>,
    ) -> Self {
        Self {
            layer: Arc::downgrade(layer),
            exchange: Arc::downgrade(exchange),
            relation: Arc::downgrade(relation),
            endpoint: Arc::downgrade(relation.endpoint()),
        }
    }
}

fn is_same(current: &Arc<Response>, response: &Response) -> bool {
    std::ptr::eq(Arc::as_ptr(current), response)
}

impl MessageObserver for NotificationController {
    fn on_acknowledgement(&self, response: &Response) {
        let Some(relation) = self.relation.upgrade() else {
            return;
        };
        let promoted = {
            let mut delivery = relation.delivery();
            match std::mem::take(&mut *delivery) {
                DeliveryState::InFlight { current } if is_same(&current, response) => None,
                DeliveryState::InFlightWithPending { current, next }
                    if is_same(&current, response) =>
                {
                    if next.mtype() == MessageType::Con {
                        *delivery = DeliveryState::InFlight {
                            current: Arc::clone(&next),
                        };
                    }
                    Some(next)
                }
                other => {
                    *delivery = other;
                    None
                }
            }
        };

        let Some(next) = promoted else { return };
        next.clear_mid();
        if relation.is_canceled() && next.code().is_success() {
            return;
        }
        if let (Some(layer), Some(exchange)) = (self.layer.upgrade(), self.exchange.upgrade()) {
            log::trace!("[observe] Sending postponed notification {:?}", next.observe());
            layer.transmit(&exchange, next);
        }
    }

    fn on_retransmission(&self, response: &Response) {
        let Some(relation) = self.relation.upgrade() else {
            return;
        };
        let replacement = {
            let mut delivery = relation.delivery();
            match std::mem::take(&mut *delivery) {
                DeliveryState::InFlightWithPending { current, next }
                    if is_same(&current, response) =>
                {
                    if next.mtype() != MessageType::Con {
                        next.set_type(MessageType::Con);
                        next.add_message_observer(Arc::new(self.clone()));
                    }
                    *delivery = DeliveryState::InFlight {
                        current: Arc::clone(&next),
                    };
                    Some(next)
                }
                other => {
                    *delivery = other;
                    None
                }
            }
        };

        let Some(next) = replacement else { return };
        // Retransmit the newest state instead of the outdated one.
        response.cancel();
        let (Some(layer), Some(exchange)) = (self.layer.upgrade(), self.exchange.upgrade()) else {
            return;
        };
        let sender = Arc::clone(&layer);
        let result = layer
            .scheduler()
            .execute(Box::new(move || sender.transmit(&exchange, next)));
        if let Err(e) = result {
            log::warn!("[observe] Failed to hand off replacement notification: {}", e);
        }
    }

    fn on_timeout(&self, _response: &Response) {
        if let Some(relation) = self.relation.upgrade() {
            log::debug!(
                "[observe] Notification to {} timed out, canceling all its relations",
                relation.source()
            );
            relation.cancel_all();
        } else if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.cancel_all();
        }
    }

    fn on_reject(&self, _response: &Response) {
        if let Some(relation) = self.relation.upgrade() {
            relation.cancel();
        }
    }
}
