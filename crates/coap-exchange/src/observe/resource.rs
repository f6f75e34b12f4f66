// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::{ObserveLayer, ObserveRelation, ObserveRelationContainer};
use crate::message::{Code, Message, MessageType};
use std::sync::Arc;

/// A resource that remote endpoints can observe (RFC 7641).
///
/// Implementors provide a path, a relation container and a request handler;
/// everything else has a default.
pub trait ObservableResource: Send + Sync {
    /// Resource path, e.g. `/sensors/temp`. Must not be empty.
    fn path(&self) -> &str;

    /// Relations currently observing this resource.
    fn relations(&self) -> &ObserveRelationContainer;

    /// Produce a response to `request`. Called again for every notification.
    fn handle_request(&self, request: &Message) -> Message;

    /// Message type to force on notifications. `None` lets the observe layer
    /// decide (mostly NON, periodically CON).
    fn observe_type(&self) -> Option<MessageType> {
        None
    }

    /// Start tracking `relation`.
    fn add_observe_relation(&self, relation: Arc<ObserveRelation>) {
        let id = relation.id();
        if self.relations().add(relation) {
            log::trace!("[observe] {} gained relation {}", self.path(), id);
        }
    }

    /// Stop tracking `relation`.
    fn remove_observe_relation(&self, relation: &ObserveRelation) {
        if self.relations().remove(relation) {
            log::trace!("[observe] {} lost relation {}", self.path(), relation.id());
        }
    }

    /// Number of observers.
    fn observer_count(&self) -> usize {
        self.relations().len()
    }

    /// The resource state changed: notify every observer.
    fn changed(&self, layer: &Arc<ObserveLayer>) {
        layer.notify_observers(self);
    }

    /// The resource is gone: send each observer a final 4.04 and end the
    /// relations.
    fn delete(&self, layer: &Arc<ObserveLayer>) {
        for relation in self.relations().snapshot() {
            layer.notify_with(&relation, Message::new(MessageType::Con, Code::NOT_FOUND));
        }
    }

    /// End every relation without notifying the observers.
    fn clear_observe_relations(&self) {
        for relation in self.relations().snapshot() {
            relation.cancel();
        }
    }
}
