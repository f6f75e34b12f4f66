// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::ObserveRelation;
use crate::exchange::Exchange;
use crate::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

/// Endpoints by remote address, shared with the [`ObserveManager`](super::ObserveManager).
pub(crate) type EndpointRegistry = DashMap<SocketAddr, Arc<ObservingEndpoint>>;

/// A remote peer that observes at least one resource.
///
/// Holds at most one relation per resource path. An endpoint created by a
/// manager leaves its registry when its last relation is removed.
#[derive(Debug)]
pub struct ObservingEndpoint {
    address: SocketAddr,
    relations: DashMap<String, Arc<ObserveRelation>>,
    registry: Weak<EndpointRegistry>,
}

impl ObservingEndpoint {
    /// Endpoint for `address` with no relations, not tracked by any manager.
    pub fn new(address: SocketAddr) -> Self {
        Self::with_registry(address, Weak::new())
    }

    pub(crate) fn with_registry(address: SocketAddr, registry: Weak<EndpointRegistry>) -> Self {
        Self {
            address,
            relations: DashMap::new(),
            registry,
        }
    }

    /// Remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Relation on `path` for the registration carried by `exchange`.
    ///
    /// Callers racing with the same exchange all receive the relation
    /// `create` built for it; `create` runs at most once per registration.
    /// A registration on another exchange (a new GET with Observe=0)
    /// replaces the current relation, which is returned second so the
    /// caller can cancel it. `create` must not touch this endpoint's
    /// relations.
    pub fn find_or_replace_relation<F>(
        &self,
        path: &str,
        exchange: &Arc<Exchange>,
        create: F,
    ) -> Result<(Arc<ObserveRelation>, Option<Arc<ObserveRelation>>)>
    where
        F: FnOnce() -> Result<ObserveRelation>,
    {
        match self.relations.entry(path.to_string()) {
            Entry::Occupied(mut e) if !Arc::ptr_eq(e.get().exchange(), exchange) => {
                let relation = Arc::new(create()?);
                let replaced = e.insert(Arc::clone(&relation));
                log::debug!(
                    "[observe] {} re-registered on {}, replacing relation {}",
                    self.address,
                    path,
                    replaced.id()
                );
                Ok((relation, Some(replaced)))
            }
            Entry::Occupied(e) => Ok((Arc::clone(e.get()), None)),
            Entry::Vacant(v) => {
                let relation = Arc::new(create()?);
                v.insert(Arc::clone(&relation));
                log::debug!("[observe] {} now observes {}", self.address, path);
                Ok((relation, None))
            }
        }
    }

    /// Relation on `path`, if any.
    pub fn get_relation(&self, path: &str) -> Option<Arc<ObserveRelation>> {
        self.relations.get(path).map(|e| Arc::clone(e.value()))
    }

    /// Remove `relation` if it is still the one registered for its path.
    pub fn remove_observe_relation(&self, relation: &ObserveRelation) -> bool {
        let removed = self
            .relations
            .remove_if(relation.path(), |_, current| {
                std::ptr::eq(Arc::as_ptr(current), relation)
            })
            .is_some();
        if removed && self.relations.is_empty() {
            self.leave_registry();
        }
        removed
    }

    /// Drop out of the manager's registry if still idle.
    ///
    /// Registration adds relations while holding the registry entry, so the
    /// emptiness check here cannot race with a relation being added.
    pub(crate) fn leave_registry(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let left = registry
            .remove_if(&self.address, |_, current| {
                std::ptr::eq(Arc::as_ptr(current), self) && current.is_empty()
            })
            .is_some();
        if left {
            log::trace!("[observe] {} observes nothing, endpoint removed", self.address);
        }
    }

    /// Point-in-time copy of the relations.
    pub fn relations(&self) -> Vec<Arc<ObserveRelation>> {
        self.relations.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Cancel every relation of this endpoint. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        // Snapshot first: cancel() removes entries from this map.
        let relations = self.relations();
        let mut canceled = 0;
        for relation in relations {
            if relation.cancel() {
                canceled += 1;
            }
        }
        if canceled > 0 {
            log::debug!("[observe] Canceled {} relations of {}", canceled, self.address);
        }
        canceled
    }

    /// Number of relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// True if the endpoint observes nothing.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
