// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::ObserveRelation;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent set of the observe relations held by one resource.
#[derive(Debug, Default)]
pub struct ObserveRelationContainer {
    relations: DashMap<u64, Arc<ObserveRelation>>,
}

impl ObserveRelationContainer {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `relation`. Returns `false` if it was already present.
    pub fn add(&self, relation: Arc<ObserveRelation>) -> bool {
        self.relations.insert(relation.id(), relation).is_none()
    }

    /// Remove `relation`. Returns `true` if it was present.
    pub fn remove(&self, relation: &ObserveRelation) -> bool {
        self.relations.remove(&relation.id()).is_some()
    }

    /// True if `relation` is present.
    pub fn contains(&self, relation: &ObserveRelation) -> bool {
        self.relations.contains_key(&relation.id())
    }

    /// Point-in-time copy, safe to iterate while relations come and go.
    pub fn snapshot(&self) -> Vec<Arc<ObserveRelation>> {
        self.relations.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// True if there are no relations.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
