// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource observation (RFC 7641).
//!
//! ```text
//! ObserveManager
//!   └── ObservingEndpoint (per remote address)
//!         └── ObserveRelation (per resource path) ──> ObservableResource
//!                                                       └── ObserveRelationContainer
//! ```
//!
//! A relation is reachable from both its endpoint and its resource and is
//! removed from both when cancelled. [`ObserveLayer`] drives notification
//! delivery; [`ObserveNotificationOrderer`] numbers notifications and
//! filters stale ones on the receiving side.

mod container;
mod endpoint;
mod layer;
mod manager;
mod orderer;
mod relation;
mod resource;

pub use container::ObserveRelationContainer;
pub use endpoint::ObservingEndpoint;
pub use layer::{Delivery, ObserveLayer};
pub use manager::ObserveManager;
pub use orderer::{ObserveNotificationOrderer, OBSERVE_NUMBER_LIMIT};
pub use relation::{DeliveryState, ObserveRelation};
pub use resource::ObservableResource;
