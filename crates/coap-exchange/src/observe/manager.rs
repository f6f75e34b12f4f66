// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::endpoint::EndpointRegistry;
use super::resource::ObservableResource;
use super::{ObserveRelation, ObservingEndpoint};
use crate::exchange::Exchange;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;

/// Registry of observing endpoints, one per remote address.
///
/// An endpoint exists while it observes something: it is created by the
/// first registration of its peer and removed with its last relation.
#[derive(Debug, Default)]
pub struct ObserveManager {
    endpoints: Arc<EndpointRegistry>,
}

impl ObserveManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint for `address`, if it observes anything.
    pub fn get_observing_endpoint(&self, address: SocketAddr) -> Option<Arc<ObservingEndpoint>> {
        self.endpoints.get(&address).map(|e| Arc::clone(e.value()))
    }

    /// Register the peer of `exchange` as an observer of `resource`.
    ///
    /// The request must carry Observe=0. Concurrent registrations on the
    /// same exchange get the same relation. A new registration for a path
    /// the peer already observes replaces the old relation (RFC 7641
    /// Sec.4.1): the old one is cancelled and notifications continue on
    /// the new exchange and token. The relation becomes established when
    /// the first successful response goes out through the observe layer.
    pub fn register(
        &self,
        exchange: &Arc<Exchange>,
        resource: Arc<dyn ObservableResource>,
    ) -> Result<Arc<ObserveRelation>> {
        let request = exchange.request().message();
        if !request.is_observe_register() {
            return Err(Error::InvalidArgument(format!(
                "request {} does not register an observer",
                exchange.remote_key()
            )));
        }

        let address = exchange.remote_addr();
        let (relation, replaced) = {
            // Held until the relation is linked so an idle endpoint cannot
            // leave the registry, and a racing registration cannot replace
            // it, before the resource knows about it.
            let entry = self.endpoints.entry(address).or_insert_with(|| {
                Arc::new(ObservingEndpoint::with_registry(
                    address,
                    Arc::downgrade(&self.endpoints),
                ))
            });
            let endpoint = Arc::clone(entry.value());
            let created = endpoint.find_or_replace_relation(resource.path(), exchange, || {
                ObserveRelation::new(
                    Arc::clone(&endpoint),
                    Arc::clone(&resource),
                    Arc::clone(exchange),
                )
            });
            match created {
                Ok((relation, replaced)) => {
                    resource.add_observe_relation(Arc::clone(&relation));
                    exchange.set_relation(&relation);
                    (relation, replaced)
                }
                Err(e) => {
                    drop(entry);
                    self.endpoints
                        .remove_if(&address, |_, endpoint| endpoint.is_empty());
                    return Err(e);
                }
            }
        };

        // Outside the entry: cancelling touches the registry.
        if let Some(replaced) = replaced {
            replaced.cancel();
        }
        Ok(relation)
    }

    /// Explicit deregistration (GET with Observe=1). Returns `true` if a
    /// relation was cancelled.
    pub fn deregister(&self, address: SocketAddr, path: &str) -> bool {
        self.get_observing_endpoint(address)
            .and_then(|endpoint| endpoint.get_relation(path))
            .is_some_and(|relation| relation.cancel())
    }

    /// Cancel every relation of `address`. Returns how many were cancelled.
    pub fn cancel_all(&self, address: SocketAddr) -> usize {
        self.get_observing_endpoint(address)
            .map_or(0, |endpoint| endpoint.cancel_all())
    }

    /// Number of known endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Total relations across all endpoints.
    pub fn relation_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeKey, Origin};
    use crate::message::{Code, Message, MessageType, Request};
    use crate::observe::ObserveRelationContainer;
    use crate::Error;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Temperature {
        path: &'static str,
        relations: ObserveRelationContainer,
    }

    impl Temperature {
        fn new(path: &'static str) -> Arc<Self> {
            Arc::new(Self {
                path,
                relations: ObserveRelationContainer::new(),
            })
        }
    }

    impl ObservableResource for Temperature {
        fn path(&self) -> &str {
            self.path
        }
        fn relations(&self) -> &ObserveRelationContainer {
            &self.relations
        }
        fn handle_request(&self, _request: &Message) -> Message {
            Message::new(MessageType::Non, Code::CONTENT).with_payload(b"21.5")
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([172, 16, 0, 9], port))
    }

    fn registration(addr: SocketAddr, mid: u16) -> Arc<Exchange> {
        let request = Request::new(
            Message::new(MessageType::Con, Code::GET)
                .with_mid(mid)
                .with_token(&[0xab])
                .with_observe(0),
        );
        Arc::new(Exchange::new(
            ExchangeKey::new(addr, mid),
            Origin::Remote,
            request,
            Instant::now(),
        ))
    }

    #[test]
    fn test_register_links_everything() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        let exchange = registration(peer(5683), 1);

        let relation = manager
            .register(&exchange, resource.clone())
            .expect("registration");

        assert_eq!(relation.path(), "/temp");
        assert_eq!(relation.source(), peer(5683));
        assert!(resource.relations().contains(&relation));
        assert!(exchange.relation().is_some_and(|r| Arc::ptr_eq(&r, &relation)));
        assert_eq!(manager.relation_count(), 1);
    }

    #[test]
    fn test_empty_path_rejected() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("");
        let exchange = registration(peer(5683), 1);

        let result = manager.register(&exchange, resource.clone());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(manager.relation_count(), 0);
        assert_eq!(manager.endpoint_count(), 0);
        assert_eq!(resource.observer_count(), 0);
    }

    #[test]
    fn test_request_without_observe_register_rejected() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        let request = Request::new(Message::new(MessageType::Con, Code::GET).with_mid(4));
        let plain = Arc::new(Exchange::new(
            ExchangeKey::new(peer(5683), 4),
            Origin::Remote,
            request,
            Instant::now(),
        ));

        let result = manager.register(&plain, resource.clone());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!plain.has_relation());
        assert_eq!(manager.endpoint_count(), 0);
        assert_eq!(resource.observer_count(), 0);
    }

    #[test]
    fn test_cancel_unregisters_both_sides() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        let exchange = registration(peer(5683), 1);
        let relation = manager.register(&exchange, resource.clone()).expect("registration");

        assert!(relation.cancel());
        assert!(!relation.cancel());
        assert!(relation.is_canceled());
        assert_eq!(resource.observer_count(), 0);
        assert_eq!(manager.relation_count(), 0);
        assert!(exchange.is_complete());
        assert_eq!(manager.endpoint_count(), 0);
        assert!(manager.get_observing_endpoint(peer(5683)).is_none());
    }

    #[test]
    fn test_endpoint_kept_while_it_observes_something() {
        let manager = ObserveManager::new();
        let temp = Temperature::new("/temp");
        let humidity = Temperature::new("/humidity");
        let a = manager.register(&registration(peer(7), 1), temp).expect("a");
        let b = manager.register(&registration(peer(7), 2), humidity).expect("b");

        a.cancel();
        assert_eq!(manager.endpoint_count(), 1);
        b.cancel();
        assert_eq!(manager.endpoint_count(), 0);

        // The peer can come back.
        let again = manager
            .register(&registration(peer(7), 3), Temperature::new("/temp"))
            .expect("again");
        assert!(!again.is_canceled());
        assert_eq!(manager.endpoint_count(), 1);
    }

    #[test]
    fn test_endpoints_do_not_accumulate() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        for port in 1..=50u16 {
            let relation = manager
                .register(&registration(peer(port), port), resource.clone())
                .expect("registration");
            relation.cancel_all();
        }
        assert_eq!(manager.endpoint_count(), 0);
        assert_eq!(resource.observer_count(), 0);
    }

    #[test]
    fn test_reregistration_replaces_relation() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");

        let exchanges: Vec<_> = (0..5u8)
            .map(|token| {
                let request = Request::new(
                    Message::new(MessageType::Con, Code::GET)
                        .with_mid(u16::from(token))
                        .with_token(&[token])
                        .with_observe(0),
                );
                Arc::new(Exchange::new(
                    ExchangeKey::new(peer(5683), u16::from(token)),
                    Origin::Remote,
                    request,
                    Instant::now(),
                ))
            })
            .collect();
        let relations: Vec<_> = exchanges
            .iter()
            .map(|exchange| manager.register(exchange, resource.clone()).expect("registration"))
            .collect();

        let latest = relations.last().expect("relations");
        assert!(Arc::ptr_eq(latest.exchange(), &exchanges[4]));
        assert_eq!(latest.exchange().request().message().token, vec![4]);
        assert!(relations[..4].iter().all(|r| r.is_canceled()));
        assert!(exchanges[..4].iter().all(|e| e.is_complete()));
        assert!(!latest.is_canceled());

        assert_eq!(manager.relation_count(), 1);
        assert_eq!(resource.observer_count(), 1);
        let endpoint = manager.get_observing_endpoint(peer(5683)).expect("endpoint");
        let current = endpoint.get_relation("/temp").expect("relation");
        assert!(Arc::ptr_eq(&current, latest));
    }

    #[test]
    fn test_register_same_exchange_twice_is_idempotent() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        let exchange = registration(peer(5683), 1);

        let first = manager.register(&exchange, resource.clone()).expect("first");
        let second = manager.register(&exchange, resource.clone()).expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_canceled());
        assert_eq!(resource.observer_count(), 1);
    }

    #[test]
    fn test_cancel_all_spans_resources_of_one_endpoint() {
        let manager = ObserveManager::new();
        let temp = Temperature::new("/temp");
        let humidity = Temperature::new("/humidity");
        let other = Temperature::new("/temp");

        let a = manager.register(&registration(peer(1), 1), temp.clone()).expect("a");
        let b = manager.register(&registration(peer(1), 2), humidity.clone()).expect("b");
        let c = manager.register(&registration(peer(2), 3), other.clone()).expect("c");

        assert_eq!(a.cancel_all(), 2);
        assert!(a.is_canceled() && b.is_canceled());
        assert!(!c.is_canceled());
        assert_eq!(temp.observer_count() + humidity.observer_count(), 0);
        assert_eq!(other.observer_count(), 1);
    }

    #[test]
    fn test_deregister() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        manager.register(&registration(peer(5683), 1), resource.clone()).expect("registration");

        assert!(!manager.deregister(peer(5683), "/other"));
        assert!(manager.deregister(peer(5683), "/temp"));
        assert!(!manager.deregister(peer(5683), "/temp"));
    }

    #[test]
    fn test_concurrent_registration_yields_one_relation() {
        let manager = Arc::new(ObserveManager::new());
        let resource = Temperature::new("/temp");
        let exchange = registration(peer(5683), 100);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                let r: Arc<dyn ObservableResource> = resource.clone();
                let e = Arc::clone(&exchange);
                thread::spawn(move || m.register(&e, r).expect("registration"))
            })
            .collect();

        let relations: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should complete"))
            .collect();

        for relation in &relations[1..] {
            assert!(Arc::ptr_eq(relation, &relations[0]));
        }
        assert_eq!(manager.endpoint_count(), 1);
        assert_eq!(manager.relation_count(), 1);
        assert_eq!(resource.observer_count(), 1);
        assert!(!relations[0].is_canceled());
    }

    #[test]
    fn test_concurrent_reregistrations_leave_one_live_relation() {
        let manager = Arc::new(ObserveManager::new());
        let resource = Temperature::new("/temp");

        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let m = Arc::clone(&manager);
                let r: Arc<dyn ObservableResource> = resource.clone();
                thread::spawn(move || {
                    m.register(&registration(peer(5683), 200 + i), r)
                        .expect("registration")
                })
            })
            .collect();

        let relations: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should complete"))
            .collect();

        assert_eq!(relations.iter().filter(|r| !r.is_canceled()).count(), 1);
        assert_eq!(manager.endpoint_count(), 1);
        assert_eq!(manager.relation_count(), 1);
        assert_eq!(resource.observer_count(), 1);
    }

    #[test]
    fn test_check_mixes_in_confirmables() {
        let manager = ObserveManager::new();
        let resource = Temperature::new("/temp");
        let exchange = registration(peer(5683), 1);
        let relation = manager.register(&exchange, resource).expect("registration");
        let start = exchange.timestamp();
        let interval = Duration::from_secs(60);

        // Every third notification by count.
        let picks: Vec<bool> = (0..6).map(|_| relation.check(start, interval, 3)).collect();
        assert_eq!(picks, vec![false, false, true, false, false, true]);

        // Or once the interval elapsed.
        assert!(relation.check(start + interval, interval, 3));
        assert!(!relation.check(start + interval, interval, 3));
    }
}
