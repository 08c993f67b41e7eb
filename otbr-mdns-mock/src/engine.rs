// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared in-memory mDNS engine
//!
//! The engine plays the part of the network and the native responder at once:
//! every [`MockBackend`](crate::MockBackend) created from it sees what the
//! others publish. Answers are addressed to the backend that owns the query
//! and delivered over a broadcast channel.

use otbr_mdns::dns_sd;
use otbr_mdns::dns_utils::full_host_name;
use otbr_mdns::{
    BackendEvent, DiscoveredHostInfo, DiscoveredInstanceInfo, Error, HostRegistrationInfo,
    PublisherState, RequestId, Result, ServiceRegistrationInfo,
};
use core::net::Ipv6Addr;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Interface index reported with every answer
pub const NETIF_INDEX: u32 = 1;

/// TTL reported with every answer
pub const RECORD_TTL: u32 = 120;

/// Host name used for services registered without one
pub const LOCAL_HOST_NAME: &str = "otbr";

const EVENT_CAPACITY: usize = 256;

/// Identifies the backend a record or query belongs to
pub type OwnerId = u64;

pub(crate) type QueryId = u64;

#[derive(Debug, Clone)]
pub(crate) struct EngineEvent {
    /// `None` reaches every backend
    pub(crate) owner: Option<OwnerId>,
    pub(crate) event: BackendEvent,
}

#[derive(Debug, Clone)]
pub(crate) enum QueryKind {
    Browse {
        service_type: String,
    },
    ResolveService {
        service_type: String,
        instance_name: String,
        netif_index: u32,
    },
    ResolveHost {
        host_name: String,
    },
}

struct Query {
    owner: OwnerId,
    kind: QueryKind,
}

struct PublishedService {
    owner: OwnerId,
    info: ServiceRegistrationInfo,
}

struct PublishedHost {
    owner: OwnerId,
    addresses: Vec<Ipv6Addr>,
}

struct EngineState {
    available: bool,
    auto_complete: bool,
    services: HashMap<String, PublishedService>,
    hosts: HashMap<String, PublishedHost>,
    queries: HashMap<QueryId, Query>,
    held: Vec<EngineEvent>,
    fail_next_publish: Option<i32>,
    fail_next_resolve: Option<i32>,
    publish_count: usize,
    next_owner: OwnerId,
    next_query: QueryId,
}

struct Inner {
    state: Mutex<EngineState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

/// Shared in-memory mDNS engine
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<Inner>,
}

fn service_key(name: &str, service_type: &str) -> String {
    format!("{name}.{service_type}").to_ascii_lowercase()
}

fn host_key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl MockEngine {
    /// Create an available engine that completes requests immediately
    ///
    /// # Example
    ///
    /// ```
    /// use otbr_mdns_mock::MockEngine;
    ///
    /// let engine = MockEngine::new();
    /// assert!(engine.is_available());
    /// ```
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState {
                    available: true,
                    auto_complete: true,
                    services: HashMap::new(),
                    hosts: HashMap::new(),
                    queries: HashMap::new(),
                    held: Vec::new(),
                    fail_next_publish: None,
                    fail_next_resolve: None,
                    publish_count: 0,
                    next_owner: 1,
                    next_query: 1,
                }),
                event_tx,
            }),
        }
    }

    /// A new backend attached to this engine
    pub fn backend(&self) -> crate::MockBackend {
        crate::MockBackend::new(self.clone())
    }

    /// Whether the engine is up
    pub fn is_available(&self) -> bool {
        self.inner.state.lock().available
    }

    /// Bring the engine up or take it down.
    ///
    /// Going down forgets every record and query, like a crashed daemon.
    pub fn set_available(&self, available: bool) {
        let mut state = self.inner.state.lock();
        if state.available == available {
            return;
        }

        state.available = available;
        if !available {
            state.services.clear();
            state.hosts.clear();
            state.queries.clear();
            state.held.clear();
        }

        let publisher_state = if available {
            PublisherState::Ready
        } else {
            PublisherState::Idle
        };
        log::info!("Mock engine is now {publisher_state:?}");
        self.send(None, BackendEvent::StateChanged(publisher_state));
    }

    /// When false, publish outcomes are held until [`complete_pending`](Self::complete_pending)
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.inner.state.lock().auto_complete = auto_complete;
    }

    /// Deliver every held publish outcome
    pub fn complete_pending(&self) {
        let held = core::mem::take(&mut self.inner.state.lock().held);
        for event in held {
            let _ = self.inner.event_tx.send(event);
        }
    }

    /// Make the next publish request fail with a native `code`
    pub fn fail_next_publish(&self, code: i32) {
        self.inner.state.lock().fail_next_publish = Some(code);
    }

    /// Make the next resolution fail with a native `code`
    pub fn fail_next_resolve(&self, code: i32) {
        self.inner.state.lock().fail_next_resolve = Some(code);
    }

    /// Number of publish requests that reached the registry
    pub fn publish_count(&self) -> usize {
        self.inner.state.lock().publish_count
    }

    /// Number of registered services
    pub fn service_count(&self) -> usize {
        self.inner.state.lock().services.len()
    }

    /// Number of registered hosts
    pub fn host_count(&self) -> usize {
        self.inner.state.lock().hosts.len()
    }

    /// Number of live browse and resolve queries
    pub fn active_queries(&self) -> usize {
        self.inner.state.lock().queries.len()
    }

    /// The registered service, if any
    pub fn service(&self, name: &str, service_type: &str) -> Option<ServiceRegistrationInfo> {
        self.inner
            .state
            .lock()
            .services
            .get(&service_key(name, service_type))
            .map(|service| service.info.clone())
    }

    /// The registered host's addresses, if any
    pub fn host_addresses(&self, name: &str) -> Option<Vec<Ipv6Addr>> {
        self.inner
            .state
            .lock()
            .hosts
            .get(&host_key(name))
            .map(|host| host.addresses.clone())
    }

    /// Drop a service record behind its owner's back
    pub fn expire_service(&self, name: &str, service_type: &str) {
        let mut state = self.inner.state.lock();
        if state.services.remove(&service_key(name, service_type)).is_some() {
            self.announce_removal(&state, name, service_type);
        }
    }

    /// Register a service from outside any publisher, as another responder
    /// on the link would
    ///
    /// # Errors
    ///
    /// [`Error::Duplicated`] if someone else owns the name, or
    /// [`Error::InvalidState`] if the engine is down.
    pub fn add_remote_service(&self, info: &ServiceRegistrationInfo) -> Result<()> {
        let owner = self.register_owner();
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(Error::InvalidState);
        }

        let key = service_key(&info.name, &info.service_type);
        if state.services.contains_key(&key) {
            return Err(Error::Duplicated);
        }
        state.services.insert(
            key,
            PublishedService {
                owner,
                info: info.clone(),
            },
        );
        self.announce_service(&mut state, info);
        Ok(())
    }

    /// Register a host from outside any publisher
    ///
    /// # Errors
    ///
    /// [`Error::Duplicated`] if someone else owns the name, or
    /// [`Error::InvalidState`] if the engine is down.
    pub fn add_remote_host(&self, name: &str, addresses: &[Ipv6Addr]) -> Result<()> {
        let owner = self.register_owner();
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(Error::InvalidState);
        }

        let key = host_key(name);
        if state.hosts.contains_key(&key) {
            return Err(Error::Duplicated);
        }
        state.hosts.insert(
            key,
            PublishedHost {
                owner,
                addresses: addresses.to_vec(),
            },
        );
        self.announce_host(&mut state, name);
        Ok(())
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub(crate) fn register_owner(&self) -> OwnerId {
        let mut state = self.inner.state.lock();
        let owner = state.next_owner;
        state.next_owner += 1;
        owner
    }

    /// Drop everything a stopped backend still has in flight
    pub(crate) fn forget_owner(&self, owner: OwnerId) {
        let mut state = self.inner.state.lock();
        state.queries.retain(|_, query| query.owner != owner);
        state.held.retain(|event| event.owner != Some(owner));
    }

    pub(crate) fn publish_service(
        &self,
        owner: OwnerId,
        request_id: RequestId,
        info: &ServiceRegistrationInfo,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(Error::InvalidState);
        }

        let key = service_key(&info.name, &info.service_type);
        let conflict = state
            .services
            .get(&key)
            .is_some_and(|service| service.owner != owner);
        let failure = match state.fail_next_publish.take() {
            Some(code) => Some(code),
            None if conflict => Some(dns_sd::NAME_CONFLICT),
            None => None,
        };

        let result = match failure {
            Some(code) => Err(dns_sd::dns_error_to_error(code)),
            None => {
                state.services.insert(
                    key,
                    PublishedService {
                        owner,
                        info: info.clone(),
                    },
                );
                state.publish_count += 1;
                Ok(())
            }
        };
        let announce = result.is_ok();

        self.complete(
            &mut state,
            owner,
            BackendEvent::ServiceRegistered {
                name: info.name.clone(),
                service_type: info.service_type.clone(),
                request_id,
                result,
            },
        );
        if announce {
            self.announce_service(&mut state, info);
        }
        Ok(())
    }

    pub(crate) fn withdraw_service(
        &self,
        owner: OwnerId,
        name: &str,
        service_type: &str,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        let key = service_key(name, service_type);
        if !state
            .services
            .get(&key)
            .is_some_and(|service| service.owner == owner)
        {
            return Err(Error::NotFound);
        }

        state.services.remove(&key);
        self.announce_removal(&state, name, service_type);
        Ok(())
    }

    pub(crate) fn publish_host(
        &self,
        owner: OwnerId,
        request_id: RequestId,
        info: &HostRegistrationInfo,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(Error::InvalidState);
        }

        let key = host_key(&info.name);
        let conflict = state
            .hosts
            .get(&key)
            .is_some_and(|host| host.owner != owner);
        let failure = match state.fail_next_publish.take() {
            Some(code) => Some(code),
            None if conflict => Some(dns_sd::NAME_CONFLICT),
            None => None,
        };

        let result = match failure {
            Some(code) => Err(dns_sd::dns_error_to_error(code)),
            None => {
                state.hosts.insert(
                    key,
                    PublishedHost {
                        owner,
                        addresses: info.addresses.clone(),
                    },
                );
                state.publish_count += 1;
                Ok(())
            }
        };
        let announce = result.is_ok();

        self.complete(
            &mut state,
            owner,
            BackendEvent::HostRegistered {
                name: info.name.clone(),
                request_id,
                result,
            },
        );
        if announce {
            self.announce_host(&mut state, &info.name);
        }
        Ok(())
    }

    pub(crate) fn withdraw_host(&self, owner: OwnerId, name: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        let key = host_key(name);
        if !state.hosts.get(&key).is_some_and(|host| host.owner == owner) {
            return Err(Error::NotFound);
        }

        state.hosts.remove(&key);
        Ok(())
    }

    /// Start a query; anything already known is answered right away
    pub(crate) fn add_query(&self, owner: OwnerId, kind: QueryKind) -> Result<QueryId> {
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(Error::InvalidState);
        }

        let id = state.next_query;
        state.next_query += 1;
        state.queries.insert(
            id,
            Query {
                owner,
                kind: kind.clone(),
            },
        );

        let answers: Vec<BackendEvent> = match &kind {
            QueryKind::Browse { service_type } => {
                let mut instances: Vec<String> = state
                    .services
                    .values()
                    .filter(|s| s.info.service_type.eq_ignore_ascii_case(service_type))
                    .map(|s| s.info.name.clone())
                    .collect();
                instances.sort();
                instances
                    .into_iter()
                    .map(|instance_name| BackendEvent::InstanceAdded {
                        service_type: service_type.clone(),
                        instance_name,
                        netif_index: NETIF_INDEX,
                    })
                    .collect()
            }
            QueryKind::ResolveService {
                service_type,
                instance_name,
                netif_index,
            } => answer_service(&mut state, service_type, instance_name, *netif_index)
                .into_iter()
                .collect(),
            QueryKind::ResolveHost { host_name } => {
                answer_host(&mut state, host_name).into_iter().collect()
            }
        };

        for answer in answers {
            self.send(Some(owner), answer);
        }
        Ok(id)
    }

    pub(crate) fn remove_query(&self, id: QueryId) -> Result<()> {
        self.inner
            .state
            .lock()
            .queries
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    fn send(&self, owner: Option<OwnerId>, event: BackendEvent) {
        // No receivers just means no backend is started yet.
        let _ = self.inner.event_tx.send(EngineEvent { owner, event });
    }

    fn complete(&self, state: &mut EngineState, owner: OwnerId, event: BackendEvent) {
        let event = EngineEvent {
            owner: Some(owner),
            event,
        };
        if state.auto_complete {
            let _ = self.inner.event_tx.send(event);
        } else {
            state.held.push(event);
        }
    }

    fn announce_service(&self, state: &mut EngineState, info: &ServiceRegistrationInfo) {
        let interested: Vec<(OwnerId, QueryKind)> = state
            .queries
            .values()
            .filter(|query| match &query.kind {
                QueryKind::Browse { service_type } => {
                    service_type.eq_ignore_ascii_case(&info.service_type)
                }
                QueryKind::ResolveService {
                    service_type,
                    instance_name,
                    ..
                } => {
                    service_type.eq_ignore_ascii_case(&info.service_type)
                        && instance_name.eq_ignore_ascii_case(&info.name)
                }
                QueryKind::ResolveHost { .. } => false,
            })
            .map(|query| (query.owner, query.kind.clone()))
            .collect();

        for (owner, kind) in interested {
            let answer = match kind {
                QueryKind::Browse { service_type } => Some(BackendEvent::InstanceAdded {
                    service_type,
                    instance_name: info.name.clone(),
                    netif_index: NETIF_INDEX,
                }),
                QueryKind::ResolveService {
                    service_type,
                    instance_name,
                    netif_index,
                } => answer_service(state, &service_type, &instance_name, netif_index),
                QueryKind::ResolveHost { .. } => None,
            };
            if let Some(answer) = answer {
                self.send(Some(owner), answer);
            }
        }
    }

    fn announce_removal(&self, state: &EngineState, name: &str, service_type: &str) {
        for query in state.queries.values() {
            if let QueryKind::Browse {
                service_type: browsed,
            } = &query.kind
            {
                if browsed.eq_ignore_ascii_case(service_type) {
                    self.send(
                        Some(query.owner),
                        BackendEvent::InstanceRemoved {
                            service_type: browsed.clone(),
                            instance_name: name.to_string(),
                            netif_index: NETIF_INDEX,
                        },
                    );
                }
            }
        }
    }

    fn announce_host(&self, state: &mut EngineState, name: &str) {
        let interested: Vec<(OwnerId, String)> = state
            .queries
            .values()
            .filter_map(|query| match &query.kind {
                QueryKind::ResolveHost { host_name } if host_key(host_name) == host_key(name) => {
                    Some((query.owner, host_name.clone()))
                }
                _ => None,
            })
            .collect();

        for (owner, host_name) in interested {
            if let Some(answer) = answer_host(state, &host_name) {
                self.send(Some(owner), answer);
            }
        }
    }
}

fn answer_service(
    state: &mut EngineState,
    service_type: &str,
    instance_name: &str,
    netif_index: u32,
) -> Option<BackendEvent> {
    if let Some(code) = state.fail_next_resolve.take() {
        return Some(BackendEvent::InstanceResolveFailed {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            code,
        });
    }

    let service = state.services.get(&service_key(instance_name, service_type))?;
    let host_name = if service.info.host_name.is_empty() {
        LOCAL_HOST_NAME
    } else {
        service.info.host_name.as_str()
    };
    let addresses = state
        .hosts
        .get(&host_key(host_name))
        .map(|host| host.addresses.clone())
        .unwrap_or_default();

    Some(BackendEvent::InstanceResolved {
        service_type: service_type.to_string(),
        info: DiscoveredInstanceInfo {
            removed: false,
            netif_index,
            name: service.info.name.clone(),
            host_name: full_host_name(host_name),
            addresses,
            port: service.info.port,
            priority: 0,
            weight: 0,
            txt_data: service.info.txt_data.clone(),
            ttl: RECORD_TTL,
        },
    })
}

fn answer_host(state: &mut EngineState, host_name: &str) -> Option<BackendEvent> {
    if let Some(code) = state.fail_next_resolve.take() {
        return Some(BackendEvent::HostResolveFailed {
            host_name: host_name.to_string(),
            code,
        });
    }

    let host = state.hosts.get(&host_key(host_name))?;
    Some(BackendEvent::HostResolved {
        host_name: host_name.to_string(),
        info: DiscoveredHostInfo {
            host_name: full_host_name(host_name),
            addresses: host.addresses.clone(),
            netif_index: NETIF_INDEX,
            ttl: RECORD_TTL,
        },
    })
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> ServiceRegistrationInfo {
        ServiceRegistrationInfo::new("", name, "_test._udp", &[], 1234, &[]).unwrap()
    }

    #[test]
    fn test_conflict_between_owners() {
        let engine = MockEngine::new();
        let mut events = engine.subscribe();
        let first = engine.register_owner();
        let second = engine.register_owner();

        engine.publish_service(first, 1, &service("a")).unwrap();
        engine.publish_service(second, 2, &service("a")).unwrap();

        let outcomes: Vec<_> = core::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|e| match e.event {
                BackendEvent::ServiceRegistered { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![Ok(()), Err(Error::Duplicated)]);
        assert_eq!(engine.publish_count(), 1);
    }

    #[test]
    fn test_withdraw_requires_ownership() {
        let engine = MockEngine::new();
        let owner = engine.register_owner();
        engine.publish_service(owner, 1, &service("a")).unwrap();

        assert_eq!(
            engine.withdraw_service(owner + 1, "a", "_test._udp"),
            Err(Error::NotFound)
        );
        assert_eq!(engine.withdraw_service(owner, "a", "_test._udp"), Ok(()));
        assert_eq!(
            engine.withdraw_service(owner, "a", "_test._udp"),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_held_completions() {
        let engine = MockEngine::new();
        let mut events = engine.subscribe();
        let owner = engine.register_owner();
        engine.set_auto_complete(false);

        engine.publish_service(owner, 1, &service("a")).unwrap();
        assert!(events.try_recv().is_err());

        engine.complete_pending();
        let event = events.try_recv().unwrap();
        assert_eq!(event.owner, Some(owner));
        assert!(matches!(
            event.event,
            BackendEvent::ServiceRegistered { request_id: 1, .. }
        ));
    }

    #[test]
    fn test_unavailable_engine_forgets_everything() {
        let engine = MockEngine::new();
        let owner = engine.register_owner();
        engine.publish_service(owner, 1, &service("a")).unwrap();
        engine
            .add_query(
                owner,
                QueryKind::Browse {
                    service_type: "_test._udp".to_string(),
                },
            )
            .unwrap();

        engine.set_available(false);
        assert_eq!(engine.service_count(), 0);
        assert_eq!(engine.active_queries(), 0);
        assert_eq!(
            engine.publish_service(owner, 2, &service("a")),
            Err(Error::InvalidState)
        );
    }
}
