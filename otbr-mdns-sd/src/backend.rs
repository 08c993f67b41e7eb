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

//! Publisher backend on top of the mdns-sd daemon

use crate::utils::{
    build_txt_properties, extract_instance_name, instance_info_from_mdns, ipv6_addresses,
};
use crate::{MdnsSdConfig, RECORD_TTL};
use core::net::{IpAddr, Ipv6Addr};
use core::time::Duration;
use mdns_sd::{HostnameResolutionEvent, Receiver, ServiceDaemon, ServiceEvent, ServiceInfo};
use otbr_mdns::dns_sd;
use otbr_mdns::dns_utils::{full_host_name, full_service_instance_name, full_service_type};
use otbr_mdns::{
    BackendEvent, DiscoveredHostInfo, DiscoveredInstanceInfo, Error, HostRegistrationInfo,
    MainloopContext, MdnsBackend, NativeHandle, PublisherState, RequestId, Result,
    ServiceRegistrationInfo,
};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};

type QueryId = u64;

fn backend_error(e: mdns_sd::Error) -> Error {
    Error::Backend(e.to_string())
}

fn name_key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// One daemon browse per service type, shared by every query of that type
///
/// mdns-sd keeps a single browse per type; browsing again replaces the
/// previous channel.
struct TypeBrowse {
    service_type: String,
    receiver: Option<Receiver<ServiceEvent>>,
    users: usize,
    resolved: HashMap<String, DiscoveredInstanceInfo>,
}

struct ServiceQuery {
    service_type: String,
    /// Empty for a browse
    instance_name: String,
    netif_index: u32,
}

impl ServiceQuery {
    fn is_browse(&self) -> bool {
        self.instance_name.is_empty()
    }

    fn is_type(&self, service_type: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
    }

    fn resolves(&self, service_type: &str, instance_name: &str) -> bool {
        self.is_type(service_type) && self.instance_name.eq_ignore_ascii_case(instance_name)
    }
}

struct HostQuery {
    host_name: String,
    receiver: Option<Receiver<HostnameResolutionEvent>>,
    addresses: BTreeSet<Ipv6Addr>,
}

impl HostQuery {
    fn info(&self) -> DiscoveredHostInfo {
        DiscoveredHostInfo {
            host_name: full_host_name(&self.host_name),
            addresses: self.addresses.iter().copied().collect(),
            netif_index: 0,
            ttl: RECORD_TTL,
        }
    }

    fn resolved(&self) -> BackendEvent {
        BackendEvent::HostResolved {
            host_name: self.host_name.clone(),
            info: self.info(),
        }
    }
}

/// Live browse and resolve queries, and what the daemon reported for them
#[derive(Default)]
struct Queries {
    next_id: QueryId,
    browses: HashMap<String, TypeBrowse>,
    services: HashMap<QueryId, ServiceQuery>,
    hosts: HashMap<QueryId, HostQuery>,
}

impl Queries {
    fn allocate_id(&mut self) -> QueryId {
        self.next_id += 1;
        self.next_id
    }

    fn is_active(&self) -> bool {
        !self.browses.is_empty() || !self.hosts.is_empty()
    }

    fn is_browsing(&self, service_type: &str) -> bool {
        self.browses.contains_key(&name_key(service_type))
    }

    /// Add `query` on the shared browse of its type
    ///
    /// `receiver` becomes the browse channel when the type is not browsed
    /// yet. Instances already resolved on that browse are replayed into
    /// `events`.
    fn add_service_query(
        &mut self,
        query: ServiceQuery,
        receiver: Option<Receiver<ServiceEvent>>,
        events: &mut VecDeque<BackendEvent>,
    ) -> QueryId {
        let id = self.allocate_id();
        let browse = self
            .browses
            .entry(name_key(&query.service_type))
            .or_insert_with(|| TypeBrowse {
                service_type: query.service_type.clone(),
                receiver: None,
                users: 0,
                resolved: HashMap::new(),
            });
        if browse.receiver.is_none() {
            browse.receiver = receiver;
        }
        browse.users += 1;

        if query.is_browse() {
            for info in browse.resolved.values() {
                events.push_back(BackendEvent::InstanceAdded {
                    service_type: query.service_type.clone(),
                    instance_name: info.name.clone(),
                    netif_index: query.netif_index,
                });
            }
        } else if let Some(info) = browse.resolved.get(&name_key(&query.instance_name)) {
            events.push_back(BackendEvent::InstanceResolved {
                service_type: query.service_type.clone(),
                info: DiscoveredInstanceInfo {
                    netif_index: query.netif_index,
                    ..info.clone()
                },
            });
        }

        self.services.insert(id, query);
        id
    }

    /// Drop a service query; yields its type once nothing uses the browse
    fn remove_service_query(&mut self, id: QueryId) -> Result<Option<String>> {
        let query = self.services.remove(&id).ok_or(Error::NotFound)?;
        let key = name_key(&query.service_type);
        let Some(browse) = self.browses.get_mut(&key) else {
            return Ok(None);
        };

        browse.users = browse.users.saturating_sub(1);
        if browse.users > 0 {
            return Ok(None);
        }
        self.browses.remove(&key);
        Ok(Some(query.service_type))
    }

    /// Add a host query; `local` answers it right away
    fn add_host_query(
        &mut self,
        host_name: &str,
        receiver: Option<Receiver<HostnameResolutionEvent>>,
        local: Option<&[Ipv6Addr]>,
        events: &mut VecDeque<BackendEvent>,
    ) -> QueryId {
        let mut query = HostQuery {
            host_name: host_name.to_string(),
            receiver,
            addresses: BTreeSet::new(),
        };

        // The daemon does not answer for hosts published here
        if let Some(local) = local {
            query.addresses.extend(local.iter().copied());
            events.push_back(query.resolved());
        }

        let id = self.allocate_id();
        self.hosts.insert(id, query);
        id
    }

    /// Drop a host query, returning the host it resolved
    fn remove_host_query(&mut self, id: QueryId) -> Option<String> {
        self.hosts.remove(&id).map(|query| query.host_name)
    }

    /// Move everything the daemon sent into `events`
    fn collect(&mut self, events: &mut VecDeque<BackendEvent>) {
        let mut browsed = Vec::new();
        for (key, browse) in &self.browses {
            if let Some(receiver) = &browse.receiver {
                while let Ok(event) = receiver.try_recv() {
                    browsed.push((key.clone(), event));
                }
            }
        }
        for (key, event) in browsed {
            self.on_service_event(&key, event, events);
        }

        let mut resolved = Vec::new();
        for (id, query) in &self.hosts {
            if let Some(receiver) = &query.receiver {
                while let Ok(event) = receiver.try_recv() {
                    resolved.push((*id, event));
                }
            }
        }
        for (id, event) in resolved {
            self.on_host_event(id, event, events);
        }
    }

    /// Translate one event of the browse keyed `type_key`
    fn on_service_event(
        &mut self,
        type_key: &str,
        event: ServiceEvent,
        events: &mut VecDeque<BackendEvent>,
    ) {
        let Some(browse) = self.browses.get_mut(type_key) else {
            return;
        };
        let browsing = self
            .services
            .values()
            .any(|q| q.is_browse() && q.is_type(&browse.service_type));

        match event {
            ServiceEvent::ServiceFound(_, full_name) => {
                log::trace!("Found {full_name}");
                if browsing {
                    events.push_back(BackendEvent::InstanceAdded {
                        service_type: browse.service_type.clone(),
                        instance_name: extract_instance_name(&full_name),
                        netif_index: 0,
                    });
                }
            }
            ServiceEvent::ServiceResolved(service) => {
                let info = match instance_info_from_mdns(&service) {
                    Ok(info) => info,
                    Err(e) => {
                        log::debug!("Ignoring {}: {e}", service.get_fullname());
                        return;
                    }
                };
                browse.resolved.insert(name_key(&info.name), info.clone());

                let resolving = self
                    .services
                    .values()
                    .find(|q| q.resolves(&browse.service_type, &info.name));
                if let Some(query) = resolving {
                    events.push_back(BackendEvent::InstanceResolved {
                        service_type: browse.service_type.clone(),
                        info: DiscoveredInstanceInfo {
                            netif_index: query.netif_index,
                            ..info
                        },
                    });
                }
            }
            ServiceEvent::ServiceRemoved(_, full_name) => {
                let instance_name = extract_instance_name(&full_name);
                browse.resolved.remove(&name_key(&instance_name));
                if browsing {
                    events.push_back(BackendEvent::InstanceRemoved {
                        service_type: browse.service_type.clone(),
                        instance_name,
                        netif_index: 0,
                    });
                }
            }
            _ => {}
        }
    }

    fn on_host_event(
        &mut self,
        id: QueryId,
        event: HostnameResolutionEvent,
        events: &mut VecDeque<BackendEvent>,
    ) {
        let Some(query) = self.hosts.get_mut(&id) else {
            return;
        };

        match event {
            // The daemon reports every address it holds for the host
            HostnameResolutionEvent::AddressesFound(_, addresses) => {
                query.addresses = ipv6_addresses(&addresses).into_iter().collect();
                events.push_back(query.resolved());
            }
            HostnameResolutionEvent::AddressesRemoved(_, addresses) => {
                for address in ipv6_addresses(&addresses) {
                    query.addresses.remove(&address);
                }
                events.push_back(query.resolved());
            }
            HostnameResolutionEvent::SearchTimeout(_) if query.addresses.is_empty() => {
                events.push_back(BackendEvent::HostResolveFailed {
                    host_name: query.host_name.clone(),
                    code: dns_sd::TIMEOUT,
                });
            }
            _ => {}
        }
    }
}

struct PublishedService {
    info: ServiceRegistrationInfo,
    announced: bool,
}

impl PublishedService {
    fn is_on(&self, host_key: &str) -> bool {
        !self.info.host_name.is_empty() && name_key(&self.info.host_name) == host_key
    }
}

/// Hosts and services published through this backend
///
/// mdns-sd cannot advertise a host by itself, so a host's addresses are
/// carried by the services on it. A service whose named host is not
/// published stays off the daemon until the host appears.
struct Registry {
    local_host: String,
    /// Addresses by lowercase host name
    hosts: HashMap<String, Vec<Ipv6Addr>>,
    /// By lowercase full instance name
    services: HashMap<String, PublishedService>,
}

impl Registry {
    fn new(local_host: &str) -> Self {
        Self {
            local_host: full_host_name(local_host),
            hosts: HashMap::new(),
            services: HashMap::new(),
        }
    }

    /// The daemon record for `info`, `None` while its host is unknown
    fn service_info(&self, info: &ServiceRegistrationInfo) -> Result<Option<ServiceInfo>> {
        let (host_name, addresses) = if info.host_name.is_empty() {
            (self.local_host.clone(), Vec::new())
        } else {
            let Some(addresses) = self.hosts.get(&name_key(&info.host_name)) else {
                return Ok(None);
            };
            let addresses: Vec<IpAddr> = addresses.iter().copied().map(IpAddr::V6).collect();
            (full_host_name(&info.host_name), addresses)
        };

        let ty_domain = match info.sub_types.as_slice() {
            [] => full_service_type(&info.service_type),
            [sub_type, rest @ ..] => {
                if !rest.is_empty() {
                    log::warn!(
                        "Only sub-type {sub_type} of {}.{} is advertised",
                        info.name,
                        info.service_type
                    );
                }
                format!("{sub_type}._sub.{}", full_service_type(&info.service_type))
            }
        };

        let properties = build_txt_properties(&info.txt_list);
        let service = ServiceInfo::new(
            &ty_domain,
            &info.name,
            &host_name,
            addresses.as_slice(),
            info.port,
            properties.as_slice(),
        )
        .map_err(backend_error)?;

        Ok(Some(if info.host_name.is_empty() {
            service.enable_addr_auto()
        } else {
            service
        }))
    }

    /// Record a service, returning its key and what to register now
    fn add_service(
        &mut self,
        info: &ServiceRegistrationInfo,
    ) -> Result<(String, Option<ServiceInfo>)> {
        let record = self.service_info(info)?;
        let key = full_service_instance_name(&info.name, &info.service_type).to_ascii_lowercase();
        self.services.insert(
            key.clone(),
            PublishedService {
                info: info.clone(),
                announced: record.is_some(),
            },
        );
        Ok((key, record))
    }

    /// Forget a service, returning its full name if the daemon announces it
    fn remove_service(&mut self, key: &str) -> Result<Option<String>> {
        let service = self.services.remove(key).ok_or(Error::NotFound)?;
        Ok(service.announced.then(|| {
            full_service_instance_name(&service.info.name, &service.info.service_type)
        }))
    }

    /// Record a host; its services are returned to be announced again
    fn set_host(&mut self, host_key: &str, addresses: &[Ipv6Addr]) -> Vec<ServiceInfo> {
        self.hosts.insert(host_key.to_string(), addresses.to_vec());

        let mut records = Vec::new();
        let mut announced = Vec::new();
        for (key, service) in &self.services {
            if !service.is_on(host_key) {
                continue;
            }
            match self.service_info(&service.info) {
                Ok(Some(record)) => {
                    records.push(record);
                    announced.push(key.clone());
                }
                Ok(None) => {}
                Err(e) => log::warn!("Cannot advertise {key}: {e}"),
            }
        }
        for key in announced {
            if let Some(service) = self.services.get_mut(&key) {
                service.announced = true;
            }
        }
        records
    }

    /// Forget a host; full names of its announced services are returned
    /// to be withdrawn
    fn remove_host(&mut self, host_key: &str) -> Result<Vec<String>> {
        self.hosts.remove(host_key).ok_or(Error::NotFound)?;

        let mut withdrawn = Vec::new();
        for service in self.services.values_mut() {
            if service.is_on(host_key) && core::mem::take(&mut service.announced) {
                withdrawn.push(full_service_instance_name(
                    &service.info.name,
                    &service.info.service_type,
                ));
            }
        }
        Ok(withdrawn)
    }
}

fn register(daemon: &ServiceDaemon, record: ServiceInfo) -> Result<()> {
    let full_name = record.get_fullname().to_string();
    let host_name = record.get_hostname().to_string();
    daemon.register(record).map_err(backend_error)?;
    log::debug!("Registered {full_name} on {host_name}");
    Ok(())
}

fn unregister(daemon: &ServiceDaemon, full_name: &str) -> Result<()> {
    daemon.unregister(full_name).map_err(backend_error)?;
    log::debug!("Unregistered {full_name}");
    Ok(())
}

/// [`MdnsBackend`] driving an mdns-sd [`ServiceDaemon`]
///
/// The daemon is created on [`start`](MdnsBackend::start) and shut down on
/// [`stop`](MdnsBackend::stop). Publish requests complete as soon as the
/// daemon accepts them.
pub struct MdnsSdBackend {
    config: MdnsSdConfig,
    daemon: Option<ServiceDaemon>,
    queries: Rc<RefCell<Queries>>,
    registry: Rc<RefCell<Registry>>,
    events: VecDeque<BackendEvent>,
}

impl MdnsSdBackend {
    /// Create a backend; the daemon is not started yet
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if `config` does not validate.
    pub fn new(config: MdnsSdConfig) -> Result<Self> {
        config.validate()?;
        let registry = Registry::new(&config.host_name);
        Ok(Self {
            config,
            daemon: None,
            queries: Rc::new(RefCell::new(Queries::default())),
            registry: Rc::new(RefCell::new(registry)),
            events: VecDeque::new(),
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &MdnsSdConfig {
        &self.config
    }

    fn daemon(&self) -> Result<&ServiceDaemon> {
        self.daemon.as_ref().ok_or(Error::InvalidState)
    }

    fn collect_events(&mut self) {
        self.queries.borrow_mut().collect(&mut self.events);
    }

    fn add_service_query(&mut self, query: ServiceQuery) -> Result<Box<dyn NativeHandle>> {
        let daemon = self.daemon()?.clone();

        let mut queries = self.queries.borrow_mut();
        let receiver = if queries.is_browsing(&query.service_type) {
            None
        } else {
            let receiver = daemon
                .browse(&full_service_type(&query.service_type))
                .map_err(backend_error)?;
            log::debug!("Started browsing {}", query.service_type);
            Some(receiver)
        };
        let id = queries.add_service_query(query, receiver, &mut self.events);

        Ok(Box::new(MdnsSdQuery {
            daemon,
            queries: Rc::downgrade(&self.queries),
            id,
        }))
    }
}

impl MdnsBackend for MdnsSdBackend {
    fn name(&self) -> &'static str {
        "mdns-sd"
    }

    fn start(&mut self) -> Result<()> {
        if self.daemon.is_some() {
            return Ok(());
        }

        let daemon = ServiceDaemon::new().map_err(|e| {
            log::error!("Failed to create mDNS daemon: {e}");
            backend_error(e)
        })?;
        log::info!("mDNS daemon started");

        self.daemon = Some(daemon);
        self.events
            .push_back(BackendEvent::StateChanged(PublisherState::Ready));
        Ok(())
    }

    fn stop(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };

        *self.queries.borrow_mut() = Queries::default();
        *self.registry.borrow_mut() = Registry::new(&self.config.host_name);
        self.events.clear();

        if let Err(e) = daemon.shutdown() {
            log::warn!("Failed to shut down mDNS daemon: {e}");
        } else {
            log::info!("mDNS daemon stopped");
        }
    }

    fn publish_service(
        &mut self,
        request_id: RequestId,
        info: &ServiceRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>> {
        let daemon = self.daemon()?.clone();

        let mut registry = self.registry.borrow_mut();
        let (key, record) = registry.add_service(info)?;
        match record {
            Some(record) => {
                if let Err(e) = register(&daemon, record) {
                    registry.services.remove(&key);
                    return Err(e);
                }
            }
            None => log::debug!(
                "Holding {}.{} until host {} is published",
                info.name,
                info.service_type,
                info.host_name
            ),
        }

        self.events.push_back(BackendEvent::ServiceRegistered {
            name: info.name.clone(),
            service_type: info.service_type.clone(),
            request_id,
            result: Ok(()),
        });

        Ok(Box::new(MdnsSdRecord::Service {
            daemon,
            registry: Rc::downgrade(&self.registry),
            key,
        }))
    }

    fn publish_host(
        &mut self,
        request_id: RequestId,
        info: &HostRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>> {
        let daemon = self.daemon()?.clone();

        let key = name_key(&info.name);
        let records = self.registry.borrow_mut().set_host(&key, &info.addresses);
        log::debug!(
            "Host {} recorded with {:?}, advertised with {} service(s)",
            info.name,
            info.addresses,
            records.len()
        );
        for record in records {
            if let Err(e) = register(&daemon, record) {
                log::warn!("Failed to advertise a service on {}: {e}", info.name);
            }
        }

        self.events.push_back(BackendEvent::HostRegistered {
            name: info.name.clone(),
            request_id,
            result: Ok(()),
        });

        Ok(Box::new(MdnsSdRecord::Host {
            daemon,
            registry: Rc::downgrade(&self.registry),
            key,
        }))
    }

    fn browse_service(&mut self, service_type: &str) -> Result<Box<dyn NativeHandle>> {
        self.add_service_query(ServiceQuery {
            service_type: service_type.to_string(),
            instance_name: String::new(),
            netif_index: 0,
        })
    }

    fn resolve_service(
        &mut self,
        service_type: &str,
        instance_name: &str,
        netif_index: u32,
    ) -> Result<Box<dyn NativeHandle>> {
        self.add_service_query(ServiceQuery {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            netif_index,
        })
    }

    fn resolve_host(&mut self, host_name: &str) -> Result<Box<dyn NativeHandle>> {
        let daemon = self.daemon()?.clone();
        let receiver = daemon
            .resolve_hostname(
                &full_host_name(host_name),
                self.config.host_resolve_timeout_ms(),
            )
            .map_err(backend_error)?;

        let registry = self.registry.borrow();
        let local = registry.hosts.get(&name_key(host_name));
        let id = self.queries.borrow_mut().add_host_query(
            host_name,
            Some(receiver),
            local.map(Vec::as_slice),
            &mut self.events,
        );

        Ok(Box::new(MdnsSdQuery {
            daemon,
            queries: Rc::downgrade(&self.queries),
            id,
        }))
    }

    fn on_service_resolve_failed(&mut self, service_type: &str, instance_name: &str, error: &Error) {
        log::debug!("Resolving {instance_name}.{service_type} failed: {error}");
    }

    fn on_host_resolve_failed(&mut self, host_name: &str, error: &Error) {
        log::debug!("Resolving host {host_name} failed: {error}");
    }

    fn dns_error_to_error(&self, code: i32) -> Error {
        dns_sd::dns_error_to_error(code)
    }

    fn poll_event(&mut self) -> Option<BackendEvent> {
        if self.events.is_empty() {
            self.collect_events();
        }
        self.events.pop_front()
    }

    fn update(&mut self, context: &mut MainloopContext) {
        if !self.events.is_empty() {
            context.shrink_timeout(Duration::ZERO);
        } else if self.queries.borrow().is_active() {
            context.shrink_timeout(self.config.poll_interval);
        }
    }

    fn process(&mut self, _context: &MainloopContext) {
        self.collect_events();
    }
}

impl Drop for MdnsSdBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Something published through the backend
enum MdnsSdRecord {
    Service {
        daemon: ServiceDaemon,
        registry: Weak<RefCell<Registry>>,
        key: String,
    },
    Host {
        daemon: ServiceDaemon,
        registry: Weak<RefCell<Registry>>,
        key: String,
    },
}

impl NativeHandle for MdnsSdRecord {
    fn release(&mut self) -> Result<()> {
        match self {
            Self::Service {
                daemon,
                registry,
                key,
            } => {
                let registry = registry.upgrade().ok_or(Error::NotFound)?;
                let announced = registry.borrow_mut().remove_service(key)?;
                match announced {
                    Some(full_name) => unregister(daemon, &full_name),
                    None => Ok(()),
                }
            }
            Self::Host {
                daemon,
                registry,
                key,
            } => {
                let registry = registry.upgrade().ok_or(Error::NotFound)?;
                let withdrawn = registry.borrow_mut().remove_host(key)?;
                for full_name in withdrawn {
                    if let Err(e) = unregister(daemon, &full_name) {
                        log::warn!("Failed to withdraw {full_name}: {e}");
                    }
                }
                Ok(())
            }
        }
    }
}

/// A browse or resolve query
struct MdnsSdQuery {
    daemon: ServiceDaemon,
    queries: Weak<RefCell<Queries>>,
    id: QueryId,
}

impl NativeHandle for MdnsSdQuery {
    fn release(&mut self) -> Result<()> {
        let queries = self.queries.upgrade().ok_or(Error::NotFound)?;
        let mut queries = queries.borrow_mut();

        if let Some(host_name) = queries.remove_host_query(self.id) {
            let host_name = full_host_name(&host_name);
            if let Err(e) = self.daemon.stop_resolve_hostname(&host_name) {
                log::debug!("Stopping resolution of {host_name} failed: {e}");
            }
            return Ok(());
        }

        if let Some(service_type) = queries.remove_service_query(self.id)? {
            let ty_domain = full_service_type(&service_type);
            if let Err(e) = self.daemon.stop_browse(&ty_domain) {
                log::debug!("Stopping browse of {ty_domain} failed: {e}");
            }
            log::debug!("Stopped browsing {service_type}");
        }
        Ok(())
    }
}
