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

//! mDNS publisher
//!
//! The publisher owns every registration and subscription and is only ever
//! touched from the event-loop thread. Nothing here blocks: outcomes arrive
//! later through one-shot result callbacks, and discoveries are fanned out to
//! every registered subscriber in registration order.
//!
//! At most one native publish request is outstanding per name. Publishing
//! something identical to a pending registration queues the caller on it;
//! publishing something identical to a completed registration succeeds
//! immediately; publishing something different replaces the old registration,
//! whose pending callers are answered with [`Error::Aborted`].
//!
//! Callbacks run while the publisher is busy, so they must not call back into
//! it. Post follow-up work through the [`TaskRunner`](crate::TaskRunner)
//! instead.

use crate::backend::{BackendEvent, MdnsBackend, PublisherState, RequestId};
use crate::config::PublisherConfig;
use crate::mainloop::{MainloopContext, MainloopProcessor};
use crate::registration::{HostRegistration, Registration, ResultCallback, ServiceRegistration};
use crate::subscription::{HostSubscription, ServiceSubscription};
use crate::telemetry::{MdnsTelemetryInfo, Telemetry};
use crate::txt::{decode_txt_data, encode_txt_data, TxtEntry, TxtList};
use crate::types::{
    retain_deliverable, service_key, DiscoveredHostInfo, DiscoveredInstanceInfo,
    HostRegistrationInfo, ServiceRegistrationInfo,
};
use crate::{Error, Result};
use core::net::Ipv6Addr;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Notified on every Idle/Ready transition
pub type StateCallback = Box<dyn FnMut(PublisherState)>;

/// Receives resolved or withdrawn service instances: `(service_type, info)`
pub type DiscoveredServiceInstanceCallback = Box<dyn FnMut(&str, &DiscoveredInstanceInfo)>;

/// Receives resolved hosts: `(host_name, info)`
pub type DiscoveredHostCallback = Box<dyn FnMut(&str, &DiscoveredHostInfo)>;

/// Identifies a set of discovery callbacks
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    on_instance: Option<DiscoveredServiceInstanceCallback>,
    on_host: Option<DiscoveredHostCallback>,
}

/// Backend-agnostic mDNS publisher
pub struct Publisher {
    backend: Box<dyn MdnsBackend>,
    state: PublisherState,
    state_callback: Option<StateCallback>,
    next_request_id: RequestId,
    service_registrations: HashMap<String, ServiceRegistration>,
    host_registrations: HashMap<String, HostRegistration>,
    service_subscriptions: Vec<ServiceSubscription>,
    host_subscriptions: Vec<HostSubscription>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: SubscriberId,
    telemetry: Rc<RefCell<Telemetry>>,
}

impl Publisher {
    /// Create an idle publisher on top of `backend`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if `config` does not validate.
    pub fn new(backend: Box<dyn MdnsBackend>, config: &PublisherConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            state: PublisherState::Idle,
            state_callback: None,
            next_request_id: 1,
            service_registrations: HashMap::new(),
            host_registrations: HashMap::new(),
            service_subscriptions: Vec::new(),
            host_subscriptions: Vec::new(),
            subscribers: Vec::new(),
            next_subscriber_id: 1,
            telemetry: Rc::new(RefCell::new(Telemetry::new(config.ema_factor))),
        })
    }

    /// Start the backend. The publisher becomes ready once the backend says so.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if it cannot be started.
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }

        log::info!("Starting mDNS publisher on {} backend", self.backend.name());
        self.backend.start()?;
        self.dispatch_backend_events();
        Ok(())
    }

    /// Release everything and return to idle
    pub fn stop(&mut self) {
        self.set_state(PublisherState::Idle);
        self.backend.stop();
    }

    /// Whether the publisher is ready
    pub fn is_started(&self) -> bool {
        self.state == PublisherState::Ready
    }

    /// Current state
    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// Be told about state transitions
    pub fn set_state_callback(&mut self, callback: StateCallback) {
        self.state_callback = Some(callback);
    }

    /// Telemetry snapshot
    pub fn telemetry(&self) -> MdnsTelemetryInfo {
        self.telemetry.borrow().info()
    }

    /// Whether a (pending or completed) registration exists for `name.service_type`
    pub fn has_service_registration(&self, name: &str, service_type: &str) -> bool {
        self.service_registrations
            .contains_key(&service_key(name, service_type))
    }

    /// Whether a (pending or completed) registration exists for host `name`
    pub fn has_host_registration(&self, name: &str) -> bool {
        self.host_registrations.contains_key(name)
    }

    /// Encode TXT entries, see [`encode_txt_data`]
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgs`] if an entry is too long.
    pub fn encode_txt_data(entries: &[TxtEntry]) -> Result<Vec<u8>> {
        encode_txt_data(entries)
    }

    /// Decode TXT data, see [`decode_txt_data`]
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] on malformed data.
    pub fn decode_txt_data(data: &[u8]) -> Result<TxtList> {
        decode_txt_data(data)
    }

    /// Publish a service instance.
    ///
    /// `callback` is invoked exactly once with the outcome, possibly before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] without invoking `callback` if the
    /// publisher is not ready.
    #[allow(clippy::too_many_arguments)]
    pub fn publish_service(
        &mut self,
        host_name: &str,
        name: &str,
        service_type: &str,
        sub_types: &[String],
        port: u16,
        txt_list: &[TxtEntry],
        callback: ResultCallback,
    ) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }

        self.telemetry
            .borrow_mut()
            .begin_service_registration(name, service_type);
        let callback = self.service_registration_callback(name, service_type, callback);

        match ServiceRegistrationInfo::new(host_name, name, service_type, sub_types, port, txt_list)
        {
            Ok(info) => self.publish_service_impl(info, callback),
            Err(e) => {
                log::warn!("Rejecting service {name}.{service_type}: {e}");
                callback(Err(e));
            }
        }
        Ok(())
    }

    fn publish_service_impl(&mut self, info: ServiceRegistrationInfo, callback: ResultCallback) {
        let key = info.key();

        if let Some(existing) = self.service_registrations.get_mut(&key) {
            if !existing.is_outdated(&info) {
                if existing.is_completed() {
                    log::debug!("Service {key} is already published");
                    callback(Ok(()));
                } else {
                    log::debug!("Service {key} is being published, joining");
                    existing.join(callback);
                }
                return;
            }
        }

        if let Some(outdated) = self.service_registrations.remove(&key) {
            log::info!(
                "Replacing outdated registration of service {key} on {}:{}",
                outdated.info().host_name,
                outdated.info().port
            );
            drop(outdated);
        }

        let request_id = self.allocate_request_id();
        match self.backend.publish_service(request_id, &info) {
            Ok(native) => {
                log::debug!("Publishing service {key} (request {request_id})");
                self.service_registrations
                    .insert(key, Registration::new(info, request_id, native, callback));
            }
            Err(e) => {
                log::warn!("Failed to publish service {key}: {e}");
                callback(Err(e));
            }
        }

        self.dispatch_backend_events();
    }

    /// Withdraw a service instance.
    ///
    /// Succeeds when nothing was published under that name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] without invoking `callback` if the
    /// publisher is not ready.
    pub fn unpublish_service(
        &mut self,
        name: &str,
        service_type: &str,
        callback: ResultCallback,
    ) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }

        let key = service_key(name, service_type);
        let result = match self.service_registrations.remove(&key) {
            Some(mut registration) => {
                log::debug!("Unpublishing service {key}");
                let released = registration.release();
                drop(registration);
                normalize_release(released)
            }
            None => Ok(()),
        };

        callback(result);
        Ok(())
    }

    /// Publish a host's addresses.
    ///
    /// Follows the same coalescing and replacement rules as
    /// [`publish_service`](Self::publish_service).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] without invoking `callback` if the
    /// publisher is not ready.
    pub fn publish_host(
        &mut self,
        name: &str,
        addresses: &[Ipv6Addr],
        callback: ResultCallback,
    ) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }

        self.telemetry.borrow_mut().begin_host_registration(name);
        let callback = self.host_registration_callback(name, callback);

        match HostRegistrationInfo::new(name, addresses) {
            Ok(info) => self.publish_host_impl(info, callback),
            Err(e) => {
                log::warn!("Rejecting host {name}: {e}");
                callback(Err(e));
            }
        }
        Ok(())
    }

    fn publish_host_impl(&mut self, info: HostRegistrationInfo, callback: ResultCallback) {
        let key = info.name.clone();

        if let Some(existing) = self.host_registrations.get_mut(&key) {
            if !existing.is_outdated(&info) {
                if existing.is_completed() {
                    log::debug!("Host {key} is already published");
                    callback(Ok(()));
                } else {
                    log::debug!("Host {key} is being published, joining");
                    existing.join(callback);
                }
                return;
            }
        }

        if let Some(outdated) = self.host_registrations.remove(&key) {
            log::info!("Replacing outdated registration of host {key}");
            drop(outdated);
        }

        let request_id = self.allocate_request_id();
        match self.backend.publish_host(request_id, &info) {
            Ok(native) => {
                log::debug!("Publishing host {key} (request {request_id})");
                self.host_registrations
                    .insert(key, Registration::new(info, request_id, native, callback));
            }
            Err(e) => {
                log::warn!("Failed to publish host {key}: {e}");
                callback(Err(e));
            }
        }

        self.dispatch_backend_events();
    }

    /// Withdraw a host.
    ///
    /// Succeeds when nothing was published under that name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] without invoking `callback` if the
    /// publisher is not ready.
    pub fn unpublish_host(&mut self, name: &str, callback: ResultCallback) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }

        let result = match self.host_registrations.remove(name) {
            Some(mut registration) => {
                log::debug!("Unpublishing host {name}");
                let released = registration.release();
                drop(registration);
                normalize_release(released)
            }
            None => Ok(()),
        };

        callback(result);
        Ok(())
    }

    /// Discover instances of `service_type`, or only `instance_name` if it is
    /// not empty. Results go to every subscriber callback.
    ///
    /// Subscribing twice to the same thing is a caller bug.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if not ready, or the backend's error if the
    /// query cannot be started.
    pub fn subscribe_service(&mut self, service_type: &str, instance_name: &str) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }
        debug_assert!(
            !self
                .service_subscriptions
                .iter()
                .any(|s| s.is(service_type, instance_name)),
            "already subscribed to {instance_name} {service_type}"
        );

        let mut subscription = ServiceSubscription::new(service_type, instance_name);
        if instance_name.is_empty() {
            subscription.set_browse(self.backend.browse_service(service_type)?);
            log::debug!("Browsing {service_type}");
        } else {
            self.telemetry
                .borrow_mut()
                .begin_service_resolution(instance_name, service_type);
            match self.backend.resolve_service(service_type, instance_name, 0) {
                Ok(handle) => subscription.add_resolution(instance_name, handle),
                Err(e) => {
                    self.telemetry
                        .borrow_mut()
                        .forget_service_resolution(instance_name, service_type);
                    return Err(e);
                }
            }
            log::debug!("Resolving {instance_name}.{service_type}");
        }

        self.service_subscriptions.push(subscription);
        self.dispatch_backend_events();
        Ok(())
    }

    /// Cancel a service subscription made with the same arguments.
    ///
    /// Unsubscribing from something never subscribed is a caller bug.
    pub fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str) {
        if !self.is_started() {
            return;
        }

        let position = self
            .service_subscriptions
            .iter()
            .position(|s| s.is(service_type, instance_name));
        debug_assert!(
            position.is_some(),
            "not subscribed to {instance_name} {service_type}"
        );

        if let Some(index) = position {
            let subscription = self.service_subscriptions.remove(index);
            {
                let mut telemetry = self.telemetry.borrow_mut();
                for instance in subscription.resolving_instances() {
                    telemetry.forget_service_resolution(instance, subscription.service_type());
                }
            }
            log::debug!(
                "Unsubscribed from {} {}",
                subscription.instance_name(),
                subscription.service_type()
            );
        }
    }

    /// Resolve `host_name`. Results go to every subscriber callback.
    ///
    /// Subscribing twice to the same host is a caller bug.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if not ready, or the backend's error if the
    /// query cannot be started.
    pub fn subscribe_host(&mut self, host_name: &str) -> Result<()> {
        if !self.is_started() {
            return Err(Error::InvalidState);
        }
        debug_assert!(
            !self.host_subscriptions.iter().any(|s| s.matches(host_name)),
            "already subscribed to host {host_name}"
        );

        self.telemetry.borrow_mut().begin_host_resolution(host_name);
        let handle = match self.backend.resolve_host(host_name) {
            Ok(handle) => handle,
            Err(e) => {
                self.telemetry.borrow_mut().forget_host_resolution(host_name);
                return Err(e);
            }
        };

        log::debug!("Resolving host {host_name}");
        self.host_subscriptions
            .push(HostSubscription::new(host_name, handle));
        self.dispatch_backend_events();
        Ok(())
    }

    /// Cancel a host subscription.
    ///
    /// Unsubscribing from something never subscribed is a caller bug.
    pub fn unsubscribe_host(&mut self, host_name: &str) {
        if !self.is_started() {
            return;
        }

        let position = self
            .host_subscriptions
            .iter()
            .position(|s| s.matches(host_name));
        debug_assert!(position.is_some(), "not subscribed to host {host_name}");

        if let Some(index) = position {
            let subscription = self.host_subscriptions.remove(index);
            self.telemetry
                .borrow_mut()
                .forget_host_resolution(subscription.host_name());
            log::debug!("Unsubscribed from host {host_name}");
        }
    }

    /// Register discovery callbacks; either may be absent.
    pub fn add_subscription_callbacks(
        &mut self,
        on_instance: Option<DiscoveredServiceInstanceCallback>,
        on_host: Option<DiscoveredHostCallback>,
    ) -> SubscriberId {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push(Subscriber {
            id,
            on_instance,
            on_host,
        });
        id
    }

    /// Unregister callbacks added with [`add_subscription_callbacks`](Self::add_subscription_callbacks)
    pub fn remove_subscription_callbacks(&mut self, id: SubscriberId) {
        self.subscribers.retain(|subscriber| subscriber.id != id);
    }

    fn allocate_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn service_registration_callback(
        &self,
        name: &str,
        service_type: &str,
        callback: ResultCallback,
    ) -> ResultCallback {
        let telemetry = Rc::clone(&self.telemetry);
        let name = name.to_string();
        let service_type = service_type.to_string();
        Box::new(move |result| {
            telemetry
                .borrow_mut()
                .end_service_registration(&name, &service_type, &result);
            callback(result);
        })
    }

    fn host_registration_callback(&self, name: &str, callback: ResultCallback) -> ResultCallback {
        let telemetry = Rc::clone(&self.telemetry);
        let name = name.to_string();
        Box::new(move |result| {
            telemetry.borrow_mut().end_host_registration(&name, &result);
            callback(result);
        })
    }

    fn set_state(&mut self, state: PublisherState) {
        if self.state == state {
            return;
        }

        log::info!("mDNS publisher state: {:?} -> {state:?}", self.state);
        self.state = state;
        if state == PublisherState::Idle {
            self.release_all();
        }

        if let Some(callback) = self.state_callback.as_mut() {
            callback(state);
        }
    }

    fn release_all(&mut self) {
        let services = core::mem::take(&mut self.service_registrations);
        let hosts = core::mem::take(&mut self.host_registrations);
        let service_subscriptions = core::mem::take(&mut self.service_subscriptions);
        let host_subscriptions = core::mem::take(&mut self.host_subscriptions);

        log::debug!(
            "Releasing {} service and {} host registrations, {} subscriptions",
            services.len(),
            hosts.len(),
            service_subscriptions.len() + host_subscriptions.len()
        );

        {
            let mut telemetry = self.telemetry.borrow_mut();
            for subscription in &service_subscriptions {
                for instance in subscription.resolving_instances() {
                    telemetry.forget_service_resolution(instance, subscription.service_type());
                }
            }
            for subscription in &host_subscriptions {
                telemetry.forget_host_resolution(subscription.host_name());
            }
        }

        // Pending registrations answer their callers with Aborted here.
        drop(services);
        drop(hosts);
        drop(service_subscriptions);
        drop(host_subscriptions);
    }

    fn dispatch_backend_events(&mut self) {
        while let Some(event) = self.backend.poll_event() {
            self.handle_backend_event(event);
        }
    }

    fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::StateChanged(state) => self.set_state(state),
            BackendEvent::ServiceRegistered {
                name,
                service_type,
                request_id,
                result,
            } => self.on_service_registered(&name, &service_type, request_id, result),
            BackendEvent::HostRegistered {
                name,
                request_id,
                result,
            } => self.on_host_registered(&name, request_id, result),
            BackendEvent::InstanceAdded {
                service_type,
                instance_name,
                netif_index,
            } => self.on_instance_added(&service_type, &instance_name, netif_index),
            BackendEvent::InstanceRemoved {
                service_type,
                instance_name,
                netif_index,
            } => self.on_instance_removed(&service_type, &instance_name, netif_index),
            BackendEvent::InstanceResolved { service_type, info } => {
                self.on_service_resolved(&service_type, info);
            }
            BackendEvent::InstanceResolveFailed {
                service_type,
                instance_name,
                code,
            } => {
                let error = self.backend.dns_error_to_error(code);
                self.on_service_resolve_failed(&service_type, &instance_name, error);
            }
            BackendEvent::HostResolved { host_name, info } => {
                self.on_host_resolved(&host_name, info);
            }
            BackendEvent::HostResolveFailed { host_name, code } => {
                let error = self.backend.dns_error_to_error(code);
                self.on_host_resolve_failed(&host_name, error);
            }
        }
    }

    fn on_service_registered(
        &mut self,
        name: &str,
        service_type: &str,
        request_id: RequestId,
        result: Result<()>,
    ) {
        let key = service_key(name, service_type);
        let current = self
            .service_registrations
            .get(&key)
            .is_some_and(|r| r.request_id() == request_id && !r.is_completed());
        if !current {
            log::debug!("Ignoring stale completion of service {key} (request {request_id})");
            return;
        }

        match result {
            Ok(()) => {
                log::info!("Published service {key}");
                if let Some(registration) = self.service_registrations.get_mut(&key) {
                    registration.complete(Ok(()));
                }
            }
            Err(e) => {
                log::warn!("Publishing service {key} failed: {e}");
                if let Some(mut registration) = self.service_registrations.remove(&key) {
                    registration.complete(Err(e));
                }
            }
        }
    }

    fn on_host_registered(&mut self, name: &str, request_id: RequestId, result: Result<()>) {
        let current = self
            .host_registrations
            .get(name)
            .is_some_and(|r| r.request_id() == request_id && !r.is_completed());
        if !current {
            log::debug!("Ignoring stale completion of host {name} (request {request_id})");
            return;
        }

        match result {
            Ok(()) => {
                log::info!("Published host {name}");
                if let Some(registration) = self.host_registrations.get_mut(name) {
                    registration.complete(Ok(()));
                }
            }
            Err(e) => {
                log::warn!("Publishing host {name} failed: {e}");
                if let Some(mut registration) = self.host_registrations.remove(name) {
                    registration.complete(Err(e));
                }
            }
        }
    }

    fn on_instance_added(&mut self, service_type: &str, instance_name: &str, netif_index: u32) {
        for subscription in self.service_subscriptions.iter_mut() {
            if !subscription.instance_name().is_empty()
                || !subscription.matches(service_type, instance_name)
                || subscription.is_resolving(instance_name)
            {
                continue;
            }

            self.telemetry
                .borrow_mut()
                .begin_service_resolution(instance_name, service_type);
            match self
                .backend
                .resolve_service(service_type, instance_name, netif_index)
            {
                Ok(handle) => {
                    log::debug!("Resolving discovered instance {instance_name}.{service_type}");
                    subscription.add_resolution(instance_name, handle);
                }
                Err(e) => {
                    log::warn!("Cannot resolve {instance_name}.{service_type}: {e}");
                    self.telemetry.borrow_mut().end_service_resolution(
                        instance_name,
                        service_type,
                        &Err(e),
                    );
                }
            }
        }
    }

    fn on_instance_removed(&mut self, service_type: &str, instance_name: &str, netif_index: u32) {
        let mut matched = false;
        for subscription in self.service_subscriptions.iter_mut() {
            if subscription.matches(service_type, instance_name) {
                matched = true;
                if subscription.remove_resolution(instance_name) {
                    self.telemetry
                        .borrow_mut()
                        .forget_service_resolution(instance_name, service_type);
                }
            }
        }
        if !matched {
            return;
        }

        log::debug!("Instance {instance_name}.{service_type} removed");
        let info = DiscoveredInstanceInfo {
            removed: true,
            netif_index,
            name: instance_name.to_string(),
            ..Default::default()
        };
        self.notify_instance(service_type, &info);
    }

    fn on_service_resolved(&mut self, service_type: &str, mut info: DiscoveredInstanceInfo) {
        let mut matched = false;
        for subscription in self.service_subscriptions.iter_mut() {
            if subscription.matches(service_type, &info.name) {
                matched = true;
                subscription.remove_resolution(&info.name);
            }
        }
        if !matched {
            log::debug!("Dropping unsolicited resolution of {}.{service_type}", info.name);
            return;
        }

        self.telemetry
            .borrow_mut()
            .end_service_resolution(&info.name, service_type, &Ok(()));
        retain_deliverable(&mut info.addresses);

        log::debug!(
            "Resolved {}.{service_type} -> {}:{} {:?}",
            info.name,
            info.host_name,
            info.port,
            info.addresses
        );
        self.notify_instance(service_type, &info);
    }

    fn on_service_resolve_failed(&mut self, service_type: &str, instance_name: &str, error: Error) {
        log::warn!("Failed to resolve {instance_name}.{service_type}: {error}");

        for subscription in self.service_subscriptions.iter_mut() {
            if subscription.matches(service_type, instance_name) {
                subscription.remove_resolution(instance_name);
            }
        }

        self.telemetry.borrow_mut().end_service_resolution(
            instance_name,
            service_type,
            &Err(error.clone()),
        );
        self.backend
            .on_service_resolve_failed(service_type, instance_name, &error);
    }

    fn on_host_resolved(&mut self, host_name: &str, mut info: DiscoveredHostInfo) {
        retain_deliverable(&mut info.addresses);

        let mut matched = false;
        let mut changed = false;
        for subscription in self.host_subscriptions.iter_mut() {
            if subscription.matches(host_name) {
                matched = true;
                changed |= subscription.update(&info);
            }
        }
        if !matched || !changed {
            return;
        }

        self.telemetry
            .borrow_mut()
            .end_host_resolution(host_name, &Ok(()));

        log::debug!("Resolved host {host_name} -> {:?}", info.addresses);
        for subscriber in &mut self.subscribers {
            if let Some(callback) = subscriber.on_host.as_mut() {
                callback(host_name, &info);
            }
        }
    }

    fn on_host_resolve_failed(&mut self, host_name: &str, error: Error) {
        log::warn!("Failed to resolve host {host_name}: {error}");
        self.telemetry
            .borrow_mut()
            .end_host_resolution(host_name, &Err(error.clone()));
        self.backend.on_host_resolve_failed(host_name, &error);
    }

    fn notify_instance(&mut self, service_type: &str, info: &DiscoveredInstanceInfo) {
        for subscriber in &mut self.subscribers {
            if let Some(callback) = subscriber.on_instance.as_mut() {
                callback(service_type, info);
            }
        }
    }
}

// A native remove of something the engine already forgot is still a success.
fn normalize_release(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::NotFound) => Ok(()),
        other => other,
    }
}

impl MainloopProcessor for Publisher {
    fn update(&mut self, context: &mut MainloopContext) {
        self.backend.update(context);
    }

    fn process(&mut self, context: &MainloopContext) {
        self.backend.process(context);
        self.dispatch_backend_events();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop();
    }
}
