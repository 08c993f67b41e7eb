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

//! Backend capability contract
//!
//! A backend adapts one native mDNS engine to the [`Publisher`](crate::Publisher).
//! It issues native requests and reports what happened through
//! [`BackendEvent`]s, which the publisher drains on the loop thread. Native
//! resources are returned as [`NativeHandle`]s that the publisher's
//! registration and subscription objects own exclusively.

use crate::mainloop::MainloopContext;
use crate::types::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostRegistrationInfo, ServiceRegistrationInfo,
};
use crate::{Error, Result};

/// Identifies one native publish request
pub type RequestId = u64;

/// Publisher readiness, driven by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    /// Not usable: not started, stopped, or the engine went away
    Idle,
    /// The engine is operational
    Ready,
}

/// A native resource (record set, browse or resolve query)
///
/// Owned by exactly one registration or subscription and released once.
pub trait NativeHandle {
    /// Withdraw the resource from the engine
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the engine no longer knows the resource.
    fn release(&mut self) -> Result<()>;
}

/// Something the engine reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The engine became ready or went away
    StateChanged(PublisherState),

    /// A service publish request finished
    ServiceRegistered {
        /// Instance name
        name: String,
        /// Service type
        service_type: String,
        /// Request the outcome belongs to
        request_id: RequestId,
        /// Outcome
        result: Result<()>,
    },

    /// A host publish request finished
    HostRegistered {
        /// Host name
        name: String,
        /// Request the outcome belongs to
        request_id: RequestId,
        /// Outcome
        result: Result<()>,
    },

    /// A browse found an instance that still needs resolving
    InstanceAdded {
        /// Service type browsed
        service_type: String,
        /// Instance name
        instance_name: String,
        /// Interface it was seen on
        netif_index: u32,
    },

    /// A browsed instance went away
    InstanceRemoved {
        /// Service type browsed
        service_type: String,
        /// Instance name
        instance_name: String,
        /// Interface it was seen on
        netif_index: u32,
    },

    /// An instance resolved
    InstanceResolved {
        /// Service type
        service_type: String,
        /// Resolved data
        info: DiscoveredInstanceInfo,
    },

    /// Resolving an instance failed with an engine-specific code
    InstanceResolveFailed {
        /// Service type
        service_type: String,
        /// Instance name
        instance_name: String,
        /// Native error code, see [`MdnsBackend::dns_error_to_error`]
        code: i32,
    },

    /// A host resolved
    HostResolved {
        /// Host name queried
        host_name: String,
        /// Resolved data
        info: DiscoveredHostInfo,
    },

    /// Resolving a host failed with an engine-specific code
    HostResolveFailed {
        /// Host name queried
        host_name: String,
        /// Native error code
        code: i32,
    },
}

/// Operations a native engine adapter provides to the publisher
///
/// Inputs reaching the publish methods are already validated and sorted.
/// Each publish request must eventually produce exactly one
/// [`BackendEvent::ServiceRegistered`] / [`BackendEvent::HostRegistered`]
/// carrying its request id, either right away or later, unless the method
/// itself returns an error.
pub trait MdnsBackend {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Bring the engine up; readiness is reported with
    /// [`BackendEvent::StateChanged`]
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    fn start(&mut self) -> Result<()>;

    /// Tear the engine down; outstanding handles may fail to release after this
    fn stop(&mut self);

    /// Issue a native service publication
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued at all.
    fn publish_service(
        &mut self,
        request_id: RequestId,
        info: &ServiceRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>>;

    /// Issue a native host publication
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued at all.
    fn publish_host(
        &mut self,
        request_id: RequestId,
        info: &HostRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>>;

    /// Start browsing for instances of `service_type`
    ///
    /// # Errors
    ///
    /// Returns an error if the browse could not be started.
    fn browse_service(&mut self, service_type: &str) -> Result<Box<dyn NativeHandle>>;

    /// Start resolving one instance
    ///
    /// # Errors
    ///
    /// Returns an error if the query could not be started.
    fn resolve_service(
        &mut self,
        service_type: &str,
        instance_name: &str,
        netif_index: u32,
    ) -> Result<Box<dyn NativeHandle>>;

    /// Start resolving a host's addresses
    ///
    /// # Errors
    ///
    /// Returns an error if the query could not be started.
    fn resolve_host(&mut self, host_name: &str) -> Result<Box<dyn NativeHandle>>;

    /// Engine-specific cleanup after an instance failed to resolve
    fn on_service_resolve_failed(&mut self, service_type: &str, instance_name: &str, error: &Error);

    /// Engine-specific cleanup after a host failed to resolve
    fn on_host_resolve_failed(&mut self, host_name: &str, error: &Error);

    /// Translate a native error code into the publisher taxonomy
    fn dns_error_to_error(&self, code: i32) -> Error;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<BackendEvent>;

    /// Lower the loop timeout to the engine's next deadline
    fn update(&mut self, _context: &mut MainloopContext) {}

    /// Collect whatever the engine produced during the wait
    fn process(&mut self, _context: &MainloopContext) {}
}
