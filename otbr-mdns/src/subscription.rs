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

//! Subscription lifecycle
//!
//! Subscriptions stay active until they are dropped. A service subscription
//! either browses a type or, when an instance name is fixed, resolves just
//! that instance. Each discovered instance gets its own resolution which is
//! removed once it resolves or fails; resolutions never affect each other.

use crate::backend::NativeHandle;
use crate::types::DiscoveredHostInfo;
use std::collections::HashMap;

/// Holds a native query and releases it exactly once
pub(crate) struct NativeQuery(Option<Box<dyn NativeHandle>>);

impl NativeQuery {
    pub(crate) fn new(handle: Box<dyn NativeHandle>) -> Self {
        Self(Some(handle))
    }
}

impl Drop for NativeQuery {
    fn drop(&mut self) {
        if let Some(mut handle) = self.0.take() {
            if let Err(e) = handle.release() {
                log::debug!("Releasing native query failed: {e}");
            }
        }
    }
}

pub(crate) struct ServiceSubscription {
    service_type: String,
    instance_name: String,
    browse: Option<NativeQuery>,
    // Keyed by lowercase instance name
    resolving: HashMap<String, NativeQuery>,
}

impl ServiceSubscription {
    pub(crate) fn new(service_type: &str, instance_name: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            browse: None,
            resolving: HashMap::new(),
        }
    }

    pub(crate) fn service_type(&self) -> &str {
        &self.service_type
    }

    pub(crate) fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub(crate) fn set_browse(&mut self, browse: Box<dyn NativeHandle>) {
        self.browse = Some(NativeQuery::new(browse));
    }

    pub(crate) fn is(&self, service_type: &str, instance_name: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
            && self.instance_name.eq_ignore_ascii_case(instance_name)
    }

    /// Whether an instance of `service_type` named `instance_name` belongs here
    pub(crate) fn matches(&self, service_type: &str, instance_name: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
            && (self.instance_name.is_empty()
                || self.instance_name.eq_ignore_ascii_case(instance_name))
    }

    pub(crate) fn is_resolving(&self, instance_name: &str) -> bool {
        self.resolving
            .contains_key(&instance_name.to_ascii_lowercase())
    }

    pub(crate) fn add_resolution(&mut self, instance_name: &str, handle: Box<dyn NativeHandle>) {
        self.resolving
            .insert(instance_name.to_ascii_lowercase(), NativeQuery::new(handle));
    }

    /// Drop the resolution for `instance_name`; true if there was one
    pub(crate) fn remove_resolution(&mut self, instance_name: &str) -> bool {
        self.resolving
            .remove(&instance_name.to_ascii_lowercase())
            .is_some()
    }

    pub(crate) fn resolving_instances(&self) -> impl Iterator<Item = &str> {
        self.resolving.keys().map(String::as_str)
    }
}

pub(crate) struct HostSubscription {
    host_name: String,
    _resolve: NativeQuery,
    resolved: Option<DiscoveredHostInfo>,
}

impl HostSubscription {
    pub(crate) fn new(host_name: &str, resolve: Box<dyn NativeHandle>) -> Self {
        Self {
            host_name: host_name.to_string(),
            _resolve: NativeQuery::new(resolve),
            resolved: None,
        }
    }

    pub(crate) fn host_name(&self) -> &str {
        &self.host_name
    }

    pub(crate) fn matches(&self, host_name: &str) -> bool {
        self.host_name.eq_ignore_ascii_case(host_name)
    }

    /// Cache `info`; false if it is what was already delivered
    pub(crate) fn update(&mut self, info: &DiscoveredHostInfo) -> bool {
        if self.resolved.as_ref() == Some(info) {
            return false;
        }
        self.resolved = Some(info.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Handle(Rc<Cell<u32>>);

    impl NativeHandle for Handle {
        fn release(&mut self) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_resolutions_are_independent() {
        let released = Rc::new(Cell::new(0));
        let mut subscription = ServiceSubscription::new("_srp._udp", "");
        subscription.set_browse(Box::new(Handle(Rc::clone(&released))));
        subscription.add_resolution("a", Box::new(Handle(Rc::clone(&released))));
        subscription.add_resolution("b", Box::new(Handle(Rc::clone(&released))));

        assert!(subscription.remove_resolution("a"));
        assert!(!subscription.remove_resolution("a"));
        assert!(subscription.is_resolving("b"));
        assert_eq!(released.get(), 1);

        drop(subscription);
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn test_resolution_names_ignore_case() {
        let released = Rc::new(Cell::new(0));
        let mut subscription = ServiceSubscription::new("_meshcop._udp", "Remote-BR");
        subscription.add_resolution("Remote-BR", Box::new(Handle(Rc::clone(&released))));

        assert!(subscription.is_resolving("remote-br"));
        assert!(subscription.remove_resolution("remote-br"));
        assert_eq!(released.get(), 1);
        assert_eq!(subscription.resolving_instances().count(), 0);
    }

    #[test]
    fn test_matching() {
        let browse = ServiceSubscription::new("_srp._udp", "");
        assert!(browse.matches("_SRP._udp", "anything"));
        assert!(!browse.matches("_meshcop._udp", "anything"));

        let fixed = ServiceSubscription::new("_srp._udp", "one");
        assert!(fixed.matches("_srp._udp", "One"));
        assert!(!fixed.matches("_srp._udp", "two"));
        assert!(fixed.is("_srp._udp", "one"));
        assert!(!browse.is("_srp._udp", "one"));
    }

    #[test]
    fn test_host_cache() {
        let released = Rc::new(Cell::new(0));
        let mut subscription = HostSubscription::new("host", Box::new(Handle(Rc::clone(&released))));
        let info = DiscoveredHostInfo {
            host_name: "host.local.".to_string(),
            addresses: vec!["fd00::1".parse().unwrap()],
            netif_index: 1,
            ttl: 120,
        };

        assert!(subscription.update(&info));
        assert!(!subscription.update(&info));
        drop(subscription);
        assert_eq!(released.get(), 1);
    }
}
