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

//! Publisher backend on top of the in-memory engine

use crate::engine::{EngineEvent, MockEngine, OwnerId, QueryId, QueryKind};
use otbr_mdns::dns_sd;
use otbr_mdns::{
    BackendEvent, Error, HostRegistrationInfo, MdnsBackend, NativeHandle, PublisherState,
    RequestId, Result, ServiceRegistrationInfo,
};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Mock implementation of [`MdnsBackend`]
///
/// Each backend is a separate participant on the engine: records it
/// publishes conflict with other backends' records of the same name.
pub struct MockBackend {
    engine: MockEngine,
    owner: OwnerId,
    events: Option<broadcast::Receiver<EngineEvent>>,
    pending: VecDeque<BackendEvent>,
}

impl MockBackend {
    /// Create a backend attached to `engine`
    ///
    /// # Example
    ///
    /// ```
    /// use otbr_mdns::{Publisher, PublisherConfig};
    /// use otbr_mdns_mock::{MockBackend, MockEngine};
    ///
    /// let engine = MockEngine::new();
    /// let backend = MockBackend::new(engine.clone());
    /// let mut publisher = Publisher::new(Box::new(backend), &PublisherConfig::default()).unwrap();
    /// publisher.start().unwrap();
    /// assert!(publisher.is_started());
    /// ```
    pub fn new(engine: MockEngine) -> Self {
        let owner = engine.register_owner();
        Self {
            engine,
            owner,
            events: None,
            pending: VecDeque::new(),
        }
    }

    /// The engine this backend talks to
    pub fn engine(&self) -> &MockEngine {
        &self.engine
    }

    /// This backend's identity on the engine
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    fn drain_engine_events(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };

        loop {
            match events.try_recv() {
                Ok(EngineEvent { owner, event }) => {
                    if owner.map_or(true, |owner| owner == self.owner) {
                        self.pending.push_back(event);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    log::warn!("Mock backend {} missed {missed} engine events", self.owner);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn query(&self, kind: QueryKind) -> Result<Box<dyn NativeHandle>> {
        let id = self.engine.add_query(self.owner, kind)?;
        Ok(Box::new(MockQuery {
            engine: self.engine.clone(),
            id,
        }))
    }
}

impl MdnsBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&mut self) -> Result<()> {
        if self.events.is_some() {
            return Ok(());
        }

        self.events = Some(self.engine.subscribe());
        if self.engine.is_available() {
            self.pending
                .push_back(BackendEvent::StateChanged(PublisherState::Ready));
        } else {
            log::info!("Mock engine is down, waiting for it");
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.events = None;
        self.pending.clear();
        self.engine.forget_owner(self.owner);
    }

    fn publish_service(
        &mut self,
        request_id: RequestId,
        info: &ServiceRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>> {
        self.engine.publish_service(self.owner, request_id, info)?;
        Ok(Box::new(MockRecord {
            engine: self.engine.clone(),
            owner: self.owner,
            record: Record::Service {
                name: info.name.clone(),
                service_type: info.service_type.clone(),
            },
        }))
    }

    fn publish_host(
        &mut self,
        request_id: RequestId,
        info: &HostRegistrationInfo,
    ) -> Result<Box<dyn NativeHandle>> {
        self.engine.publish_host(self.owner, request_id, info)?;
        Ok(Box::new(MockRecord {
            engine: self.engine.clone(),
            owner: self.owner,
            record: Record::Host {
                name: info.name.clone(),
            },
        }))
    }

    fn browse_service(&mut self, service_type: &str) -> Result<Box<dyn NativeHandle>> {
        self.query(QueryKind::Browse {
            service_type: service_type.to_string(),
        })
    }

    fn resolve_service(
        &mut self,
        service_type: &str,
        instance_name: &str,
        netif_index: u32,
    ) -> Result<Box<dyn NativeHandle>> {
        self.query(QueryKind::ResolveService {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            netif_index,
        })
    }

    fn resolve_host(&mut self, host_name: &str) -> Result<Box<dyn NativeHandle>> {
        self.query(QueryKind::ResolveHost {
            host_name: host_name.to_string(),
        })
    }

    fn on_service_resolve_failed(&mut self, service_type: &str, instance_name: &str, error: &Error) {
        log::debug!("Mock resolution of {instance_name}.{service_type} failed: {error}");
    }

    fn on_host_resolve_failed(&mut self, host_name: &str, error: &Error) {
        log::debug!("Mock resolution of host {host_name} failed: {error}");
    }

    fn dns_error_to_error(&self, code: i32) -> Error {
        dns_sd::dns_error_to_error(code)
    }

    fn poll_event(&mut self) -> Option<BackendEvent> {
        self.drain_engine_events();
        self.pending.pop_front()
    }
}

enum Record {
    Service { name: String, service_type: String },
    Host { name: String },
}

/// A record set registered on the engine
struct MockRecord {
    engine: MockEngine,
    owner: OwnerId,
    record: Record,
}

impl NativeHandle for MockRecord {
    fn release(&mut self) -> Result<()> {
        match &self.record {
            Record::Service { name, service_type } => {
                self.engine.withdraw_service(self.owner, name, service_type)
            }
            Record::Host { name } => self.engine.withdraw_host(self.owner, name),
        }
    }
}

/// A browse or resolve query on the engine
struct MockQuery {
    engine: MockEngine,
    id: QueryId,
}

impl NativeHandle for MockQuery {
    fn release(&mut self) -> Result<()> {
        self.engine.remove_query(self.id)
    }
}
