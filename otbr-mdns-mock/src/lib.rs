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

//! Mock mDNS engine for testing
//!
//! This crate provides an in-memory mDNS engine and a publisher backend on
//! top of it, useful for testing applications without requiring actual mDNS
//! networking. Several backends attached to one engine see each other's
//! records, so conflicts and discovery behave as they would on a link.
//!
//! # Example
//!
//! ```
//! use otbr_mdns::{Publisher, PublisherConfig};
//! use otbr_mdns_mock::MockEngine;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let engine = MockEngine::new();
//! let mut publisher =
//!     Publisher::new(Box::new(engine.backend()), &PublisherConfig::default()).unwrap();
//! publisher.start().unwrap();
//!
//! let outcome = Rc::new(RefCell::new(None));
//! let sink = Rc::clone(&outcome);
//! publisher
//!     .publish_service(
//!         "",
//!         "Test Device",
//!         "_meshcop._udp",
//!         &[],
//!         49152,
//!         &[],
//!         Box::new(move |result| *sink.borrow_mut() = Some(result)),
//!     )
//!     .unwrap();
//!
//! assert_eq!(*outcome.borrow(), Some(Ok(())));
//! assert_eq!(engine.service_count(), 1);
//! ```

mod backend;
mod engine;

pub use backend::MockBackend;
pub use engine::{MockEngine, OwnerId, LOCAL_HOST_NAME, NETIF_INDEX, RECORD_TTL};
