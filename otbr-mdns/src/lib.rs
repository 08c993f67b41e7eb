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

//! Border Router mDNS Publisher
//!
//! This crate advertises services and hosts over mDNS/DNS-SD and discovers
//! them, independent of the native mDNS engine doing the work. It defines the
//! publisher logic and the backend contract without being tied to a specific
//! engine.
//!
//! ## Architecture
//!
//! - **Publisher**: [`Publisher`] owns registrations and subscriptions, coalesces
//!   duplicate publish requests and fans discoveries out to subscribers
//! - **Backends**: implement [`MdnsBackend`]; adapters live in separate crates
//!   (e.g. `otbr-mdns-mock`, `otbr-mdns-sd`)
//! - **Event loop**: [`Mainloop`] drives [`MainloopProcessor`]s; the
//!   [`TaskRunner`] lets any thread post work onto the loop
//!
//! ## Threading
//!
//! Everything except [`TaskHandle`] is confined to the loop thread. Callbacks
//! are invoked on that thread and must not call back into the publisher; post
//! follow-up work through a [`TaskHandle`] instead.
//!
//! ```text
//! caller -> Publisher::publish_service -> MdnsBackend::publish_service
//!                                               |
//! callback(s) <- Registration::complete <- BackendEvent::ServiceRegistered
//! ```

pub mod backend;
pub mod config;
pub mod dns_sd;
pub mod dns_utils;
pub mod error;
pub mod mainloop;
pub mod publisher;
pub mod registration;
mod subscription;
pub mod task_runner;
pub mod telemetry;
pub mod txt;
pub mod types;

pub use backend::{BackendEvent, MdnsBackend, NativeHandle, PublisherState, RequestId};
pub use config::{EmaFactor, PublisherConfig};
pub use error::{Error, Result};
pub use mainloop::{Mainloop, MainloopContext, MainloopProcessor};
pub use publisher::{
    DiscoveredHostCallback, DiscoveredServiceInstanceCallback, Publisher, StateCallback,
    SubscriberId,
};
pub use registration::ResultCallback;
pub use task_runner::{Task, TaskHandle, TaskRunner};
pub use telemetry::{MdnsResponseCounters, MdnsTelemetryInfo};
pub use txt::{TxtEntry, TxtList};
pub use types::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostRegistrationInfo, ServiceRegistrationInfo,
};
