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

//! mDNS backend for the border router publisher using mdns-sd
//!
//! This crate provides the production [`MdnsBackend`](otbr_mdns::MdnsBackend)
//! on top of the `mdns-sd` library. The daemon runs on its own thread; the
//! backend polls its channels from the publisher's event loop.
//!
//! # Limitations
//!
//! - Only the first sub-type of a service is advertised
//! - Hosts cannot be advertised on their own; their addresses are attached to
//!   services published on them
//! - A service on a named host is held back until that host is published
//! - Name conflicts are resolved by the daemon and never reported back
//!
//! # Example
//!
//! ```no_run
//! use otbr_mdns::{Publisher, PublisherConfig};
//! use otbr_mdns_sd::{MdnsSdBackend, MdnsSdConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MdnsSdBackend::new(MdnsSdConfig::default())?;
//! let mut publisher = Publisher::new(Box::new(backend), &PublisherConfig::default())?;
//! publisher.start()?;
//! publisher.subscribe_service("_meshcop._udp", "")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
pub mod utils;

pub use backend::MdnsSdBackend;
pub use config::{MdnsSdConfig, DEFAULT_HOST_NAME};

/// TTL reported for answers, mdns-sd's default for host records
pub const RECORD_TTL: u32 = 120;
