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

//! mdns-sd backend configuration

use core::time::Duration;
use otbr_mdns::{Error, Result};

/// Host label used when none is configured
pub const DEFAULT_HOST_NAME: &str = "otbr";

/// Tuning knobs for [`MdnsSdBackend`](crate::MdnsSdBackend)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsSdConfig {
    /// How often the daemon's channels are polled while queries are active
    pub poll_interval: Duration,

    /// Give up resolving a host after this long; `None` keeps querying
    pub host_resolve_timeout: Option<Duration>,

    /// Host label used for services published on the local host
    pub host_name: String,
}

impl Default for MdnsSdConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            host_resolve_timeout: None,
            host_name: DEFAULT_HOST_NAME.to_string(),
        }
    }
}

impl MdnsSdConfig {
    /// Check the configuration for consistency
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] for a zero poll interval or timeout, or
    /// an empty host name.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() || self.host_name.is_empty() {
            return Err(Error::InvalidArgs);
        }
        if self.host_resolve_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }

    pub(crate) fn host_resolve_timeout_ms(&self) -> Option<u64> {
        self.host_resolve_timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
    }
}
