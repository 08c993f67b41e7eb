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

//! Publisher configuration

use crate::{Error, Result};
use core::time::Duration;

/// Weight given to a new latency sample in the moving average, as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmaFactor {
    /// Numerator
    pub numerator: u32,
    /// Denominator
    pub denominator: u32,
}

impl Default for EmaFactor {
    fn default() -> Self {
        Self {
            numerator: 1,
            denominator: 2,
        }
    }
}

/// Publisher tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Smoothing factor for latency telemetry
    pub ema_factor: EmaFactor,

    /// Upper bound on a single event-loop wait
    pub max_poll_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ema_factor: EmaFactor::default(),
            max_poll_timeout: Duration::from_secs(10),
        }
    }
}

impl PublisherConfig {
    /// Check the configuration for consistency
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if the EMA factor is not a fraction in
    /// `(0, 1]` or the poll timeout is zero.
    pub fn validate(&self) -> Result<()> {
        let EmaFactor {
            numerator,
            denominator,
        } = self.ema_factor;

        if numerator == 0 || denominator == 0 || numerator > denominator {
            return Err(Error::InvalidArgs);
        }
        if self.max_poll_timeout.is_zero() {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }
}
