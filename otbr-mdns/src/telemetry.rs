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

//! mDNS telemetry
//!
//! Counts outcomes per operation kind and keeps an exponential moving average
//! of the latency between the start of an operation and its completion.
//! Aborted operations are not counted: they say nothing about the network.

use crate::config::EmaFactor;
use crate::{Error, Result};
use std::collections::HashMap;
use tokio::time::Instant;

/// Outcome counters for one operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MdnsResponseCounters {
    /// Completed successfully
    pub success: u32,
    /// Failed with [`Error::NotFound`]
    pub not_found: u32,
    /// Failed with [`Error::InvalidArgs`]
    pub invalid_args: u32,
    /// Failed with [`Error::Duplicated`]
    pub duplicated: u32,
    /// Failed with [`Error::NotImplemented`]
    pub not_implemented: u32,
    /// Failed with anything else (except [`Error::Aborted`])
    pub unknown_error: u32,
}

impl MdnsResponseCounters {
    fn record(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.success += 1,
            Err(Error::NotFound) => self.not_found += 1,
            Err(Error::InvalidArgs) => self.invalid_args += 1,
            Err(Error::Duplicated) => self.duplicated += 1,
            Err(Error::NotImplemented) => self.not_implemented += 1,
            Err(Error::Aborted) => {}
            Err(_) => self.unknown_error += 1,
        }
    }
}

/// Snapshot of the publisher's telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MdnsTelemetryInfo {
    /// Host registration outcomes
    pub host_registrations: MdnsResponseCounters,
    /// Service registration outcomes
    pub service_registrations: MdnsResponseCounters,
    /// Host resolution outcomes
    pub host_resolutions: MdnsResponseCounters,
    /// Service instance resolution outcomes
    pub service_resolutions: MdnsResponseCounters,
    /// Host registration latency EMA, milliseconds
    pub host_registration_ema_latency: u32,
    /// Service registration latency EMA, milliseconds
    pub service_registration_ema_latency: u32,
    /// Host resolution latency EMA, milliseconds
    pub host_resolution_ema_latency: u32,
    /// Service resolution latency EMA, milliseconds
    pub service_resolution_ema_latency: u32,
}

/// Fold `latency` into `ema`; the first sample seeds the average.
///
/// An out-of-range factor (numerator above denominator, or a zero
/// denominator) takes each new sample as is.
pub(crate) fn update_ema_latency(ema: &mut Option<u32>, latency: u32, factor: EmaFactor) {
    let EmaFactor {
        numerator,
        denominator,
    } = factor;

    *ema = Some(match *ema {
        None => latency,
        Some(current) => {
            let weighted = u64::from(latency) * u64::from(numerator)
                + u64::from(current) * u64::from(denominator.saturating_sub(numerator));
            match weighted.checked_div(u64::from(denominator)) {
                Some(average) if numerator <= denominator => {
                    u32::try_from(average).unwrap_or(u32::MAX)
                }
                _ => latency,
            }
        }
    });
}

#[derive(Default)]
struct Emas {
    host_registration: Option<u32>,
    service_registration: Option<u32>,
    host_resolution: Option<u32>,
    service_resolution: Option<u32>,
}

/// Telemetry bookkeeping owned by the publisher
pub(crate) struct Telemetry {
    factor: EmaFactor,
    counters: MdnsTelemetryInfo,
    emas: Emas,
    service_registration_begin: HashMap<(String, String), Instant>,
    host_registration_begin: HashMap<String, Instant>,
    service_resolution_begin: HashMap<(String, String), Instant>,
    host_resolution_begin: HashMap<String, Instant>,
}

fn elapsed_ms(begin: Instant) -> u32 {
    u32::try_from(begin.elapsed().as_millis()).unwrap_or(u32::MAX)
}

fn finish(
    begin: Option<Instant>,
    result: &Result<()>,
    ema: &mut Option<u32>,
    factor: EmaFactor,
) {
    if matches!(result, Err(Error::Aborted)) {
        return;
    }
    if let Some(begin) = begin {
        update_ema_latency(ema, elapsed_ms(begin), factor);
    }
}

// Resolutions are answered with the advertised spelling of a name.
fn resolution_key(instance: &str, service_type: &str) -> (String, String) {
    (
        instance.to_ascii_lowercase(),
        service_type.to_ascii_lowercase(),
    )
}

impl Telemetry {
    pub(crate) fn new(factor: EmaFactor) -> Self {
        Self {
            factor,
            counters: MdnsTelemetryInfo::default(),
            emas: Emas::default(),
            service_registration_begin: HashMap::new(),
            host_registration_begin: HashMap::new(),
            service_resolution_begin: HashMap::new(),
            host_resolution_begin: HashMap::new(),
        }
    }

    pub(crate) fn info(&self) -> MdnsTelemetryInfo {
        MdnsTelemetryInfo {
            host_registration_ema_latency: self.emas.host_registration.unwrap_or(0),
            service_registration_ema_latency: self.emas.service_registration.unwrap_or(0),
            host_resolution_ema_latency: self.emas.host_resolution.unwrap_or(0),
            service_resolution_ema_latency: self.emas.service_resolution.unwrap_or(0),
            ..self.counters
        }
    }

    // An in-flight operation keeps its original start time.

    pub(crate) fn begin_service_registration(&mut self, name: &str, service_type: &str) {
        self.service_registration_begin
            .entry((name.to_string(), service_type.to_string()))
            .or_insert_with(Instant::now);
    }

    pub(crate) fn begin_host_registration(&mut self, name: &str) {
        self.host_registration_begin
            .entry(name.to_string())
            .or_insert_with(Instant::now);
    }

    pub(crate) fn begin_service_resolution(&mut self, instance: &str, service_type: &str) {
        self.service_resolution_begin
            .entry(resolution_key(instance, service_type))
            .or_insert_with(Instant::now);
    }

    pub(crate) fn begin_host_resolution(&mut self, host_name: &str) {
        self.host_resolution_begin
            .entry(host_name.to_ascii_lowercase())
            .or_insert_with(Instant::now);
    }

    pub(crate) fn end_service_registration(
        &mut self,
        name: &str,
        service_type: &str,
        result: &Result<()>,
    ) {
        self.counters.service_registrations.record(result);
        let begin = self
            .service_registration_begin
            .remove(&(name.to_string(), service_type.to_string()));
        finish(begin, result, &mut self.emas.service_registration, self.factor);
    }

    pub(crate) fn end_host_registration(&mut self, name: &str, result: &Result<()>) {
        self.counters.host_registrations.record(result);
        let begin = self.host_registration_begin.remove(name);
        finish(begin, result, &mut self.emas.host_registration, self.factor);
    }

    pub(crate) fn end_service_resolution(
        &mut self,
        instance: &str,
        service_type: &str,
        result: &Result<()>,
    ) {
        self.counters.service_resolutions.record(result);
        let begin = self
            .service_resolution_begin
            .remove(&resolution_key(instance, service_type));
        finish(begin, result, &mut self.emas.service_resolution, self.factor);
    }

    pub(crate) fn end_host_resolution(&mut self, host_name: &str, result: &Result<()>) {
        self.counters.host_resolutions.record(result);
        let begin = self
            .host_resolution_begin
            .remove(&host_name.to_ascii_lowercase());
        finish(begin, result, &mut self.emas.host_resolution, self.factor);
    }

    /// Drop pending resolution start times, e.g. when subscriptions go away
    pub(crate) fn forget_service_resolution(&mut self, instance: &str, service_type: &str) {
        self.service_resolution_begin
            .remove(&resolution_key(instance, service_type));
    }

    pub(crate) fn forget_host_resolution(&mut self, host_name: &str) {
        self.host_resolution_begin
            .remove(&host_name.to_ascii_lowercase());
    }

    #[cfg(test)]
    pub(crate) fn pending_begin_times(&self) -> usize {
        self.service_registration_begin.len()
            + self.host_registration_begin.len()
            + self.service_resolution_begin.len()
            + self.host_resolution_begin.len()
    }
}
