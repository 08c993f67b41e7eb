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

//! DNS-SD name helpers

use crate::{Error, Result};

/// Default mDNS domain
pub const LOCAL_DOMAIN: &str = "local.";

/// Maximum length of a single DNS label (RFC 1035)
pub const MAX_LABEL_LENGTH: usize = 63;

/// A service instance name split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstanceName {
    /// Instance label, may itself contain dots
    pub instance: String,
    /// Service type, e.g. `_meshcop._udp`
    pub service_type: String,
    /// Domain with a trailing dot, e.g. `local.`
    pub domain: String,
}

fn is_protocol_label(label: &str) -> bool {
    label.eq_ignore_ascii_case("_tcp") || label.eq_ignore_ascii_case("_udp")
}

fn is_service_label(label: &str) -> bool {
    label.len() > 1 && label.len() <= MAX_LABEL_LENGTH && label.starts_with('_')
}

/// Check that `service_type` has the `_name._tcp` / `_name._udp` form
///
/// # Example
///
/// ```
/// use otbr_mdns::dns_utils::is_service_type_valid;
///
/// assert!(is_service_type_valid("_meshcop._udp"));
/// assert!(!is_service_type_valid("meshcop._udp"));
/// ```
pub fn is_service_type_valid(service_type: &str) -> bool {
    match service_type.split('.').collect::<Vec<_>>().as_slice() {
        [service, protocol] => is_service_label(service) && is_protocol_label(protocol),
        _ => false,
    }
}

/// Split `instance._service._proto.domain.` into its parts.
///
/// The service labels are located from the right, so instance labels that
/// contain dots are kept whole.
///
/// # Errors
///
/// Returns [`Error::Parse`] if no `_service._proto` pair is present or the
/// instance or domain part is empty.
pub fn split_full_service_instance_name(full_name: &str) -> Result<ServiceInstanceName> {
    let labels: Vec<&str> = full_name.trim_end_matches('.').split('.').collect();
    let proto = labels
        .iter()
        .rposition(|label| is_protocol_label(label))
        .ok_or(Error::Parse)?;

    if proto < 2 || !is_service_label(labels[proto - 1]) || proto + 1 >= labels.len() {
        return Err(Error::Parse);
    }

    Ok(ServiceInstanceName {
        instance: labels[..proto - 1].join("."),
        service_type: labels[proto - 1..=proto].join("."),
        domain: format!("{}.", labels[proto + 1..].join(".")),
    })
}

/// Split `_service._proto.domain.` into service type and domain.
///
/// # Errors
///
/// Returns [`Error::Parse`] on a malformed name.
pub fn split_full_service_name(full_name: &str) -> Result<(String, String)> {
    let labels: Vec<&str> = full_name.trim_end_matches('.').split('.').collect();
    if labels.len() < 3 || !is_service_label(labels[0]) || !is_protocol_label(labels[1]) {
        return Err(Error::Parse);
    }

    Ok((
        labels[..2].join("."),
        format!("{}.", labels[2..].join(".")),
    ))
}

/// Split `host.domain.` into host label and domain.
///
/// # Errors
///
/// Returns [`Error::Parse`] if either part is empty.
pub fn split_full_host_name(full_name: &str) -> Result<(String, String)> {
    let trimmed = full_name.trim_end_matches('.');
    match trimmed.split_once('.') {
        Some((host, domain)) if !host.is_empty() && !domain.is_empty() => {
            Ok((host.to_string(), format!("{domain}.")))
        }
        _ => Err(Error::Parse),
    }
}

/// `_meshcop._udp` -> `_meshcop._udp.local.`
pub fn full_service_type(service_type: &str) -> String {
    format!("{}.{LOCAL_DOMAIN}", service_type.trim_end_matches('.'))
}

/// `otbr` -> `otbr.local.`; names already carrying the domain are kept.
pub fn full_host_name(host_name: &str) -> String {
    let trimmed = host_name.trim_end_matches('.');
    let suffix = LOCAL_DOMAIN.trim_end_matches('.');
    if trimmed.to_ascii_lowercase().ends_with(&format!(".{suffix}")) {
        format!("{trimmed}.")
    } else {
        format!("{trimmed}.{LOCAL_DOMAIN}")
    }
}

/// `instance` + `_meshcop._udp` -> `instance._meshcop._udp.local.`
pub fn full_service_instance_name(instance: &str, service_type: &str) -> String {
    format!("{instance}.{}", full_service_type(service_type))
}
