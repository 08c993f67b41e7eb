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

//! Conversions between mdns-sd types and publisher types

use crate::RECORD_TTL;
use core::net::{IpAddr, Ipv6Addr};
use otbr_mdns::dns_utils::split_full_service_instance_name;
use otbr_mdns::{DiscoveredInstanceInfo, Publisher, Result, TxtEntry};

/// Extract the instance label from a full service instance name
///
/// `My BR._meshcop._udp.local.` becomes `My BR`. Names that do not parse are
/// returned unchanged.
pub fn extract_instance_name(full_name: &str) -> String {
    split_full_service_instance_name(full_name)
        .map(|parts| parts.instance)
        .unwrap_or_else(|_| full_name.to_string())
}

/// A TXT attribute in the shape `ServiceInfo::new` accepts
///
/// The daemon only takes slices of types it can turn into a `TxtProperty`
/// by reference. Going through the `(key, bytes)` conversion keeps binary
/// values intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtPair {
    key: String,
    value: Vec<u8>,
}

impl From<&TxtPair> for mdns_sd::TxtProperty {
    fn from(pair: &TxtPair) -> Self {
        (pair.key.as_str(), pair.value.as_slice()).into()
    }
}

/// Build TXT record properties from publisher entries.
///
/// Pass the result to `ServiceInfo::new` as a slice.
pub fn build_txt_properties(entries: &[TxtEntry]) -> Vec<TxtPair> {
    entries
        .iter()
        .map(|entry| TxtPair {
            key: entry.name.clone(),
            value: entry.value.clone(),
        })
        .collect()
}

/// Re-encode received TXT properties into wire format
///
/// Properties without a value become empty-valued entries.
pub fn txt_data_from_properties(properties: &mdns_sd::TxtProperties) -> Vec<u8> {
    let entries: Vec<TxtEntry> = properties
        .iter()
        .map(|property| TxtEntry::new(property.key(), property.val().unwrap_or_default()))
        .collect();

    match Publisher::encode_txt_data(&entries) {
        Ok(data) => data,
        Err(e) => {
            log::debug!("Received TXT record does not re-encode: {e}");
            vec![0]
        }
    }
}

/// IPv6 addresses out of a mixed set, sorted
pub fn ipv6_addresses<'a>(addresses: impl IntoIterator<Item = &'a IpAddr>) -> Vec<Ipv6Addr> {
    let mut v6: Vec<Ipv6Addr> = addresses
        .into_iter()
        .filter_map(|address| match address {
            IpAddr::V6(address) => Some(*address),
            IpAddr::V4(_) => None,
        })
        .collect();
    v6.sort();
    v6.dedup();
    v6
}

/// Build a discovery result from a resolved mdns-sd service
///
/// Addresses are not filtered here; the publisher drops the ones that are not
/// worth delivering.
///
/// # Errors
///
/// [`otbr_mdns::Error::Parse`] if the full name is not a service instance name.
pub fn instance_info_from_mdns(service: &mdns_sd::ServiceInfo) -> Result<DiscoveredInstanceInfo> {
    let parts = split_full_service_instance_name(service.get_fullname())?;

    Ok(DiscoveredInstanceInfo {
        removed: false,
        netif_index: 0,
        name: parts.instance,
        host_name: service.get_hostname().to_string(),
        addresses: ipv6_addresses(service.get_addresses()),
        port: service.get_port(),
        priority: 0,
        weight: 0,
        txt_data: txt_data_from_properties(service.get_properties()),
        ttl: RECORD_TTL,
    })
}
