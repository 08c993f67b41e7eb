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

//! Registration inputs and discovery results

use crate::dns_utils::is_service_type_valid;
use crate::txt::{encode_txt_data, sort_txt_list, TxtList};
use crate::{Error, Result};
use core::net::Ipv6Addr;

/// Everything needed to advertise one service instance
///
/// Built through [`ServiceRegistrationInfo::new`], which validates the input
/// and puts sub-types and TXT entries into canonical (sorted) order. Two infos
/// are equal iff every field is equal, which is what decides whether an
/// existing registration is outdated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistrationInfo {
    /// Host name, empty for the local host
    pub host_name: String,
    /// Instance name
    pub name: String,
    /// Service type, e.g. `_meshcop._udp`
    pub service_type: String,
    /// Sorted sub-type labels
    pub sub_types: Vec<String>,
    /// Service port
    pub port: u16,
    /// TXT entries sorted by name
    pub txt_list: TxtList,
    /// `txt_list` in wire format
    pub txt_data: Vec<u8>,
}

impl ServiceRegistrationInfo {
    /// Validate and canonicalize a service registration request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] for an empty instance name, a malformed
    /// service type, an empty sub-type, or a TXT entry that does not fit.
    pub fn new(
        host_name: &str,
        name: &str,
        service_type: &str,
        sub_types: &[String],
        port: u16,
        txt_list: &[crate::TxtEntry],
    ) -> Result<Self> {
        if name.is_empty() || !is_service_type_valid(service_type) {
            return Err(Error::InvalidArgs);
        }
        if sub_types.iter().any(String::is_empty) {
            return Err(Error::InvalidArgs);
        }

        let mut sub_types = sub_types.to_vec();
        sub_types.sort();

        let mut txt_list = txt_list.to_vec();
        sort_txt_list(&mut txt_list);
        let txt_data = encode_txt_data(&txt_list)?;

        Ok(Self {
            host_name: host_name.to_string(),
            name: name.to_string(),
            service_type: service_type.to_string(),
            sub_types,
            port,
            txt_list,
            txt_data,
        })
    }

    /// Registration key, `instance.type`
    pub fn key(&self) -> String {
        service_key(&self.name, &self.service_type)
    }
}

/// Everything needed to advertise one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRegistrationInfo {
    /// Host name (without domain)
    pub name: String,
    /// Addresses to publish as AAAA records
    pub addresses: Vec<Ipv6Addr>,
}

impl HostRegistrationInfo {
    /// Validate a host registration request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if the name or address list is empty.
    pub fn new(name: &str, addresses: &[Ipv6Addr]) -> Result<Self> {
        if name.is_empty() || addresses.is_empty() {
            return Err(Error::InvalidArgs);
        }

        Ok(Self {
            name: name.to_string(),
            addresses: addresses.to_vec(),
        })
    }
}

pub(crate) fn service_key(name: &str, service_type: &str) -> String {
    format!("{name}.{service_type}")
}

/// A resolved (or withdrawn) service instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredInstanceInfo {
    /// The instance went away; only `name` and `netif_index` are meaningful
    pub removed: bool,
    /// Network interface the answer arrived on
    pub netif_index: u32,
    /// Instance name
    pub name: String,
    /// Target host name
    pub host_name: String,
    /// Routable IPv6 addresses of the host
    pub addresses: Vec<Ipv6Addr>,
    /// Service port
    pub port: u16,
    /// SRV priority
    pub priority: u16,
    /// SRV weight
    pub weight: u16,
    /// Raw TXT record data
    pub txt_data: Vec<u8>,
    /// Record TTL in seconds
    pub ttl: u32,
}

/// A resolved host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredHostInfo {
    /// Full host name as answered
    pub host_name: String,
    /// Routable IPv6 addresses
    pub addresses: Vec<Ipv6Addr>,
    /// Network interface the answer arrived on
    pub netif_index: u32,
    /// Record TTL in seconds
    pub ttl: u32,
}

/// Whether an address is worth handing to discovery subscribers.
///
/// Link-local, multicast, loopback and unspecified addresses are dropped.
pub fn is_deliverable_address(address: &Ipv6Addr) -> bool {
    let link_local = (address.segments()[0] & 0xffc0) == 0xfe80;
    !(link_local || address.is_multicast() || address.is_loopback() || address.is_unspecified())
}

pub(crate) fn retain_deliverable(addresses: &mut Vec<Ipv6Addr>) {
    addresses.retain(is_deliverable_address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxtEntry;

    #[test]
    fn test_service_info_is_canonical() {
        let info = ServiceRegistrationInfo::new(
            "",
            "br",
            "_meshcop._udp",
            &["_b".to_string(), "_a".to_string()],
            49152,
            &[TxtEntry::new("rv", "1"), TxtEntry::new("nn", "net")],
        )
        .unwrap();

        assert_eq!(info.sub_types, vec!["_a".to_string(), "_b".to_string()]);
        assert_eq!(info.txt_list[0].name, "nn");
        assert_eq!(info.txt_data, b"\x06nn=net\x04rv=1");
        assert_eq!(info.key(), "br._meshcop._udp");
    }

    #[test]
    fn test_service_info_rejects_bad_input() {
        let new = |name: &str, ty: &str, subs: &[String]| {
            ServiceRegistrationInfo::new("", name, ty, subs, 1, &[])
        };
        assert_eq!(new("", "_x._udp", &[]), Err(Error::InvalidArgs));
        assert_eq!(new("a", "x._udp", &[]), Err(Error::InvalidArgs));
        assert_eq!(new("a", "_x._udp", &[String::new()]), Err(Error::InvalidArgs));

        let long = TxtEntry::new("k", vec![0u8; 300]);
        assert_eq!(
            ServiceRegistrationInfo::new("", "a", "_x._udp", &[], 1, &[long]),
            Err(Error::InvalidArgs)
        );
    }

    #[test]
    fn test_host_info_validation() {
        let addr: Ipv6Addr = "fd00::1".parse().unwrap();
        assert!(HostRegistrationInfo::new("host", &[addr]).is_ok());
        assert_eq!(HostRegistrationInfo::new("", &[addr]), Err(Error::InvalidArgs));
        assert_eq!(HostRegistrationInfo::new("host", &[]), Err(Error::InvalidArgs));
    }

    #[test]
    fn test_deliverable_addresses() {
        let keep: Ipv6Addr = "fd11:22::1".parse().unwrap();
        let global: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut addresses = vec![
            "fe80::1".parse().unwrap(),
            keep,
            "ff02::fb".parse().unwrap(),
            Ipv6Addr::LOCALHOST,
            Ipv6Addr::UNSPECIFIED,
            global,
        ];
        retain_deliverable(&mut addresses);
        assert_eq!(addresses, vec![keep, global]);
    }
}
