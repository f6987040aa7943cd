// ── Observed host record ──
//
// What the network observer knows about an attached host at the time an
// event fires. The engine never mutates these; it derives mobile-host
// and gateway state from them.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::entity_id::{ConnectPoint, MacAddress, VlanId};

/// Host presence information reported by the network observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub mac: MacAddress,
    pub vlan: Option<VlanId>,
    pub ip_addresses: BTreeSet<IpAddr>,
    pub location: Option<ConnectPoint>,
}

impl HostInfo {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            vlan: None,
            ip_addresses: BTreeSet::new(),
            location: None,
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_addresses.insert(ip);
        self
    }

    pub fn with_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn at(mut self, location: ConnectPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Both a usable hardware address and a location are present.
    pub fn is_resolved(&self) -> bool {
        !self.mac.is_zero() && self.location.is_some()
    }
}
