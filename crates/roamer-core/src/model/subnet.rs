// ── Gateway address and mask ──
//
// A default gateway is configured as `address/prefix` (e.g. 10.0.0.1/24):
// the host part is the router's own address, the prefix delimits the
// subnet it serves.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Gateway IP address plus the prefix length of the subnet behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayAndMask(IpNet);

impl GatewayAndMask {
    pub fn new(gateway: IpAddr, prefix_len: u8) -> Result<Self, CoreError> {
        IpNet::new(gateway, prefix_len)
            .map(Self)
            .map_err(|e| CoreError::InvalidSubnet {
                value: format!("{gateway}/{prefix_len}"),
                reason: e.to_string(),
            })
    }

    /// The router's own address.
    pub fn gateway(&self) -> IpAddr {
        self.0.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// The subnet served by this gateway, host bits cleared.
    pub fn subnet(&self) -> IpNet {
        self.0.trunc()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }

    pub fn is_ipv4(&self) -> bool {
        self.gateway().is_ipv4()
    }
}

impl fmt::Display for GatewayAndMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GatewayAndMask {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CoreError::InvalidSubnet {
            value: s.to_owned(),
            reason,
        };
        let (host, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected <address>/<prefix length>".into()))?;
        let gateway = host
            .parse::<IpAddr>()
            .map_err(|_| invalid(format!("invalid IP address '{host}'")))?;
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|_| invalid(format!("invalid prefix length '{prefix}'")))?;
        Self::new(gateway, prefix_len)
    }
}
