// ── Core identity types ──
//
// MacAddress identifies access points, hosts and learned gateways.
// VlanId / VlanStack describe tagged ingress traffic, and ConnectPoint
// names a switch port in the fabric.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, displayed in lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: Self = Self([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// The all-zero address some observers report before a host is resolved.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    /// Accepts colon-separated or dash-separated hex in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMacAddress {
            value: s.to_owned(),
        };

        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for slot in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

// ── VlanId ──────────────────────────────────────────────────────────

/// A single 802.1Q VLAN id in the usable range 1-4094.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    pub fn value(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidVlan {
                value: value.to_string(),
            })
        }
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> Self {
        vlan.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── VlanStack ───────────────────────────────────────────────────────

/// Ordered VLAN tag stack, outermost tag first. Empty means untagged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VlanStack(Vec<VlanId>);

impl VlanStack {
    pub fn untagged() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tags(&self) -> &[VlanId] {
        &self.0
    }
}

impl From<Vec<VlanId>> for VlanStack {
    fn from(tags: Vec<VlanId>) -> Self {
        Self(tags)
    }
}

impl TryFrom<&[u16]> for VlanStack {
    type Error = CoreError;

    fn try_from(raw: &[u16]) -> Result<Self, Self::Error> {
        raw.iter()
            .map(|&v| VlanId::try_from(v))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for VlanStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{tag}")?;
        }
        Ok(())
    }
}

// ── ConnectPoint ────────────────────────────────────────────────────

/// A switch port in the fabric, written as `<device>/<port>`
/// (e.g. `of:0000000000000001/1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectPoint {
    device: String,
    port: u64,
}

impl ConnectPoint {
    pub fn new(device: impl Into<String>, port: u64) -> Self {
        Self {
            device: device.into(),
            port,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn port(&self) -> u64 {
        self.port
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.port)
    }
}

impl FromStr for ConnectPoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidConnectPoint {
            value: s.to_owned(),
        };
        let (device, port) = s.trim().rsplit_once('/').ok_or_else(invalid)?;
        if device.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(device, port))
    }
}

impl TryFrom<String> for ConnectPoint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectPoint> for String {
    fn from(cp: ConnectPoint) -> Self {
        cp.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_normalizes_dashes() {
        let mac: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_address_normalizes_case() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_address_rejects_garbage() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddress>().is_err());
        assert!("aabbccddeeff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn mac_address_rejects_signed_octets() {
        assert!("+a:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:+f".parse::<MacAddress>().is_err());
    }

    #[test]
    fn mac_address_serde_uses_string_form() {
        let mac: MacAddress = "BB:BB:BB:BB:BB:01".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"bb:bb:bb:bb:bb:01\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn broadcast_is_all_ones() {
        assert_eq!(MacAddress::BROADCAST.to_string(), "ff:ff:ff:ff:ff:ff");
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::new([0; 6]).is_zero());
    }

    #[test]
    fn vlan_id_range_is_enforced() {
        assert!(VlanId::try_from(0).is_err());
        assert!(VlanId::try_from(4095).is_err());
        assert_eq!(VlanId::try_from(100).unwrap().value(), 100);
    }

    #[test]
    fn vlan_stack_display_is_outermost_first() {
        let stack = VlanStack::try_from([100u16, 200].as_slice()).unwrap();
        assert_eq!(stack.to_string(), "100,200");
        assert!(VlanStack::untagged().is_empty());
    }

    #[test]
    fn connect_point_parses_openflow_ids() {
        let cp: ConnectPoint = "of:0000000000000001/3".parse().unwrap();
        assert_eq!(cp.device(), "of:0000000000000001");
        assert_eq!(cp.port(), 3);
        assert_eq!(cp.to_string(), "of:0000000000000001/3");
    }

    #[test]
    fn connect_point_requires_numeric_port() {
        assert!("of:0000000000000001".parse::<ConnectPoint>().is_err());
        assert!("of:0000000000000001/x".parse::<ConnectPoint>().is_err());
        assert!("/1".parse::<ConnectPoint>().is_err());
    }
}
