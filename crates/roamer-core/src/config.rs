// ── Runtime mobility configuration ──
//
// These types describe the access points the engine manages and the
// global knobs that shape its directives. They never touch disk:
// roamer-config (or any other loader) builds a `MobilityConfig` and
// hands it to `Engine::reconfigure`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::model::{ConnectPoint, GatewayAndMask, MacAddress, VlanStack};

pub const DEFAULT_GATEWAY_FLOW_PRIORITY: u16 = 10_000;
pub const DEFAULT_ROAMING_UNICAST_PRIORITY: u16 = 20_000;
pub const DEFAULT_REMOVED_HOST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide parameters. Swapped atomically on reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MobilitySettings {
    /// Priority of the per-subnet default-gateway directives.
    pub gateway_flow_priority: u16,
    /// Priority of the per-host roaming directives. Must outrank the
    /// gateway directives so a roaming host is matched first.
    pub roaming_unicast_priority: u16,
    /// Grace period between a host disappearing and being purged.
    pub removed_host_timeout: Duration,
    /// How often the purge sweep runs.
    pub purge_interval: Duration,
}

impl Default for MobilitySettings {
    fn default() -> Self {
        Self {
            gateway_flow_priority: DEFAULT_GATEWAY_FLOW_PRIORITY,
            roaming_unicast_priority: DEFAULT_ROAMING_UNICAST_PRIORITY,
            removed_host_timeout: DEFAULT_REMOVED_HOST_TIMEOUT,
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl MobilitySettings {
    /// Reject values that would make directives or the purge sweep
    /// meaningless.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::ValidationFailed {
                message: message.to_owned(),
            })
        };
        if self.gateway_flow_priority == 0 {
            return invalid("gateway flow priority must be non-zero");
        }
        if self.roaming_unicast_priority == 0 {
            return invalid("roaming unicast priority must be non-zero");
        }
        if self.removed_host_timeout.is_zero() {
            return invalid("removed host timeout must be non-zero");
        }
        if self.purge_interval.is_zero() {
            return invalid("purge interval must be non-zero");
        }
        Ok(())
    }
}

/// An upstream router serving one subnet behind an access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayConfig {
    pub name: String,
    pub address: GatewayAndMask,
    pub ingress_vlans: VlanStack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GeoLocation {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
}

/// Static description of one access point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPointConfig {
    pub name: String,
    pub mac: MacAddress,
    pub ingress_vlans: VlanStack,
    pub gateways: Vec<GatewayConfig>,
    /// Uplink ports into the fabric. Only the first one carries directives.
    pub connections: Vec<ConnectPoint>,
    /// Extra VLANs carried toward a given gateway.
    pub other_vlans: BTreeMap<GatewayAndMask, VlanStack>,
    pub location: GeoLocation,
}

impl AccessPointConfig {
    pub fn new(name: impl Into<String>, mac: MacAddress) -> Self {
        Self {
            name: name.into(),
            mac,
            ingress_vlans: VlanStack::untagged(),
            gateways: Vec::new(),
            connections: Vec::new(),
            other_vlans: BTreeMap::new(),
            location: GeoLocation::default(),
        }
    }

    pub fn with_connection(mut self, connection: ConnectPoint) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn with_ingress_vlans(mut self, vlans: VlanStack) -> Self {
        self.ingress_vlans = vlans;
        self
    }

    pub fn primary_connection(&self) -> Option<&ConnectPoint> {
        self.connections.first()
    }

    /// Classify how `next` differs from this configuration.
    pub fn compare(&self, next: &Self) -> ConfigChange {
        if self == next {
            return ConfigChange::Unchanged;
        }
        let structural = self.mac != next.mac
            || self.connections != next.connections
            || self.ingress_vlans != next.ingress_vlans
            || self.gateways != next.gateways;
        if structural {
            ConfigChange::Structural
        } else {
            ConfigChange::Cosmetic
        }
    }
}

/// Outcome of comparing two configurations of the same access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Unchanged,
    /// Name, geolocation or auxiliary VLANs only; applied in place.
    Cosmetic,
    /// Anything that shapes directives; requires a rebuild.
    Structural,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MobilityConfig {
    pub settings: MobilitySettings,
    pub access_points: Vec<AccessPointConfig>,
}
