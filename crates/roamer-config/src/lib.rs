//! Configuration loading for the roamer mobility engine.
//!
//! Reads a TOML file (global scalars plus `[[access_points]]` records),
//! overlays `ROAMER_`-prefixed environment variables for the globals, and
//! translates the result into a validated `roamer_core::MobilityConfig`.
//! Bad access point entries are skipped with a warning; bad globals fail
//! the whole load.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use roamer_core::config::{
    DEFAULT_GATEWAY_FLOW_PRIORITY, DEFAULT_PURGE_INTERVAL, DEFAULT_REMOVED_HOST_TIMEOUT,
    DEFAULT_ROAMING_UNICAST_PRIORITY,
};
use roamer_core::{
    AccessPointConfig, ConnectPoint, CoreError, GatewayAndMask, GatewayConfig, GeoLocation,
    MacAddress, MobilityConfig, MobilitySettings, VlanStack,
};

const ENV_PREFIX: &str = "ROAMER_";

/// Keys that may be overridden from the environment.
const GLOBAL_KEYS: [&str; 4] = [
    "gateway_flow_priority",
    "roaming_unicast_priority",
    "removed_host_timeout_secs",
    "purge_interval_secs",
];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid settings: {0}")]
    Settings(#[from] CoreError),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration, as written on disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_gateway_flow_priority")]
    pub gateway_flow_priority: u16,

    #[serde(default = "default_roaming_unicast_priority")]
    pub roaming_unicast_priority: u16,

    /// Seconds a removed host is kept before purging.
    #[serde(default = "default_removed_host_timeout_secs")]
    pub removed_host_timeout_secs: u64,

    /// Seconds between purge sweeps.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    #[serde(default)]
    pub access_points: Vec<AccessPointEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_flow_priority: default_gateway_flow_priority(),
            roaming_unicast_priority: default_roaming_unicast_priority(),
            removed_host_timeout_secs: default_removed_host_timeout_secs(),
            purge_interval_secs: default_purge_interval_secs(),
            access_points: Vec::new(),
        }
    }
}

fn default_gateway_flow_priority() -> u16 {
    DEFAULT_GATEWAY_FLOW_PRIORITY
}
fn default_roaming_unicast_priority() -> u16 {
    DEFAULT_ROAMING_UNICAST_PRIORITY
}
fn default_removed_host_timeout_secs() -> u64 {
    DEFAULT_REMOVED_HOST_TIMEOUT.as_secs()
}
fn default_purge_interval_secs() -> u64 {
    DEFAULT_PURGE_INTERVAL.as_secs()
}

/// One `[[access_points]]` record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccessPointEntry {
    pub name: String,

    /// Hardware address, e.g. "aa:bb:cc:dd:ee:01".
    pub mac: String,

    /// Uplinks as "<device>/<port>". The first one carries directives.
    #[serde(default)]
    pub connections: Vec<String>,

    /// Outermost first. Empty means untagged.
    #[serde(default)]
    pub ingress_vlans: Vec<u16>,

    #[serde(default)]
    pub gateways: Vec<GatewayEntry>,

    #[serde(default)]
    pub other_vids: Vec<OtherVidsEntry>,

    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GatewayEntry {
    #[serde(default)]
    pub name: String,

    /// Gateway address with prefix length, e.g. "10.0.0.1/24".
    pub subnet_and_address: String,

    #[serde(default)]
    pub ingress_vlans: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OtherVidsEntry {
    /// Gateway address with prefix length this mapping applies to.
    pub gateway: String,
    pub vlans: Vec<u16>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "roamer", "roamer").map_or_else(
        || PathBuf::from("roamer.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the platform config path.
pub fn load_config() -> Result<MobilityConfig, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file yields the defaults with
/// no access points.
pub fn load_config_from(path: &Path) -> Result<MobilityConfig, ConfigError> {
    debug!(path = %path.display(), "loading configuration");
    extract(Toml::file(path))?.into_mobility_config()
}

/// Load from TOML text, e.g. pushed by a management API.
pub fn load_config_from_str(toml: &str) -> Result<MobilityConfig, ConfigError> {
    extract(Toml::string(toml))?.into_mobility_config()
}

fn extract(source: impl Provider) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(source)
        .merge(Env::prefixed(ENV_PREFIX).only(&GLOBAL_KEYS));

    Ok(figment.extract()?)
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and convert into the engine's runtime configuration.
    pub fn into_mobility_config(self) -> Result<MobilityConfig, ConfigError> {
        let settings = MobilitySettings {
            gateway_flow_priority: self.gateway_flow_priority,
            roaming_unicast_priority: self.roaming_unicast_priority,
            removed_host_timeout: Duration::from_secs(self.removed_host_timeout_secs),
            purge_interval: Duration::from_secs(self.purge_interval_secs),
        };
        settings.validate()?;

        let mut seen = HashSet::new();
        let mut access_points = Vec::with_capacity(self.access_points.len());
        for (index, entry) in self.access_points.iter().enumerate() {
            match entry.to_access_point() {
                Ok(ap) if !seen.insert(ap.mac) => {
                    warn!(index, mac = %ap.mac, "duplicate access point, skipping");
                }
                Ok(ap) => access_points.push(ap),
                Err(e) => warn!(index, name = %entry.name, error = %e, "invalid access point, skipping"),
            }
        }

        Ok(MobilityConfig {
            settings,
            access_points,
        })
    }
}

impl AccessPointEntry {
    pub fn to_access_point(&self) -> Result<AccessPointConfig, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        let mac: MacAddress = self.mac.parse().map_err(|e| field_error("mac", &e))?;

        if self.connections.is_empty() {
            return Err(invalid("connections", "at least one connection is required"));
        }
        let connections = self
            .connections
            .iter()
            .map(|c| c.parse::<ConnectPoint>().map_err(|e| field_error("connections", &e)))
            .collect::<Result<Vec<_>, _>>()?;

        if self.gateways.is_empty() {
            return Err(invalid("gateways", "at least one gateway is required"));
        }
        let gateways = self
            .gateways
            .iter()
            .map(GatewayEntry::to_gateway)
            .collect::<Result<Vec<_>, _>>()?;

        let mut other_vlans = BTreeMap::new();
        for entry in &self.other_vids {
            let gateway: GatewayAndMask = entry
                .gateway
                .parse()
                .map_err(|e| field_error("other_vids.gateway", &e))?;
            let vlans = vlan_stack("other_vids.vlans", &entry.vlans)?;
            if other_vlans.insert(gateway, vlans).is_some() {
                return Err(invalid("other_vids.gateway", &format!("{gateway} listed twice")));
            }
        }

        Ok(AccessPointConfig {
            name: self.name.clone(),
            mac,
            ingress_vlans: vlan_stack("ingress_vlans", &self.ingress_vlans)?,
            gateways,
            connections,
            other_vlans,
            location: GeoLocation {
                longitude: self.longitude,
                latitude: self.latitude,
                altitude: self.altitude,
            },
        })
    }
}

impl GatewayEntry {
    pub fn to_gateway(&self) -> Result<GatewayConfig, ConfigError> {
        let address: GatewayAndMask = self
            .subnet_and_address
            .parse()
            .map_err(|e| field_error("gateways.subnet_and_address", &e))?;
        Ok(GatewayConfig {
            name: self.name.clone(),
            address,
            ingress_vlans: vlan_stack("gateways.ingress_vlans", &self.ingress_vlans)?,
        })
    }
}

fn vlan_stack(field: &str, vlans: &[u16]) -> Result<VlanStack, ConfigError> {
    VlanStack::try_from(vlans).map_err(|e| field_error(field, &e))
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

fn field_error(field: &str, err: &CoreError) -> ConfigError {
    invalid(field, &err.to_string())
}
