// ── Network observer events ──
//
// Tagged events fed into the engine by the topology/host observer.
// Only host events drive state; device events are informational.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::entity_id::ConnectPoint;
use super::host::HostInfo;

/// Any event the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    Host(HostEvent),
    Device(DeviceEvent),
}

/// Host presence change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Added(HostInfo),
    Removed(HostInfo),
    Updated {
        current: HostInfo,
        previous: Option<HostInfo>,
    },
    Moved {
        current: HostInfo,
        previous: Option<HostInfo>,
    },
}

impl HostEvent {
    /// The host record as of this event.
    pub fn host(&self) -> &HostInfo {
        match self {
            Self::Added(host) | Self::Removed(host) => host,
            Self::Updated { current, .. } | Self::Moved { current, .. } => current,
        }
    }

    pub fn kind(&self) -> HostEventKind {
        match self {
            Self::Added(_) => HostEventKind::Added,
            Self::Removed(_) => HostEventKind::Removed,
            Self::Updated { .. } => HostEventKind::Updated,
            Self::Moved { .. } => HostEventKind::Moved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HostEventKind {
    Added,
    Removed,
    Updated,
    Moved,
}

/// Switch / port lifecycle change. Logged, never acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    Added { device: String },
    Removed { device: String },
    Updated { device: String },
    Suspended { device: String },
    AvailabilityChanged { device: String, available: bool },
    PortAdded { port: ConnectPoint },
    PortUpdated { port: ConnectPoint, enabled: bool },
    PortRemoved { port: ConnectPoint },
    PortStatsUpdated { device: String },
}
