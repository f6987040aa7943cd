// ── Default gateway ──
//
// One object per gateway IP, shared by every access point that lists
// it. The location is learned from observer events; the install latch
// guards at-most-once submission of the gateway directives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use dashmap::DashSet;
use ipnet::IpNet;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::model::{ConnectPoint, GatewayAndMask, HostInfo, MacAddress};

/// How a host update changed what is known about a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChange {
    /// Nothing new.
    Unchanged,
    /// Hardware address and location became known for the first time.
    Learned,
    /// Already known, and now reported elsewhere or with another MAC.
    Relocated,
    /// Already known, and the new report is incomplete.
    Lost,
}

/// Hardware address and location of a gateway once both are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedGateway {
    pub mac: MacAddress,
    pub location: ConnectPoint,
}

pub struct DefaultGateway {
    config: GatewayConfig,
    learned: ArcSwapOption<HostInfo>,
    flows_installed: AtomicBool,
    owners: DashSet<MacAddress>,
}

impl DefaultGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            learned: ArcSwapOption::empty(),
            flows_installed: AtomicBool::new(false),
            owners: DashSet::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn address(&self) -> GatewayAndMask {
        self.config.address
    }

    pub fn subnet(&self) -> IpNet {
        self.address().subnet()
    }

    /// MAC and location, if both have been learned.
    pub fn learned(&self) -> Option<LearnedGateway> {
        let host = self.learned.load_full()?;
        if !host.is_resolved() {
            return None;
        }
        let location = host.location.clone()?;
        Some(LearnedGateway {
            mac: host.mac,
            location,
        })
    }

    pub fn is_known(&self) -> bool {
        self.learned().is_some()
    }

    /// Record the latest observer report for this gateway's address.
    ///
    /// The swap is atomic, so when several reports race only one of them
    /// observes the unknown -> known transition.
    pub fn update_host(&self, host: &HostInfo) -> LocationChange {
        let previous = self.learned.swap(Some(Arc::new(host.clone())));
        let was_known = previous.as_deref().is_some_and(HostInfo::is_resolved);
        let differs = previous.as_deref().is_none_or(|old| {
            old.mac != host.mac || old.location != host.location
        });

        match (was_known, host.is_resolved(), differs) {
            (_, _, false) => LocationChange::Unchanged,
            (false, true, true) => {
                info!(gateway = %self.address(), mac = %host.mac, "default gateway location learned");
                LocationChange::Learned
            }
            (false, false, true) => LocationChange::Unchanged,
            (true, true, true) => {
                warn!(
                    gateway = %self.address(),
                    mac = %host.mac,
                    "default gateway moved after being learned; directives left in place"
                );
                LocationChange::Relocated
            }
            (true, false, true) => {
                warn!(
                    gateway = %self.address(),
                    "default gateway no longer fully known; directives left in place"
                );
                LocationChange::Lost
            }
        }
    }

    /// Move the install latch to `installed`. Returns `true` only for the
    /// caller that performed the transition.
    pub fn set_flows_installed(&self, installed: bool) -> bool {
        self.flows_installed
            .compare_exchange(!installed, installed, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn flows_installed(&self) -> bool {
        self.flows_installed.load(Ordering::Acquire)
    }

    // ── Owners ───────────────────────────────────────────────────────

    pub(crate) fn add_owner(&self, ap: MacAddress) {
        if self.owners.insert(ap) && self.owners.len() > 1 {
            warn!(
                gateway = %self.address(),
                owners = self.owners.len(),
                "default gateway shared by multiple access points"
            );
        }
    }

    pub(crate) fn remove_owner(&self, ap: &MacAddress) -> bool {
        self.owners.remove(ap).is_some()
    }

    pub fn owners(&self) -> Vec<MacAddress> {
        let mut owners: Vec<MacAddress> = self.owners.iter().map(|m| *m).collect();
        owners.sort_unstable();
        owners
    }

    pub fn has_owners(&self) -> bool {
        !self.owners.is_empty()
    }

    pub fn summary(&self) -> DefaultGatewaySummary {
        let learned = self.learned();
        DefaultGatewaySummary {
            name: self.config.name.clone(),
            address: self.address(),
            mac: learned.as_ref().map(|l| l.mac),
            location: learned.map(|l| l.location),
            flows_installed: self.flows_installed(),
            owners: self.owners(),
        }
    }
}

/// Read-only view of a default gateway for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultGatewaySummary {
    pub name: String,
    pub address: GatewayAndMask,
    pub mac: Option<MacAddress>,
    pub location: Option<ConnectPoint>,
    pub flows_installed: bool,
    pub owners: Vec<MacAddress>,
}
