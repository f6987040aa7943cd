// ── Access point ──
//
// Runtime state of one access point: an immutable configuration
// snapshot, the default gateways it serves, the hosts homed here and the
// hosts roaming here from elsewhere. The default-gateway directives of
// the access point are owned and tracked here.

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AccessPointConfig, ConfigChange};
use crate::flow::{
    ConnectPointPair, DirectiveKind, Endpoint, FlowContext, FlowDirective, FlowLedger,
    InstalledDirective,
};
use crate::gateway::DefaultGateway;
use crate::mobile_host::MobileHost;
use crate::model::{ConnectPoint, GatewayAndMask, MacAddress};

pub struct AccessPoint {
    mac: MacAddress,
    config: ArcSwap<AccessPointConfig>,
    gateways: DashMap<GatewayAndMask, Arc<DefaultGateway>>,
    /// Hosts whose home is this access point, wherever they are now.
    local_hosts: DashMap<MacAddress, Arc<MobileHost>>,
    /// Hosts homed elsewhere, currently attached here.
    roaming_hosts: DashMap<MacAddress, Arc<MobileHost>>,
    gateway_north: FlowLedger,
    gateway_south: FlowLedger,
}

impl AccessPoint {
    pub fn new(config: AccessPointConfig) -> Self {
        let mac = config.mac;
        Self {
            mac,
            config: ArcSwap::from_pointee(config),
            gateways: DashMap::new(),
            local_hosts: DashMap::new(),
            roaming_hosts: DashMap::new(),
            gateway_north: FlowLedger::new(format!("ap {mac} northbound")),
            gateway_south: FlowLedger::new(format!("ap {mac} southbound")),
        }
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn name(&self) -> String {
        self.config.load().name.clone()
    }

    pub fn config(&self) -> Arc<AccessPointConfig> {
        self.config.load_full()
    }

    /// Whether `location` is one of this access point's uplinks.
    pub fn owns_location(&self, location: &ConnectPoint) -> bool {
        self.config.load().connections.contains(location)
    }

    /// Whether any configured gateway subnet contains `ip`.
    pub fn serves(&self, ip: &IpAddr) -> bool {
        self.config
            .load()
            .gateways
            .iter()
            .any(|gw| gw.address.contains(ip))
    }

    // ── Gateways ─────────────────────────────────────────────────────

    pub(crate) fn attach_gateway(&self, address: GatewayAndMask, gateway: Arc<DefaultGateway>) {
        self.gateways.insert(address, gateway);
    }

    /// Gateways in address order.
    pub fn gateways(&self) -> Vec<Arc<DefaultGateway>> {
        let mut gateways: Vec<(GatewayAndMask, Arc<DefaultGateway>)> = self
            .gateways
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        gateways.sort_unstable_by_key(|(address, _)| *address);
        gateways.into_iter().map(|(_, gw)| gw).collect()
    }

    // ── Hosts ────────────────────────────────────────────────────────

    pub fn local_host(&self, mac: &MacAddress) -> Option<Arc<MobileHost>> {
        self.local_hosts.get(mac).map(|r| Arc::clone(r.value()))
    }

    pub fn roaming_host(&self, mac: &MacAddress) -> Option<Arc<MobileHost>> {
        self.roaming_hosts.get(mac).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of the hosts homed here.
    pub fn local_hosts(&self) -> Vec<Arc<MobileHost>> {
        self.local_hosts.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Snapshot of the hosts roaming here.
    pub fn roaming_hosts(&self) -> Vec<Arc<MobileHost>> {
        self.roaming_hosts.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub(crate) fn add_local_host(&self, host: &Arc<MobileHost>) -> bool {
        match self.local_hosts.entry(host.mac()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(ap = %self.mac, host = %host.mac(), "local host added");
                slot.insert(Arc::clone(host));
                true
            }
        }
    }

    /// Register a visiting host and install its roaming directives here.
    pub(crate) fn add_roaming_host(&self, host: &Arc<MobileHost>, ctx: FlowContext<'_>) -> bool {
        let inserted = match self.roaming_hosts.entry(host.mac()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(host));
                true
            }
        };
        if inserted {
            info!(
                ap = %self.mac,
                host = %host.mac(),
                home = %host.home_access_point().mac(),
                "host roaming"
            );
            host.install_roaming_directives(self, ctx);
        }
        inserted
    }

    /// Drop `mac` from both host maps, withdrawing its roaming
    /// directives here if it was visiting.
    pub(crate) fn remove_host(&self, mac: &MacAddress, ctx: FlowContext<'_>) -> bool {
        let roaming = self.roaming_hosts.remove(mac);
        if let Some((_, host)) = &roaming {
            info!(ap = %self.mac, host = %mac, "roaming host left");
            host.withdraw_roaming_directives(self, ctx);
        }
        let local = self.local_hosts.remove(mac);
        if local.is_some() {
            debug!(ap = %self.mac, host = %mac, "local host removed");
        }
        roaming.is_some() || local.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Install default-gateway directives for every gateway with a known
    /// location. Returns how many gateways were newly installed.
    pub(crate) fn on_startup(&self, ctx: FlowContext<'_>) -> usize {
        self.gateways()
            .iter()
            .filter(|gw| self.install_gateway_directives(gw, ctx))
            .count()
    }

    /// Withdraw every directive this access point owns and forget its
    /// hosts. Returns the hosts that were homed here.
    pub(crate) fn on_shutdown(&self, ctx: FlowContext<'_>) -> Vec<Arc<MobileHost>> {
        for gateway in self.gateways() {
            self.remove_gateway_directives(&gateway, ctx);
        }
        // Catch anything left behind by a latch another owner cleared.
        self.gateway_south.withdraw_all(ctx.flows);
        self.gateway_north.withdraw_all(ctx.flows);

        for host in self.roaming_hosts() {
            self.remove_host(&host.mac(), ctx);
        }
        let homed = self.local_hosts();
        self.local_hosts.clear();
        homed
    }

    /// Install the southbound subnet and northbound MAC directives between
    /// this access point and `gateway`.
    ///
    /// No-op while the gateway location is unknown, and for every caller
    /// but the one that flips the gateway latch.
    pub(crate) fn install_gateway_directives(&self, gateway: &DefaultGateway, ctx: FlowContext<'_>) -> bool {
        let Some(learned) = gateway.learned() else {
            info!(ap = %self.mac, gateway = %gateway.address(), "gateway location unknown, deferring directives");
            return false;
        };
        if !gateway.set_flows_installed(true) {
            debug!(ap = %self.mac, gateway = %gateway.address(), "gateway directives already installed");
            return false;
        }

        let priority = ctx.settings.gateway_flow_priority;
        let ap_end = Endpoint::access_point(&self.config());
        let gw_end = Endpoint::gateway(gateway.config(), &learned.location);
        let subnet = gateway.subnet();
        let pair = ConnectPointPair::new(ap_end.clone(), gw_end.clone(), subnet);

        // Customer-facing path first.
        self.gateway_south.install(pair.clone(), DirectiveKind::GatewaySouthbound, ctx.flows, || {
            FlowDirective::builder(DirectiveKind::GatewaySouthbound, &gw_end, &ap_end)
                .match_ip_dst(subnet)
                .priority(priority)
                .build()
        });
        self.gateway_north.install(pair, DirectiveKind::GatewayNorthbound, ctx.flows, || {
            FlowDirective::builder(DirectiveKind::GatewayNorthbound, &ap_end, &gw_end)
                .match_eth_dst(learned.mac)
                .priority(priority)
                .build()
        });
        info!(ap = %self.mac, gateway = %gateway.address(), "default gateway directives installed");
        true
    }

    /// Withdraw the directives toward `gateway`. No-op unless this call
    /// clears the gateway latch.
    pub(crate) fn remove_gateway_directives(&self, gateway: &DefaultGateway, ctx: FlowContext<'_>) -> bool {
        if !gateway.set_flows_installed(false) {
            return false;
        }
        let subnet = gateway.subnet();
        let south = self
            .gateway_south
            .withdraw_where(ctx.flows, |pair| pair.subnet() == subnet);
        let north = self
            .gateway_north
            .withdraw_where(ctx.flows, |pair| pair.subnet() == subnet);
        info!(ap = %self.mac, gateway = %gateway.address(), withdrawn = south + north, "default gateway directives removed");
        true
    }

    /// Swap in a new configuration if it only differs cosmetically.
    /// Structural changes are reported back untouched for a rebuild.
    pub(crate) fn apply_config(&self, next: AccessPointConfig) -> ConfigChange {
        let change = self.config().compare(&next);
        if change == ConfigChange::Cosmetic {
            info!(ap = %self.mac, name = %next.name, "access point configuration updated in place");
            self.config.store(Arc::new(next));
        }
        change
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn installed_directives(&self) -> Vec<InstalledDirective> {
        let mut all = self.gateway_south.installed();
        all.extend(self.gateway_north.installed());
        all
    }

    pub fn summary(&self) -> AccessPointSummary {
        let config = self.config();
        AccessPointSummary {
            mac: self.mac,
            name: config.name.clone(),
            connections: config.connections.clone(),
            ingress_vlans: config.ingress_vlans.tags().iter().map(|v| v.value()).collect(),
            gateways: config.gateways.iter().map(|gw| gw.address).collect(),
            local_hosts: self.local_hosts.len(),
            roaming_hosts: self.roaming_hosts.len(),
            directives: self.gateway_south.len() + self.gateway_north.len(),
        }
    }
}

/// Read-only view of an access point for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPointSummary {
    pub mac: MacAddress,
    pub name: String,
    pub connections: Vec<ConnectPoint>,
    pub ingress_vlans: Vec<u16>,
    pub gateways: Vec<GatewayAndMask>,
    pub local_hosts: usize,
    pub roaming_hosts: usize,
    pub directives: usize,
}
