// ── Forwarding directives ──
//
// A directive is an abstract "match this, rewrite VLANs, send there"
// instruction. The backend compiles it to switch rules; this module
// only decides what it says.

use std::fmt;

use ipnet::IpNet;
use serde::Serialize;
use strum::Display;

use crate::config::{AccessPointConfig, GatewayConfig};
use crate::error::CoreError;
use crate::model::{ConnectPoint, MacAddress, VlanId, VlanStack};

// ── Endpoints ───────────────────────────────────────────────────────

/// One side of a directive: a fabric port plus the VLAN stack traffic
/// carries there. The location is `None` while still unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub location: Option<ConnectPoint>,
    pub vlans: VlanStack,
}

impl Endpoint {
    pub fn new(location: Option<ConnectPoint>, vlans: VlanStack) -> Self {
        Self { location, vlans }
    }

    /// The access point's first uplink, tagged with its ingress VLANs.
    pub fn access_point(config: &AccessPointConfig) -> Self {
        Self::new(
            config.primary_connection().cloned(),
            config.ingress_vlans.clone(),
        )
    }

    /// A gateway at its learned location, tagged with its ingress VLANs.
    pub fn gateway(config: &GatewayConfig, location: &ConnectPoint) -> Self {
        Self::new(Some(location.clone()), config.ingress_vlans.clone())
    }

    /// A host roaming at `roaming`: the visited uplink, but the VLANs of
    /// the home access point since the host keeps its home addressing.
    pub fn roaming(roaming: &AccessPointConfig, home: &AccessPointConfig) -> Self {
        Self::new(
            roaming.primary_connection().cloned(),
            home.ingress_vlans.clone(),
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(cp) => write!(f, "{cp}")?,
            None => f.write_str("<unknown>")?,
        }
        if !self.vlans.is_empty() {
            write!(f, "[{}]", self.vlans)?;
        }
        Ok(())
    }
}

// ── ConnectPointPair ────────────────────────────────────────────────

/// Deduplication key for installed directives: the endpoint nearest the
/// host, the endpoint nearest the remote side, and the subnet involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectPointPair {
    host_end: Endpoint,
    remote_end: Endpoint,
    subnet: IpNet,
}

impl ConnectPointPair {
    pub fn new(host_end: Endpoint, remote_end: Endpoint, subnet: IpNet) -> Self {
        Self {
            host_end,
            remote_end,
            subnet,
        }
    }

    pub fn host_end(&self) -> &Endpoint {
        &self.host_end
    }

    pub fn remote_end(&self) -> &Endpoint {
        &self.remote_end
    }

    pub fn subnet(&self) -> IpNet {
        self.subnet
    }
}

impl fmt::Display for ConnectPointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {} ({})", self.host_end, self.remote_end, self.subnet)
    }
}

// ── Directive ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKind {
    /// Access point toward its gateway, matched on the gateway MAC.
    GatewayNorthbound,
    /// Gateway toward the access point, matched on the subnet.
    GatewaySouthbound,
    RoamingNorthbound,
    RoamingSouthbound,
    RoamingBroadcast,
    HomeNorthbound,
    HomeSouthbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum EthType {
    #[strum(serialize = "ipv4")]
    #[serde(rename = "ipv4")]
    Ipv4,
    #[strum(serialize = "ipv6")]
    #[serde(rename = "ipv6")]
    Ipv6,
}

impl EthType {
    pub fn value(self) -> u16 {
        match self {
            Self::Ipv4 => 0x0800,
            Self::Ipv6 => 0x86dd,
        }
    }
}

/// Packet match criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selector {
    /// Ingress VLAN tags, outermost first.
    pub vlans: Vec<VlanId>,
    pub eth_src: Option<MacAddress>,
    pub eth_dst: Option<MacAddress>,
    pub eth_type: Option<EthType>,
    pub ip_dst: Option<IpNet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "vlan", rename_all = "snake_case")]
pub enum VlanAction {
    Push(VlanId),
    Pop,
}

/// Rewrite steps applied before output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Treatment {
    pub vlan_actions: Vec<VlanAction>,
    pub output: ConnectPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowDirective {
    pub kind: DirectiveKind,
    pub ingress: ConnectPoint,
    pub selector: Selector,
    pub treatment: Treatment,
    pub priority: u16,
}

impl FlowDirective {
    pub fn builder<'a>(
        kind: DirectiveKind,
        ingress: &'a Endpoint,
        egress: &'a Endpoint,
    ) -> DirectiveBuilder<'a> {
        DirectiveBuilder {
            kind,
            ingress,
            egress,
            eth_src: None,
            eth_dst: None,
            ip_dst: None,
            priority: 0,
        }
    }
}

impl fmt::Display for FlowDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} (priority {})",
            self.kind, self.ingress, self.treatment.output, self.priority
        )
    }
}

// ── Builder ─────────────────────────────────────────────────────────

pub struct DirectiveBuilder<'a> {
    kind: DirectiveKind,
    ingress: &'a Endpoint,
    egress: &'a Endpoint,
    eth_src: Option<MacAddress>,
    eth_dst: Option<MacAddress>,
    ip_dst: Option<IpNet>,
    priority: u16,
}

impl DirectiveBuilder<'_> {
    pub fn match_eth_src(mut self, mac: MacAddress) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn match_eth_dst(mut self, mac: MacAddress) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    /// Match an IP destination prefix. The ethertype follows the family.
    pub fn match_ip_dst(mut self, subnet: IpNet) -> Self {
        self.ip_dst = Some(subnet);
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn build(self) -> Result<FlowDirective, CoreError> {
        let ingress = resolve(self.ingress)?;
        let output = resolve(self.egress)?;
        let (vlans, vlan_actions) = vlan_match_and_treatment(&self.ingress.vlans, &self.egress.vlans)?;

        let eth_type = self.ip_dst.map(|net| match net {
            IpNet::V4(_) => EthType::Ipv4,
            IpNet::V6(_) => EthType::Ipv6,
        });

        Ok(FlowDirective {
            kind: self.kind,
            ingress,
            selector: Selector {
                vlans,
                eth_src: self.eth_src,
                eth_dst: self.eth_dst,
                eth_type,
                ip_dst: self.ip_dst,
            },
            treatment: Treatment {
                vlan_actions,
                output,
            },
            priority: self.priority,
        })
    }
}

fn resolve(endpoint: &Endpoint) -> Result<ConnectPoint, CoreError> {
    endpoint
        .location
        .clone()
        .ok_or_else(|| CoreError::UnresolvedEndpoint {
            endpoint: endpoint.to_string(),
        })
}

/// Derive VLAN match criteria and rewrite actions for traffic entering
/// tagged with `ingress` and leaving tagged with `egress`.
///
/// Traffic is always matched on the full ingress stack. Untagged to
/// tagged pushes every egress tag, tagged to untagged pops every ingress
/// tag. Translating between two different non-empty stacks is refused.
pub fn vlan_match_and_treatment(
    ingress: &VlanStack,
    egress: &VlanStack,
) -> Result<(Vec<VlanId>, Vec<VlanAction>), CoreError> {
    let matched = ingress.tags().to_vec();
    if ingress == egress {
        return Ok((matched, Vec::new()));
    }

    let actions = if ingress.is_empty() {
        egress.tags().iter().map(|&vid| VlanAction::Push(vid)).collect()
    } else if egress.is_empty() {
        ingress.tags().iter().map(|_| VlanAction::Pop).collect()
    } else {
        return Err(CoreError::UnsupportedVlanTranslation {
            ingress: ingress.to_string(),
            egress: egress.to_string(),
        });
    };
    Ok((matched, actions))
}
