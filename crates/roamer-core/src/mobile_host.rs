// ── Mobile host ──
//
// A wireless client tracked by MAC as it moves between access points.
// Attachment changes are serialized per host by the state mutex; the
// roaming directives it needs at a visited access point live in its own
// ledgers, keyed by connect point pair.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::access_point::AccessPoint;
use crate::flow::{
    ConnectPointPair, DirectiveKind, Endpoint, FlowContext, FlowDirective, FlowLedger,
    InstalledDirective,
};
use crate::model::{HostInfo, MacAddress};

#[derive(Default)]
struct HostState {
    current: Option<Arc<AccessPoint>>,
    last_moved_at: Option<DateTime<Utc>>,
    times_moved: u32,
    /// Set by a removal event; cleared when the host shows up again.
    removed_at: Option<DateTime<Utc>>,
    /// Terminal. A purged host ignores further moves.
    purged: bool,
}

pub struct MobileHost {
    mac: MacAddress,
    home: Arc<AccessPoint>,
    /// Every access point whose subnets matched when the host was first
    /// seen. Only `home` carries state.
    home_set: Vec<MacAddress>,
    created_at: DateTime<Utc>,
    info: ArcSwap<HostInfo>,
    state: Mutex<HostState>,
    north: FlowLedger,
    south: FlowLedger,
    broadcast: FlowLedger,
}

impl MobileHost {
    /// Build a host homed at the first of `home`, currently attached to
    /// `current`. Returns `None` when `home` is empty.
    pub(crate) fn new(
        info: &HostInfo,
        home: &[Arc<AccessPoint>],
        current: Option<Arc<AccessPoint>>,
    ) -> Option<Self> {
        let primary = Arc::clone(home.first()?);
        let mac = info.mac;
        Some(Self {
            mac,
            home: primary,
            home_set: home.iter().map(|ap| ap.mac()).collect(),
            created_at: Utc::now(),
            info: ArcSwap::from_pointee(info.clone()),
            state: Mutex::new(HostState {
                current,
                ..HostState::default()
            }),
            north: FlowLedger::new(format!("host {mac} northbound")),
            south: FlowLedger::new(format!("host {mac} southbound")),
            broadcast: FlowLedger::new(format!("host {mac} broadcast")),
        })
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn home_access_point(&self) -> &Arc<AccessPoint> {
        &self.home
    }

    pub fn home_access_points(&self) -> &[MacAddress] {
        &self.home_set
    }

    pub fn is_home(&self, ap: &AccessPoint) -> bool {
        self.home_set.contains(&ap.mac())
    }

    pub fn current_access_point(&self) -> Option<Arc<AccessPoint>> {
        self.lock().current.clone()
    }

    /// Attached to a known access point that is not one of its homes.
    pub fn is_roaming(&self) -> bool {
        self.lock()
            .current
            .as_deref()
            .is_some_and(|ap| !self.is_home(ap))
    }

    pub fn times_moved(&self) -> u32 {
        self.lock().times_moved
    }

    pub fn info(&self) -> Arc<HostInfo> {
        self.info.load_full()
    }

    pub(crate) fn update_info(&self, info: &HostInfo) {
        self.info.store(Arc::new(info.clone()));
    }

    // ── Removal timer ────────────────────────────────────────────────

    pub fn removed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().removed_at
    }

    pub(crate) fn mark_removed(&self, at: DateTime<Utc>) {
        self.lock().removed_at = Some(at);
    }

    /// Pending removal for strictly longer than `timeout` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        expired(self.lock().removed_at, now, timeout)
    }

    pub fn is_purged(&self) -> bool {
        self.lock().purged
    }

    // ── Attachment ───────────────────────────────────────────────────

    /// Move the host to `next` (or off-grid for `None`).
    ///
    /// Leaving a visited access point withdraws the roaming directives
    /// there; arriving at a non-home access point installs them. Returns
    /// `false` when `next` is the current access point already, or the
    /// host is purged.
    pub(crate) fn set_current_access_point(
        self: &Arc<Self>,
        next: Option<Arc<AccessPoint>>,
        ctx: FlowContext<'_>,
    ) -> bool {
        let mut state = self.lock();
        !state.purged && self.move_locked(&mut state, next, ctx)
    }

    /// The observer reports the host present again: cancel any pending
    /// purge and move it to `next`, under one lock so a concurrent sweep
    /// cannot purge it in between. Returns `None` when the sweep got
    /// there first; the caller registers the host anew.
    pub(crate) fn reattach(
        self: &Arc<Self>,
        next: Option<Arc<AccessPoint>>,
        ctx: FlowContext<'_>,
    ) -> Option<bool> {
        let mut state = self.lock();
        if state.purged {
            return None;
        }
        if state.removed_at.take().is_some() {
            debug!(host = %self.mac, "pending purge cancelled");
        }
        Some(self.move_locked(&mut state, next, ctx))
    }

    fn move_locked(
        self: &Arc<Self>,
        state: &mut HostState,
        next: Option<Arc<AccessPoint>>,
        ctx: FlowContext<'_>,
    ) -> bool {
        // Identity, not MAC: a rebuilt access point keeps its MAC.
        let unchanged = match (&state.current, &next) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return false;
        }

        if let Some(previous) = state.current.take() {
            if previous.mac() != self.home.mac() {
                previous.remove_host(&self.mac, ctx);
            }
        }

        state.current.clone_from(&next);
        state.last_moved_at = Some(Utc::now());
        state.times_moved += 1;
        debug!(
            host = %self.mac,
            to = ?next.as_ref().map(|ap| ap.mac()),
            moves = state.times_moved,
            "host moved"
        );

        if let Some(next) = next {
            if self.is_home(&next) {
                next.add_local_host(self);
            } else {
                next.add_roaming_host(self, ctx);
            }
        }
        true
    }

    // ── Roaming directives ───────────────────────────────────────────

    /// Install what keeps this host reachable while visiting `roaming`:
    /// unicast and broadcast toward each home gateway with a known
    /// location, and unicast toward the home access point for each home
    /// subnet. Multicast is not forwarded.
    pub(crate) fn install_roaming_directives(&self, roaming: &AccessPoint, ctx: FlowContext<'_>) -> usize {
        let home_config = self.home.config();
        let host_end = Endpoint::roaming(&roaming.config(), &home_config);
        let home_end = Endpoint::access_point(&home_config);
        let priority = ctx.settings.roaming_unicast_priority;
        let mut installed = 0;

        for gateway in self.home.gateways() {
            let subnet = gateway.subnet();

            if let Some(learned) = gateway.learned() {
                let gw_end = Endpoint::gateway(gateway.config(), &learned.location);
                let pair = ConnectPointPair::new(host_end.clone(), gw_end.clone(), subnet);

                installed += usize::from(self.south.install(pair.clone(), DirectiveKind::RoamingSouthbound, ctx.flows, || {
                    FlowDirective::builder(DirectiveKind::RoamingSouthbound, &gw_end, &host_end)
                        .match_eth_dst(self.mac)
                        .priority(priority)
                        .build()
                }));
                installed += usize::from(self.north.install(pair.clone(), DirectiveKind::RoamingNorthbound, ctx.flows, || {
                    FlowDirective::builder(DirectiveKind::RoamingNorthbound, &host_end, &gw_end)
                        .match_eth_src(self.mac)
                        .match_eth_dst(learned.mac)
                        .priority(priority)
                        .build()
                }));
                installed += usize::from(self.broadcast.install(pair, DirectiveKind::RoamingBroadcast, ctx.flows, || {
                    FlowDirective::builder(DirectiveKind::RoamingBroadcast, &host_end, &gw_end)
                        .match_eth_src(self.mac)
                        .match_eth_dst(MacAddress::BROADCAST)
                        .priority(priority)
                        .build()
                }));
            } else {
                debug!(host = %self.mac, gateway = %gateway.address(), "gateway location unknown, skipping roaming directives");
            }

            let pair = ConnectPointPair::new(host_end.clone(), home_end.clone(), subnet);
            installed += usize::from(self.south.install(pair.clone(), DirectiveKind::HomeSouthbound, ctx.flows, || {
                FlowDirective::builder(DirectiveKind::HomeSouthbound, &home_end, &host_end)
                    .match_eth_dst(self.mac)
                    .priority(priority)
                    .build()
            }));
            installed += usize::from(self.north.install(pair, DirectiveKind::HomeNorthbound, ctx.flows, || {
                FlowDirective::builder(DirectiveKind::HomeNorthbound, &host_end, &home_end)
                    .match_eth_src(self.mac)
                    .match_ip_dst(subnet)
                    .priority(priority)
                    .build()
            }));
        }
        installed
    }

    /// Withdraw the roaming directives installed for a visit to `roaming`.
    pub(crate) fn withdraw_roaming_directives(&self, roaming: &AccessPoint, ctx: FlowContext<'_>) -> usize {
        let host_end = Endpoint::roaming(&roaming.config(), &self.home.config());
        let at_roaming = |pair: &ConnectPointPair| *pair.host_end() == host_end;
        self.south.withdraw_where(ctx.flows, at_roaming)
            + self.north.withdraw_where(ctx.flows, at_roaming)
            + self.broadcast.withdraw_where(ctx.flows, at_roaming)
    }

    /// Register the host at the access point it was first seen on.
    /// Runs under the state lock so a concurrent move cannot slip in
    /// between creation and registration.
    pub(crate) fn announce(self: &Arc<Self>, ctx: FlowContext<'_>) {
        let state = self.lock();
        let Some(current) = state.current.clone() else {
            return;
        };
        if self.is_home(&current) {
            current.add_local_host(self);
        } else {
            current.add_roaming_host(self, ctx);
        }
    }

    /// Reinstall roaming directives at the current access point, picking
    /// up gateways whose location became known since the host arrived.
    pub(crate) fn refresh_roaming_directives(&self, ctx: FlowContext<'_>) -> usize {
        let state = self.lock();
        match state.current.as_deref() {
            Some(current) if !state.purged && !self.is_home(current) => {
                self.install_roaming_directives(current, ctx)
            }
            _ => 0,
        }
    }

    /// Purge the host if its removal grace period has run out.
    pub(crate) fn purge_if_expired(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
        access_points: &[Arc<AccessPoint>],
        ctx: FlowContext<'_>,
    ) -> bool {
        let mut state = self.lock();
        if state.purged || !expired(state.removed_at, now, timeout) {
            return false;
        }
        self.purge_locked(&mut state, access_points, ctx);
        true
    }

    /// Purge unconditionally, e.g. when the home access point goes away.
    pub(crate) fn purge(&self, access_points: &[Arc<AccessPoint>], ctx: FlowContext<'_>) -> bool {
        let mut state = self.lock();
        if state.purged {
            return false;
        }
        self.purge_locked(&mut state, access_points, ctx);
        true
    }

    fn purge_locked(&self, state: &mut HostState, access_points: &[Arc<AccessPoint>], ctx: FlowContext<'_>) {
        for ap in access_points {
            ap.remove_host(&self.mac, ctx);
        }
        self.south.withdraw_all(ctx.flows);
        self.north.withdraw_all(ctx.flows);
        self.broadcast.withdraw_all(ctx.flows);
        state.current = None;
        state.purged = true;
        info!(host = %self.mac, home = %self.home.mac(), "mobile host purged");
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn installed_directives(&self) -> Vec<InstalledDirective> {
        let mut all = self.south.installed();
        all.extend(self.north.installed());
        all.extend(self.broadcast.installed());
        all
    }

    pub fn summary(&self) -> MobileHostSummary {
        let info = self.info();
        let state = self.lock();
        let current = state.current.as_ref().map(|ap| ap.mac());
        MobileHostSummary {
            mac: self.mac,
            ip_addresses: info.ip_addresses.iter().copied().collect(),
            home_access_point: self.home.mac(),
            current_access_point: current,
            roaming: current.is_some_and(|mac| !self.home_set.contains(&mac)),
            created_at: self.created_at,
            last_moved_at: state.last_moved_at,
            times_moved: state.times_moved,
            removed_at: state.removed_at,
            directives: self.south.len() + self.north.len() + self.broadcast.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn expired(removed_at: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> bool {
    removed_at.is_some_and(|at| (now - at).to_std().is_ok_and(|elapsed| elapsed > timeout))
}

/// Read-only view of a mobile host for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MobileHostSummary {
    pub mac: MacAddress,
    pub ip_addresses: Vec<std::net::IpAddr>,
    pub home_access_point: MacAddress,
    pub current_access_point: Option<MacAddress>,
    pub roaming: bool,
    pub created_at: DateTime<Utc>,
    pub last_moved_at: Option<DateTime<Utc>>,
    pub times_moved: u32,
    pub removed_at: Option<DateTime<Utc>>,
    pub directives: usize,
}
