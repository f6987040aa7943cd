// ── Reconciliation engine ──
//
// Owns the access point and default gateway directories, classifies
// observer events and drives the model transitions that follow. Event
// handling is synchronous; `start()` adds a queue-draining task and the
// periodic purge sweep on top.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::access_point::{AccessPoint, AccessPointSummary};
use crate::config::{AccessPointConfig, ConfigChange, MobilityConfig, MobilitySettings};
use crate::error::CoreError;
use crate::flow::{DirectiveFailure, FlowBackend, FlowContext, FlowService, InstalledDirective};
use crate::gateway::{DefaultGateway, DefaultGatewaySummary, LocationChange};
use crate::mobile_host::{MobileHost, MobileHostSummary};
use crate::model::{ConnectPoint, DeviceEvent, HostEvent, HostInfo, MacAddress, NetworkEvent};
use crate::monitor::HostMonitor;
use crate::purge::purge_task;
use crate::store::Directory;

const EVENT_CHANNEL_SIZE: usize = 1024;

// ── EngineState ──────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

// ── EventSink ────────────────────────────────────────────────────

/// Queue handle for one event source. Cheap to clone.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<NetworkEvent>,
}

impl EventSink {
    pub async fn send(&self, event: NetworkEvent) -> Result<(), CoreError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CoreError::EngineStopped)
    }

    /// Non-blocking variant for observers calling from sync contexts.
    pub fn try_send(&self, event: NetworkEvent) -> Result<(), CoreError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => CoreError::EventQueueFull,
            TrySendError::Closed(_) => CoreError::EngineStopped,
        })
    }
}

// ── ReconfigureReport ────────────────────────────────────────────

/// What a configuration refresh changed, by access point MAC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconfigureReport {
    pub added: Vec<MacAddress>,
    pub removed: Vec<MacAddress>,
    pub updated: Vec<MacAddress>,
    pub rebuilt: Vec<MacAddress>,
}

// ── Engine ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Every mutation of access
/// points, gateways and mobile hosts goes through the operations here.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    settings: ArcSwap<MobilitySettings>,
    access_points: Directory<MacAddress, AccessPoint>,
    /// System-wide, keyed by gateway IP alone.
    gateways: Directory<IpAddr, DefaultGateway>,
    flows: FlowService,
    monitor: Arc<dyn HostMonitor>,
    state: watch::Sender<EngineState>,
    event_tx: Mutex<mpsc::Sender<NetworkEvent>>,
    event_rx: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,
    cancel: CancellationToken,
    /// Child token for the current run, replaced on restart.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine with no access points. Call
    /// [`reconfigure()`](Self::reconfigure) to load them and
    /// [`start()`](Self::start) to spawn the background tasks.
    pub fn new(
        settings: MobilitySettings,
        backend: Arc<dyn FlowBackend>,
        monitor: Arc<dyn HostMonitor>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Stopped);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(EngineInner {
                settings: ArcSwap::from_pointee(settings),
                access_points: Directory::new(),
                gateways: Directory::new(),
                flows: FlowService::new(backend),
                monitor,
                state,
                event_tx: Mutex::new(event_tx),
                event_rx: Mutex::new(Some(event_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn settings(&self) -> Arc<MobilitySettings> {
        self.inner.settings.load_full()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<DirectiveFailure> {
        self.inner.flows.subscribe_failures()
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Snapshot stream of the access point directory.
    pub fn subscribe_access_points(&self) -> watch::Receiver<Arc<Vec<Arc<AccessPoint>>>> {
        self.inner.access_points.subscribe()
    }

    /// Snapshot stream of the default gateway directory.
    pub fn subscribe_default_gateways(&self) -> watch::Receiver<Arc<Vec<Arc<DefaultGateway>>>> {
        self.inner.gateways.subscribe()
    }

    /// A queue handle for an event source. Events queued before
    /// [`start()`](Self::start) are processed once it runs.
    pub async fn event_sink(&self) -> EventSink {
        EventSink {
            tx: self.inner.event_tx.lock().await.clone(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the event processor and the purge sweep.
    pub async fn start(&self) {
        // Held throughout, so concurrent starts and shutdowns serialize.
        let mut handles = self.inner.task_handles.lock().await;
        if *self.inner.state.borrow() == EngineState::Running {
            return;
        }

        let (cancel, restarted) = {
            let mut child = self.inner.cancel_child.lock().await;
            let restarted = child.is_cancelled();
            if restarted {
                *child = self.inner.cancel.child_token();
            }
            (child.clone(), restarted)
        };

        // Shutdown released monitoring for every tracked gateway.
        if restarted {
            for ip in self.inner.gateways.keys() {
                self.inner.monitor.start_monitoring_ip(ip);
            }
        }
        let access_points = self.inner.access_points.snapshot();
        self.with_ctx(|ctx| {
            for ap in access_points.iter() {
                ap.on_startup(ctx);
            }
        });

        if let Some(rx) = self.inner.event_rx.lock().await.take() {
            let engine = self.clone();
            handles.push(tokio::spawn(event_processor_task(engine, rx, cancel.clone())));
        }

        let engine = self.clone();
        handles.push(tokio::spawn(purge_task(engine, cancel)));

        self.inner.state.send_replace(EngineState::Running);
        info!(access_points = self.inner.access_points.len(), "engine started");
    }

    /// Stop background tasks, withdraw every directive and stop
    /// monitoring every gateway. Directories are kept, so a later
    /// [`start()`](Self::start) resumes with the same configuration.
    pub async fn shutdown(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        self.inner.cancel_child.lock().await.cancel();

        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        // Recreate the event channel; the old receiver died with its task.
        {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
            *self.inner.event_tx.lock().await = tx;
            *self.inner.event_rx.lock().await = Some(rx);
        }

        let access_points = self.inner.access_points.snapshot();
        self.with_ctx(|ctx| {
            for ap in access_points.iter() {
                for host in ap.on_shutdown(ctx) {
                    host.purge(&access_points, ctx);
                }
            }
        });
        for ip in self.inner.gateways.keys() {
            self.inner.monitor.stop_monitoring_ip(ip);
        }

        self.inner.state.send_replace(EngineState::Stopped);
        debug!("engine stopped");
    }

    // ── Access point directory ───────────────────────────────────

    /// Register an access point, track its gateways and install whatever
    /// gateway directives are already possible. A duplicate MAC is
    /// logged and ignored; the existing entry stays.
    pub fn add_access_point(&self, config: AccessPointConfig) -> bool {
        let mac = config.mac;
        let ap = Arc::new(AccessPoint::new(config));
        if !self.inner.access_points.insert_new(mac, Arc::clone(&ap)) {
            error!(ap = %mac, "access point already registered, keeping existing entry");
            return false;
        }

        let config = ap.config();
        for gw_config in &config.gateways {
            let ip = gw_config.address.gateway();
            let (gateway, created) = self.inner.gateways.get_or_insert_with(
                ip,
                || DefaultGateway::new(gw_config.clone()),
                |gw| gw.add_owner(mac),
            );
            if created {
                debug!(gateway = %ip, "monitoring default gateway");
                self.inner.monitor.start_monitoring_ip(ip);
            }
            ap.attach_gateway(gw_config.address, gateway);
        }

        info!(ap = %mac, name = %config.name, gateways = config.gateways.len(), "access point added");
        self.with_ctx(|ctx| ap.on_startup(ctx));
        true
    }

    /// Unregister an access point: withdraw its directives, forget the
    /// hosts homed there, move hosts visiting it off-grid and release
    /// gateways nobody else owns.
    pub fn remove_access_point(&self, mac: &MacAddress) -> bool {
        self.detach_access_point(mac).is_some()
    }

    /// Remove `mac` from the directory. Returns the hosts that were
    /// roaming there, now off-grid.
    fn detach_access_point(&self, mac: &MacAddress) -> Option<Vec<Arc<MobileHost>>> {
        let Some(ap) = self.inner.access_points.remove(mac) else {
            warn!(ap = %mac, "cannot remove unknown access point");
            return None;
        };

        let visitors = ap.roaming_hosts();
        let access_points = self.inner.access_points.snapshot();
        self.with_ctx(|ctx| {
            for host in ap.on_shutdown(ctx) {
                host.purge(&access_points, ctx);
            }
            for host in &visitors {
                if host.set_current_access_point(None, ctx) {
                    debug!(host = %host.mac(), ap = %mac, "visited access point removed, host off-grid");
                }
            }
        });

        for gateway in ap.gateways() {
            gateway.remove_owner(mac);
            let ip = gateway.address().gateway();
            if self
                .inner
                .gateways
                .remove_if(&ip, |gw| !gw.has_owners())
                .is_some()
            {
                debug!(gateway = %ip, "no longer monitoring default gateway");
                self.inner.monitor.stop_monitoring_ip(ip);
            }
        }

        info!(ap = %mac, "access point removed");
        Some(visitors)
    }

    /// Rebuild an access point whose wiring changed. Hosts that were
    /// visiting it come back if their last location is still its own.
    fn rebuild_access_point(&self, config: AccessPointConfig) {
        let mac = config.mac;
        let visitors = self.detach_access_point(&mac).unwrap_or_default();
        if !self.add_access_point(config) {
            return;
        }
        let Some(ap) = self.inner.access_points.get(&mac) else {
            return;
        };
        self.with_ctx(|ctx| {
            for host in visitors {
                let here = host
                    .info()
                    .location
                    .as_ref()
                    .is_some_and(|location| ap.owns_location(location));
                if here && host.set_current_access_point(Some(Arc::clone(&ap)), ctx) {
                    debug!(host = %host.mac(), ap = %mac, "host re-attached to rebuilt access point");
                }
            }
        });
    }

    /// Apply a full configuration refresh: new settings, then removals,
    /// in-place updates or rebuilds, then additions.
    pub fn reconfigure(&self, config: MobilityConfig) -> ReconfigureReport {
        let MobilityConfig {
            settings,
            access_points,
        } = config;
        self.inner.settings.store(Arc::new(settings));

        let mut report = ReconfigureReport::default();
        let wanted: HashSet<MacAddress> = access_points.iter().map(|ap| ap.mac).collect();

        for mac in self.inner.access_points.keys() {
            if !wanted.contains(&mac) && self.remove_access_point(&mac) {
                report.removed.push(mac);
            }
        }

        let mut seen = HashSet::new();
        for ap_config in access_points {
            let mac = ap_config.mac;
            if !seen.insert(mac) {
                error!(ap = %mac, "duplicate access point in configuration, skipping");
                continue;
            }
            let Some(existing) = self.inner.access_points.get(&mac) else {
                if self.add_access_point(ap_config) {
                    report.added.push(mac);
                }
                continue;
            };
            match existing.apply_config(ap_config.clone()) {
                ConfigChange::Unchanged => {}
                ConfigChange::Cosmetic => report.updated.push(mac),
                ConfigChange::Structural => {
                    info!(ap = %mac, "access point configuration changed, rebuilding");
                    self.rebuild_access_point(ap_config);
                    report.rebuilt.push(mac);
                }
            }
        }
        report
    }

    // ── Event handling ───────────────────────────────────────────

    /// Classify and apply one observer event.
    pub fn handle_event(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::Host(event) => self.handle_host_event(event),
            NetworkEvent::Device(event) => log_device_event(event),
        }
    }

    fn handle_host_event(&self, event: &HostEvent) {
        debug!(kind = %event.kind(), mac = %event.host().mac, "host event");
        match event {
            HostEvent::Removed(host) => self.on_host_removed(host),
            HostEvent::Added(host)
            | HostEvent::Updated { current: host, .. }
            | HostEvent::Moved { current: host, .. } => self.on_host_present(host),
        }
    }

    fn on_host_present(&self, host: &HostInfo) {
        if let Some(gateway) = self.gateway_for(host) {
            self.on_gateway_report(&gateway, host);
            return;
        }

        let location_ap = host
            .location
            .as_ref()
            .and_then(|location| self.access_point_at(location));

        if let Some(existing) = self.find_mobile_host(&host.mac) {
            if location_ap.is_none() {
                debug!(host = %host.mac, "mobile host off-grid");
            }
            existing.update_info(host);
            if self
                .with_ctx(|ctx| existing.reattach(location_ap.clone(), ctx))
                .is_some()
            {
                return;
            }
            debug!(host = %host.mac, "mobile host purged while reappearing, registering anew");
        }

        let Some(location) = location_ap else {
            debug!(host = %host.mac, location = ?host.location, "host not at any access point, ignoring");
            return;
        };
        let home = self.access_points_serving(host);
        if home.is_empty() {
            debug!(host = %host.mac, ap = %location.mac(), "no access point serves host subnet, ignoring");
            return;
        }
        self.add_mobile_host(host, &home, location);
    }

    fn add_mobile_host(&self, info: &HostInfo, home: &[Arc<AccessPoint>], location: Arc<AccessPoint>) {
        let Some(host) = MobileHost::new(info, home, Some(location)) else {
            return;
        };
        let host = Arc::new(host);
        let primary = Arc::clone(host.home_access_point());
        if !primary.add_local_host(&host) {
            debug!(host = %info.mac, "mobile host registered concurrently");
            return;
        }
        info!(host = %info.mac, home = %primary.mac(), "mobile host added");
        self.with_ctx(|ctx| host.announce(ctx));
    }

    fn on_host_removed(&self, host: &HostInfo) {
        match self.find_mobile_host(&host.mac) {
            Some(existing) => {
                debug!(host = %host.mac, "mobile host removed, purge pending");
                existing.mark_removed(Utc::now());
            }
            None => debug!(host = %host.mac, "removed host is not a mobile host"),
        }
    }

    fn on_gateway_report(&self, gateway: &Arc<DefaultGateway>, host: &HostInfo) {
        match gateway.update_host(host) {
            LocationChange::Learned => self.on_gateway_learned(gateway),
            LocationChange::Unchanged | LocationChange::Relocated | LocationChange::Lost => {}
        }
    }

    /// A gateway location just became known: start every owner (the
    /// latch lets exactly one install) and give hosts roaming away from
    /// those owners the directives they could not get before.
    fn on_gateway_learned(&self, gateway: &DefaultGateway) {
        let owners: Vec<MacAddress> = gateway.owners();
        let access_points = self.inner.access_points.snapshot();

        self.with_ctx(|ctx| {
            for ap in access_points.iter().filter(|ap| owners.contains(&ap.mac())) {
                ap.on_startup(ctx);
            }
            for ap in access_points.iter() {
                for host in ap.roaming_hosts() {
                    if owners.contains(&host.home_access_point().mac()) {
                        host.refresh_roaming_directives(ctx);
                    }
                }
            }
        });
    }

    // ── Lookups ──────────────────────────────────────────────────

    fn gateway_for(&self, host: &HostInfo) -> Option<Arc<DefaultGateway>> {
        host.ip_addresses
            .iter()
            .find_map(|ip| self.inner.gateways.get(ip))
    }

    fn access_point_at(&self, location: &ConnectPoint) -> Option<Arc<AccessPoint>> {
        self.inner
            .access_points
            .snapshot()
            .iter()
            .find(|ap| ap.owns_location(location))
            .cloned()
    }

    /// Access points whose gateway subnets contain one of the host's
    /// addresses, in MAC order.
    fn access_points_serving(&self, host: &HostInfo) -> Vec<Arc<AccessPoint>> {
        let mut serving: Vec<Arc<AccessPoint>> = self
            .inner
            .access_points
            .snapshot()
            .iter()
            .filter(|ap| host.ip_addresses.iter().any(|ip| ap.serves(ip)))
            .cloned()
            .collect();
        serving.sort_unstable_by_key(|ap| ap.mac());
        serving
    }

    fn find_mobile_host(&self, mac: &MacAddress) -> Option<Arc<MobileHost>> {
        self.inner
            .access_points
            .snapshot()
            .iter()
            .find_map(|ap| ap.local_host(mac))
            .filter(|host| !host.is_purged())
    }

    pub fn access_point(&self, mac: &MacAddress) -> Option<Arc<AccessPoint>> {
        self.inner.access_points.get(mac)
    }

    pub fn default_gateway(&self, ip: &IpAddr) -> Option<Arc<DefaultGateway>> {
        self.inner.gateways.get(ip)
    }

    pub fn mobile_host(&self, mac: &MacAddress) -> Option<Arc<MobileHost>> {
        self.find_mobile_host(mac)
    }

    // ── Admin queries ────────────────────────────────────────────

    pub fn access_points(&self) -> Vec<AccessPointSummary> {
        let mut all: Vec<AccessPointSummary> = self
            .inner
            .access_points
            .snapshot()
            .iter()
            .map(|ap| ap.summary())
            .collect();
        all.sort_unstable_by_key(|ap| ap.mac);
        all
    }

    pub fn default_gateways(&self) -> Vec<DefaultGatewaySummary> {
        let mut all: Vec<DefaultGatewaySummary> = self
            .inner
            .gateways
            .snapshot()
            .iter()
            .map(|gw| gw.summary())
            .collect();
        all.sort_unstable_by_key(|gw| gw.address);
        all
    }

    /// Mobile hosts known to any access point, optionally just one MAC.
    pub fn mobile_hosts(&self, filter: Option<&MacAddress>) -> Vec<MobileHostSummary> {
        let mut all: Vec<MobileHostSummary> = self
            .hosts()
            .iter()
            .filter(|host| filter.is_none_or(|mac| host.mac() == *mac))
            .map(|host| host.summary())
            .collect();
        all.sort_unstable_by_key(|host| host.mac);
        all
    }

    /// Every directive currently installed, gateway and roaming alike.
    pub fn directives(&self) -> Vec<InstalledDirective> {
        let mut all: Vec<InstalledDirective> = self
            .inner
            .access_points
            .snapshot()
            .iter()
            .flat_map(|ap| ap.installed_directives())
            .collect();
        all.extend(self.hosts().iter().flat_map(|host| host.installed_directives()));
        all
    }

    /// Distinct mobile hosts across all access points' local maps.
    pub(crate) fn hosts(&self) -> Vec<Arc<MobileHost>> {
        let mut seen = HashSet::new();
        self.inner
            .access_points
            .snapshot()
            .iter()
            .flat_map(|ap| ap.local_hosts())
            .filter(|host| seen.insert(host.mac()))
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────

    pub(crate) fn access_point_snapshot(&self) -> Arc<Vec<Arc<AccessPoint>>> {
        self.inner.access_points.snapshot()
    }

    pub(crate) fn with_ctx<R>(&self, f: impl FnOnce(FlowContext<'_>) -> R) -> R {
        let settings = self.inner.settings.load_full();
        f(FlowContext {
            flows: &self.inner.flows,
            settings: &settings,
        })
    }
}

/// Device and port events carry nothing actionable; they are logged.
fn log_device_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Added { device } => info!(%device, "device added"),
        DeviceEvent::Removed { device } => info!(%device, "device removed"),
        DeviceEvent::Updated { device }
        | DeviceEvent::Suspended { device }
        | DeviceEvent::PortStatsUpdated { device } => debug!(%device, "device event ignored"),
        DeviceEvent::AvailabilityChanged { device, available } => {
            debug!(%device, available, "device availability changed");
        }
        DeviceEvent::PortAdded { port } | DeviceEvent::PortRemoved { port } => {
            debug!(%port, "port event ignored");
        }
        DeviceEvent::PortUpdated { port, enabled } => debug!(%port, enabled, "port updated"),
    }
}

/// Drain the event queue into `handle_event`.
async fn event_processor_task(
    engine: Engine,
    mut rx: mpsc::Receiver<NetworkEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                engine.handle_event(&event);
            }
        }
    }
}
