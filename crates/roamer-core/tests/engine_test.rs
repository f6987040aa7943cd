#![allow(clippy::unwrap_used)]
// Integration tests for `Engine` against the in-memory flow backend.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;

use roamer_core::{
    AccessPointConfig, ConfigChange, DeviceEvent, DirectiveKind, DirectiveOperation, Engine,
    EngineState, GatewayConfig, HostEvent, HostInfo, HostMonitor, InMemoryBackend, MacAddress,
    MobilityConfig, MobilitySettings, NetworkEvent, VlanStack,
};

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingMonitor {
    started: Mutex<Vec<IpAddr>>,
    stopped: Mutex<Vec<IpAddr>>,
}

impl RecordingMonitor {
    fn started(&self) -> Vec<IpAddr> {
        self.started.lock().unwrap().clone()
    }

    fn stopped(&self) -> Vec<IpAddr> {
        self.stopped.lock().unwrap().clone()
    }
}

impl HostMonitor for RecordingMonitor {
    fn start_monitoring_ip(&self, ip: IpAddr) {
        self.started.lock().unwrap().push(ip);
    }

    fn stop_monitoring_ip(&self, ip: IpAddr) {
        self.stopped.lock().unwrap().push(ip);
    }
}

const AP1: &str = "aa:aa:aa:aa:aa:01";
const AP2: &str = "aa:aa:aa:aa:aa:02";
const AP3: &str = "aa:aa:aa:aa:aa:03";
const HOST: &str = "bb:bb:bb:bb:bb:01";

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn gateway(address: &str) -> GatewayConfig {
    GatewayConfig {
        name: format!("gw {address}"),
        address: address.parse().unwrap(),
        ingress_vlans: VlanStack::untagged(),
    }
}

fn access_point(ap: &str, switch: u8, gw: &str) -> AccessPointConfig {
    AccessPointConfig::new(format!("ap {ap}"), mac(ap))
        .with_connection(format!("of:000000000000000{switch}/1").parse().unwrap())
        .with_gateway(gateway(gw))
}

/// `RUST_LOG=roamer_core=debug cargo test` shows the engine's reasoning.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_with(settings: MobilitySettings) -> (Engine, Arc<InMemoryBackend>, Arc<RecordingMonitor>) {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let monitor = Arc::new(RecordingMonitor::default());
    let engine = Engine::new(settings, backend.clone(), monitor.clone());
    (engine, backend, monitor)
}

fn setup() -> (Engine, Arc<InMemoryBackend>, Arc<RecordingMonitor>) {
    setup_with(MobilitySettings::default())
}

/// Observer report for a gateway address, seen on switch 9.
fn gateway_seen(address: &str, port: u64) -> NetworkEvent {
    NetworkEvent::Host(HostEvent::Added(
        HostInfo::new(format!("00:00:00:00:00:{port:02x}").parse().unwrap())
            .with_ip(ip(address))
            .at(format!("of:0000000000000009/{port}").parse().unwrap()),
    ))
}

fn host_at(addr: &str, switch: u8) -> HostInfo {
    HostInfo::new(mac(HOST))
        .with_ip(ip(addr))
        .at(format!("of:000000000000000{switch}/1").parse().unwrap())
}

fn added(host: HostInfo) -> NetworkEvent {
    NetworkEvent::Host(HostEvent::Added(host))
}

fn moved(host: HostInfo) -> NetworkEvent {
    NetworkEvent::Host(HostEvent::Moved {
        current: host,
        previous: None,
    })
}

fn removed(host: HostInfo) -> NetworkEvent {
    NetworkEvent::Host(HostEvent::Removed(host))
}

// ── Gateway monitoring ──────────────────────────────────────────────

#[test]
fn test_shared_gateway_is_monitored_once() {
    let (engine, _, monitor) = setup();

    assert!(engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24")));
    assert!(engine.add_access_point(access_point(AP2, 2, "10.0.0.1/24")));
    assert_eq!(monitor.started(), vec![ip("10.0.0.1")]);

    let gateways = engine.default_gateways();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].owners, vec![mac(AP1), mac(AP2)]);

    assert!(engine.remove_access_point(&mac(AP1)));
    assert!(monitor.stopped().is_empty());
    assert!(engine.remove_access_point(&mac(AP2)));
    assert_eq!(monitor.stopped(), vec![ip("10.0.0.1")]);
    assert!(engine.default_gateways().is_empty());
}

#[test]
fn test_duplicate_access_point_keeps_existing_entry() {
    let (engine, _, monitor) = setup();

    assert!(engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24")));
    assert!(!engine.add_access_point(access_point(AP1, 2, "10.0.1.1/24")));

    let ap = engine.access_point(&mac(AP1)).unwrap();
    assert_eq!(ap.config().connections[0].to_string(), "of:0000000000000001/1");
    assert_eq!(monitor.started(), vec![ip("10.0.0.1")]);
}

#[test]
fn test_remove_unknown_access_point_is_a_no_op() {
    let (engine, backend, _) = setup();
    assert!(!engine.remove_access_point(&mac(AP1)));
    assert_eq!(backend.withdrawal_count(), 0);
}

// ── Default gateway directives ──────────────────────────────────────

#[test]
fn test_gateway_learned_later_installs_exactly_once() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    assert_eq!(backend.submission_count(), 0);

    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    assert_eq!(backend.submission_count(), 2);
    assert_eq!(backend.installed_of_kind(DirectiveKind::GatewaySouthbound).len(), 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::GatewayNorthbound).len(), 1);

    // Re-reports of a known location change nothing.
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&gateway_seen("10.0.0.1", 2));
    assert_eq!(backend.submission_count(), 2);

    let gw = engine.default_gateway(&ip("10.0.0.1")).unwrap();
    assert!(gw.flows_installed());
}

#[test]
fn test_owner_added_after_install_gets_nothing_of_its_own() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.1.1", 2));
    engine.add_access_point(access_point(AP3, 3, "10.0.1.1/24"));

    // One latch per gateway, already set by the first owner.
    assert_eq!(backend.installed().len(), 2);
    assert_eq!(engine.access_point(&mac(AP3)).unwrap().summary().directives, 0);
}

#[test]
fn test_shared_gateway_installs_once_across_owners() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.0.1/24"));

    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    assert_eq!(backend.submission_count(), 2);
}

#[test]
fn test_submission_failures_are_reported_not_recorded() {
    let (engine, backend, _) = setup();
    let mut failures = engine.subscribe_failures();
    backend.set_fail_submissions(true);

    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));

    let first = failures.try_recv().unwrap();
    let second = failures.try_recv().unwrap();
    assert_eq!(first.operation, DirectiveOperation::Submit);
    assert_eq!(first.kind, DirectiveKind::GatewaySouthbound);
    assert_eq!(second.kind, DirectiveKind::GatewayNorthbound);
    assert!(engine.directives().is_empty());
}

#[test]
fn test_mismatched_vlan_stacks_fail_to_build() {
    let (engine, backend, _) = setup();
    let mut failures = engine.subscribe_failures();

    let mut gw = gateway("10.0.0.1/24");
    gw.ingress_vlans = VlanStack::try_from(&[200_u16][..]).unwrap();
    let ap = AccessPointConfig::new("tagged", mac(AP1))
        .with_connection("of:0000000000000001/1".parse().unwrap())
        .with_gateway(gw)
        .with_ingress_vlans(VlanStack::try_from(&[100_u16][..]).unwrap());

    engine.add_access_point(ap);
    engine.handle_event(&gateway_seen("10.0.0.1", 1));

    let failure = failures.try_recv().unwrap();
    assert_eq!(failure.operation, DirectiveOperation::Build);
    assert!(failure.reason.contains("Unsupported VLAN translation"));
    assert_eq!(backend.submission_count(), 0);
}

// ── Mobile hosts ────────────────────────────────────────────────────

#[test]
fn test_host_first_seen_at_home_is_local() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));

    engine.handle_event(&added(host_at("10.0.0.5", 1)));

    let hosts = engine.mobile_hosts(None);
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].home_access_point, mac(AP1));
    assert_eq!(hosts[0].current_access_point, Some(mac(AP1)));
    assert!(!hosts[0].roaming);
    assert_eq!(hosts[0].directives, 0);

    // Only the two gateway directives.
    assert_eq!(backend.installed().len(), 2);
}

#[test]
fn test_host_outside_every_subnet_is_ignored() {
    let (engine, _, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));

    engine.handle_event(&added(host_at("192.168.1.5", 1)));
    engine.handle_event(&added(host_at("10.0.0.5", 7)));

    assert!(engine.mobile_hosts(None).is_empty());
}

#[test]
fn test_host_moving_to_another_access_point_roams() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&gateway_seen("10.0.1.1", 2));
    engine.handle_event(&added(host_at("10.0.0.5", 1)));

    engine.handle_event(&moved(host_at("10.0.0.5", 2)));

    let host = engine.mobile_host(&mac(HOST)).unwrap();
    assert!(host.is_roaming());
    assert_eq!(host.times_moved(), 1);
    assert_eq!(engine.access_point(&mac(AP2)).unwrap().summary().roaming_hosts, 1);
    assert_eq!(engine.access_point(&mac(AP1)).unwrap().summary().local_hosts, 1);

    let south = backend.installed_of_kind(DirectiveKind::RoamingSouthbound);
    let north = backend.installed_of_kind(DirectiveKind::RoamingNorthbound);
    assert_eq!(south.len(), 1);
    assert_eq!(north.len(), 1);
    assert_eq!(south[0].selector.eth_dst, Some(mac(HOST)));
    assert_eq!(south[0].treatment.output.to_string(), "of:0000000000000002/1");
    assert_eq!(north[0].selector.eth_src, Some(mac(HOST)));
    assert_eq!(north[0].priority, 20_000);

    let broadcast = backend.installed_of_kind(DirectiveKind::RoamingBroadcast);
    assert_eq!(broadcast[0].selector.eth_dst, Some(MacAddress::BROADCAST));
    assert_eq!(backend.installed_of_kind(DirectiveKind::HomeSouthbound).len(), 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::HomeNorthbound).len(), 1);

    // Back home: every roaming directive goes away, gateway ones stay.
    engine.handle_event(&moved(host_at("10.0.0.5", 1)));
    assert!(!host.is_roaming());
    assert_eq!(host.times_moved(), 2);
    assert_eq!(backend.installed().len(), 4);
    assert_eq!(engine.access_point(&mac(AP2)).unwrap().summary().roaming_hosts, 0);
}

#[test]
fn test_roaming_host_picks_up_gateway_learned_later() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));

    // First seen away from home, home gateway still unknown.
    engine.handle_event(&added(host_at("10.0.0.5", 2)));
    assert!(engine.mobile_host(&mac(HOST)).unwrap().is_roaming());
    assert_eq!(backend.installed_of_kind(DirectiveKind::HomeNorthbound).len(), 1);
    assert!(backend.installed_of_kind(DirectiveKind::RoamingNorthbound).is_empty());

    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    assert_eq!(backend.installed_of_kind(DirectiveKind::RoamingNorthbound).len(), 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::RoamingSouthbound).len(), 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::HomeNorthbound).len(), 1);
}

#[test]
fn test_removed_then_readded_cancels_purge() {
    let (engine, _, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&added(host_at("10.0.0.5", 1)));

    engine.handle_event(&removed(host_at("10.0.0.5", 1)));
    let host = engine.mobile_host(&mac(HOST)).unwrap();
    assert!(host.removed_at().is_some());
    assert_eq!(host.times_moved(), 0);

    engine.handle_event(&added(host_at("10.0.0.5", 2)));
    assert!(host.removed_at().is_none());
    assert_eq!(host.times_moved(), 1);
    assert_eq!(host.current_access_point().unwrap().mac(), mac(AP2));

    let later = Utc::now() + TimeDelta::hours(1);
    assert!(engine.purge_expired(later).is_empty());
    assert!(engine.mobile_host(&mac(HOST)).is_some());
}

#[test]
fn test_purge_respects_timeout() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&added(host_at("10.0.0.5", 2)));
    assert_eq!(backend.installed().len(), 7);

    engine.handle_event(&removed(host_at("10.0.0.5", 2)));

    assert!(engine.purge_expired(Utc::now() + TimeDelta::seconds(10)).is_empty());
    assert_eq!(engine.mobile_hosts(None).len(), 1);

    let purged = engine.purge_expired(Utc::now() + TimeDelta::seconds(31));
    assert_eq!(purged, vec![mac(HOST)]);
    assert!(engine.mobile_hosts(None).is_empty());
    assert_eq!(engine.access_point(&mac(AP1)).unwrap().summary().local_hosts, 0);
    assert_eq!(engine.access_point(&mac(AP2)).unwrap().summary().roaming_hosts, 0);
    // Gateway directives survive the host.
    assert_eq!(backend.installed().len(), 2);
}

#[test]
fn test_removing_home_access_point_forgets_its_hosts() {
    let (engine, backend, monitor) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&added(host_at("10.0.0.5", 2)));

    engine.remove_access_point(&mac(AP1));

    assert!(engine.mobile_hosts(None).is_empty());
    assert_eq!(engine.access_point(&mac(AP2)).unwrap().summary().roaming_hosts, 0);
    assert!(backend.installed().is_empty());
    assert_eq!(monitor.stopped(), vec![ip("10.0.0.1")]);
}

/// AP1 and AP2 on separate subnets, both gateways known, host homed at
/// AP1 and roaming at AP2.
fn roaming_at_ap2() -> (Engine, Arc<InMemoryBackend>, Arc<RecordingMonitor>) {
    let (engine, backend, monitor) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&gateway_seen("10.0.1.1", 2));
    engine.handle_event(&added(host_at("10.0.0.5", 1)));
    engine.handle_event(&moved(host_at("10.0.0.5", 2)));
    assert!(engine.mobile_host(&mac(HOST)).unwrap().is_roaming());
    (engine, backend, monitor)
}

#[test]
fn test_removing_visited_access_point_moves_host_off_grid() {
    let (engine, backend, _) = roaming_at_ap2();

    engine.remove_access_point(&mac(AP2));

    let hosts = engine.mobile_hosts(None);
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].current_access_point, None);
    assert!(!hosts[0].roaming);
    assert_eq!(hosts[0].directives, 0);
    // Only AP1's gateway directives are left.
    assert_eq!(backend.installed().len(), 2);

    engine.handle_event(&moved(host_at("10.0.0.5", 1)));
    let host = engine.mobile_host(&mac(HOST)).unwrap();
    assert_eq!(host.current_access_point().unwrap().mac(), mac(AP1));
    assert!(!host.is_roaming());
}

#[test]
fn test_rebuilding_visited_access_point_keeps_host_roaming() {
    let (engine, backend, _) = roaming_at_ap2();

    let rewired = access_point(AP2, 2, "10.0.1.1/24")
        .with_connection("of:0000000000000002/5".parse().unwrap());
    let report = engine.reconfigure(MobilityConfig {
        settings: MobilitySettings::default(),
        access_points: vec![access_point(AP1, 1, "10.0.0.1/24"), rewired],
    });
    assert_eq!(report.rebuilt, vec![mac(AP2)]);

    let rebuilt = engine.access_point(&mac(AP2)).unwrap();
    let host = engine.mobile_host(&mac(HOST)).unwrap();
    assert!(host.is_roaming());
    assert!(Arc::ptr_eq(&host.current_access_point().unwrap(), &rebuilt));
    assert_eq!(rebuilt.summary().roaming_hosts, 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::RoamingNorthbound).len(), 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::HomeSouthbound).len(), 1);

    // A re-report at the same place changes nothing.
    engine.handle_event(&NetworkEvent::Host(HostEvent::Updated {
        current: host_at("10.0.0.5", 2),
        previous: None,
    }));
    assert_eq!(backend.installed_of_kind(DirectiveKind::RoamingNorthbound).len(), 1);
    assert_eq!(rebuilt.summary().roaming_hosts, 1);
}

#[test]
fn test_host_reappearing_after_purge_is_registered_anew() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.1.1/24"));
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    engine.handle_event(&added(host_at("10.0.0.5", 1)));
    let first = engine.mobile_host(&mac(HOST)).unwrap();

    engine.handle_event(&removed(host_at("10.0.0.5", 1)));
    let purged = engine.purge_expired(Utc::now() + TimeDelta::hours(1));
    assert_eq!(purged, vec![mac(HOST)]);
    assert!(first.is_purged());

    engine.handle_event(&added(host_at("10.0.0.5", 2)));
    let second = engine.mobile_host(&mac(HOST)).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_roaming());
    assert_eq!(second.times_moved(), 0);
    assert_eq!(engine.access_point(&mac(AP1)).unwrap().summary().local_hosts, 1);
    assert_eq!(backend.installed_of_kind(DirectiveKind::RoamingNorthbound).len(), 1);
}

#[test]
fn test_device_events_change_nothing() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));

    engine.handle_event(&NetworkEvent::Device(DeviceEvent::Added {
        device: "of:0000000000000001".into(),
    }));
    engine.handle_event(&NetworkEvent::Device(DeviceEvent::PortUpdated {
        port: "of:0000000000000001/1".parse().unwrap(),
        enabled: false,
    }));

    assert_eq!(backend.submission_count(), 0);
    assert_eq!(engine.access_points().len(), 1);
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn test_racing_gateway_triggers_install_once() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.add_access_point(access_point(AP2, 2, "10.0.0.1/24"));

    std::thread::scope(|scope| {
        for i in 0u8..8 {
            let engine = &engine;
            scope.spawn(move || {
                if i % 2 == 0 {
                    engine.handle_event(&gateway_seen("10.0.0.1", 1));
                } else {
                    // Each new owner runs its own startup install attempt.
                    let ap = format!("aa:aa:aa:aa:aa:{:02x}", 0x10 + i);
                    engine.add_access_point(access_point(&ap, 3 + i / 2, "10.0.0.1/24"));
                }
            });
        }
    });

    assert_eq!(backend.submission_count(), 2);
    assert_eq!(backend.installed().len(), 2);
    assert_eq!(engine.default_gateways()[0].owners.len(), 6);
}

// ── Reconfiguration ─────────────────────────────────────────────────

#[test]
fn test_reconfigure_diffs_access_points() {
    let (engine, backend, monitor) = setup();

    let report = engine.reconfigure(MobilityConfig {
        settings: MobilitySettings::default(),
        access_points: vec![
            access_point(AP1, 1, "10.0.0.1/24"),
            access_point(AP2, 2, "10.0.1.1/24"),
        ],
    });
    assert_eq!(report.added, vec![mac(AP1), mac(AP2)]);
    engine.handle_event(&gateway_seen("10.0.0.1", 1));
    assert_eq!(backend.installed().len(), 2);

    let mut renamed = access_point(AP1, 1, "10.0.0.1/24");
    renamed.name = "lobby".into();
    assert_eq!(
        engine.access_point(&mac(AP1)).unwrap().config().compare(&renamed),
        ConfigChange::Cosmetic
    );

    let report = engine.reconfigure(MobilityConfig {
        settings: MobilitySettings {
            gateway_flow_priority: 500,
            ..MobilitySettings::default()
        },
        access_points: vec![renamed, access_point(AP3, 3, "10.0.2.1/24")],
    });
    assert_eq!(report.updated, vec![mac(AP1)]);
    assert_eq!(report.removed, vec![mac(AP2)]);
    assert_eq!(report.added, vec![mac(AP3)]);
    assert!(report.rebuilt.is_empty());
    assert_eq!(engine.access_point(&mac(AP1)).unwrap().name(), "lobby");
    assert_eq!(engine.settings().gateway_flow_priority, 500);
    // Cosmetic changes leave directives alone.
    assert_eq!(backend.installed().len(), 2);

    let report = engine.reconfigure(MobilityConfig {
        settings: MobilitySettings::default(),
        access_points: vec![access_point(AP1, 4, "10.0.0.1/24"), access_point(AP3, 3, "10.0.2.1/24")],
    });
    assert_eq!(report.rebuilt, vec![mac(AP1)]);
    assert!(backend.installed().is_empty());
    assert_eq!(
        monitor.started().iter().filter(|a| **a == ip("10.0.0.1")).count(),
        2
    );
}

#[test]
fn test_reconfigure_skips_duplicate_entries() {
    let (engine, _, _) = setup();
    let report = engine.reconfigure(MobilityConfig {
        settings: MobilitySettings::default(),
        access_points: vec![
            access_point(AP1, 1, "10.0.0.1/24"),
            access_point(AP1, 2, "10.0.1.1/24"),
        ],
    });
    assert_eq!(report.added, vec![mac(AP1)]);
    assert_eq!(engine.access_points().len(), 1);
    assert_eq!(
        engine.access_point(&mac(AP1)).unwrap().config().connections[0].to_string(),
        "of:0000000000000001/1"
    );
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_queued_events_are_processed_after_start() {
    let (engine, backend, _) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));

    let sink = engine.event_sink().await;
    sink.try_send(gateway_seen("10.0.0.1", 1)).unwrap();
    assert_eq!(backend.submission_count(), 0);

    engine.start().await;
    assert_eq!(*engine.state().borrow(), EngineState::Running);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.submission_count(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_purge_task_sweeps_removed_hosts() {
    let (engine, _, _) = setup_with(MobilitySettings {
        removed_host_timeout: Duration::from_nanos(1),
        ..MobilitySettings::default()
    });
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.start().await;

    let sink = engine.event_sink().await;
    sink.send(added(host_at("10.0.0.5", 1))).await.unwrap();
    sink.send(removed(host_at("10.0.0.5", 1))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.mobile_hosts(None).len(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(engine.mobile_hosts(None).is_empty());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_withdraws_everything_and_restart_resumes() {
    let (engine, backend, monitor) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.start().await;

    let sink = engine.event_sink().await;
    sink.send(gateway_seen("10.0.0.1", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.installed().len(), 2);

    engine.shutdown().await;
    assert_eq!(*engine.state().borrow(), EngineState::Stopped);
    assert!(backend.installed().is_empty());
    assert_eq!(monitor.stopped(), vec![ip("10.0.0.1")]);
    assert!(sink.send(gateway_seen("10.0.0.1", 1)).await.is_err());

    engine.start().await;
    assert_eq!(monitor.started(), vec![ip("10.0.0.1"), ip("10.0.0.1")]);
    assert_eq!(backend.installed().len(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_run_once() {
    let (engine, _, monitor) = setup();
    engine.add_access_point(access_point(AP1, 1, "10.0.0.1/24"));
    engine.start().await;
    engine.shutdown().await;

    tokio::join!(engine.start(), engine.start());
    assert_eq!(*engine.state().borrow(), EngineState::Running);
    // One restart, one re-request for the tracked gateway.
    assert_eq!(monitor.started(), vec![ip("10.0.0.1"), ip("10.0.0.1")]);

    engine.shutdown().await;
    assert_eq!(*engine.state().borrow(), EngineState::Stopped);
}
