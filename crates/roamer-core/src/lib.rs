//! Mobility reconciliation core for an SDN-managed wireless network.
//!
//! Tracks wireless clients as they move between access points and keeps
//! the fabric's forwarding directives in step with where they are:
//!
//! - **[`Engine`]** — Central facade. Owns the access point and default
//!   gateway directories, classifies observer events through
//!   [`handle_event()`](Engine::handle_event), and runs the event queue
//!   and removed-host purge sweep once [`start()`](Engine::start)ed.
//!
//! - **[`AccessPoint`] / [`DefaultGateway`] / [`MobileHost`]** — The
//!   mobility model. A gateway's location is learned, not configured; its
//!   directives are installed once, guarded by a latch. A host away from
//!   its home access point gets roaming directives at the one it visits.
//!
//! - **Flow layer** ([`flow`]) — Abstract [`FlowDirective`]s, the
//!   per-owner ledger that makes installs idempotent, and the
//!   [`FlowBackend`] trait the fabric controller implements. Failures are
//!   logged and broadcast as [`DirectiveFailure`]s, never propagated.
//!
//! - **Domain values** ([`model`]) — `MacAddress`, `VlanId`, `ConnectPoint`,
//!   `GatewayAndMask` and the observer's `NetworkEvent` vocabulary.

pub mod access_point;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod mobile_host;
pub mod model;
pub mod monitor;
mod purge;
mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use access_point::{AccessPoint, AccessPointSummary};
pub use config::{
    AccessPointConfig, ConfigChange, GatewayConfig, GeoLocation, MobilityConfig, MobilitySettings,
};
pub use engine::{Engine, EngineState, EventSink, ReconfigureReport};
pub use error::CoreError;
pub use flow::{
    BackendError, DirectiveFailure, DirectiveKind, DirectiveOperation, FlowBackend, FlowDirective,
    FlowHandle, InMemoryBackend, InstalledDirective,
};
pub use gateway::{DefaultGateway, DefaultGatewaySummary, LearnedGateway, LocationChange};
pub use mobile_host::{MobileHost, MobileHostSummary};
pub use monitor::HostMonitor;

pub use model::{
    ConnectPoint, DeviceEvent, GatewayAndMask, HostEvent, HostEventKind, HostInfo, MacAddress,
    NetworkEvent, VlanId, VlanStack,
};
