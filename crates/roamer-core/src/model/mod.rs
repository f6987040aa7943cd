// ── Value model ──
//
// Identity and value types shared by the engine, the directive layer and
// the configuration surface. Runtime entities (access points, gateways,
// mobile hosts) live at the crate root.

pub mod entity_id;
pub mod event;
pub mod host;
pub mod subnet;

// ── Re-exports ──────────────────────────────────────────────────────

pub use entity_id::{ConnectPoint, MacAddress, VlanId, VlanStack};
pub use event::{DeviceEvent, HostEvent, HostEventKind, NetworkEvent};
pub use host::HostInfo;
pub use subnet::GatewayAndMask;
