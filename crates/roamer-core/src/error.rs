// ── Core error types ──
//
// Errors surfaced by roamer-core. Backend failures arrive as
// `BackendError` from a `FlowBackend` implementation and are folded
// into `CoreError::Backend` so callers deal with a single type.

use thiserror::Error;

use crate::flow::BackendError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Value parsing ────────────────────────────────────────────────
    #[error("Invalid MAC address: {value}")]
    InvalidMacAddress { value: String },

    #[error("Invalid VLAN id: {value} (expected 1-4094)")]
    InvalidVlan { value: String },

    #[error("Invalid connect point: {value} (expected <device>/<port>)")]
    InvalidConnectPoint { value: String },

    #[error("Invalid gateway subnet {value}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Directive errors ─────────────────────────────────────────────
    #[error("Unsupported VLAN translation from [{ingress}] to [{egress}]")]
    UnsupportedVlanTranslation { ingress: String, egress: String },

    #[error("Directive endpoint has no location: {endpoint}")]
    UnresolvedEndpoint { endpoint: String },

    #[error("Flow backend error: {message}")]
    Backend { message: String },

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("Engine is not running")]
    EngineStopped,

    #[error("Event queue is full")]
    EventQueueFull,
}

// ── Conversion from backend errors ───────────────────────────────────

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { reason } => CoreError::Backend {
                message: format!("directive rejected: {reason}"),
            },
            BackendError::UnknownHandle { handle } => CoreError::Backend {
                message: format!("unknown directive handle {handle}"),
            },
            BackendError::Unavailable(reason) => CoreError::Backend {
                message: format!("backend unavailable: {reason}"),
            },
        }
    }
}
