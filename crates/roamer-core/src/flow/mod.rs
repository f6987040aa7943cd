// ── Flow directive layer ──
//
// Everything between the mobility models and the external flow backend:
// directive construction, the per-owner idempotency ledger, and the
// service that submits/withdraws and reports failures.

mod directive;
mod ledger;
mod memory;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MobilitySettings;
use crate::error::CoreError;

pub use directive::{
    ConnectPointPair, DirectiveBuilder, DirectiveKind, Endpoint, EthType, FlowDirective, Selector,
    Treatment, VlanAction, vlan_match_and_treatment,
};
pub(crate) use ledger::FlowLedger;
pub use ledger::InstalledDirective;
pub use memory::InMemoryBackend;

const FAILURE_CHANNEL_SIZE: usize = 256;

// ── Backend contract ────────────────────────────────────────────────

/// Opaque reference to a directive accepted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FlowHandle(Uuid);

impl FlowHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("directive rejected: {reason}")]
    Rejected { reason: String },

    #[error("unknown directive handle {handle}")]
    UnknownHandle { handle: FlowHandle },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Compiles directives into switch rules. Implementations need not
/// deduplicate: the engine never submits the same key twice.
pub trait FlowBackend: Send + Sync {
    fn submit(&self, directive: &FlowDirective) -> Result<FlowHandle, BackendError>;

    fn withdraw(&self, handle: &FlowHandle) -> Result<(), BackendError>;
}

// ── Failure reporting ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DirectiveOperation {
    Build,
    Submit,
    Withdraw,
}

/// A directive that could not be built, submitted or withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveFailure {
    pub owner: String,
    pub kind: DirectiveKind,
    pub operation: DirectiveOperation,
    pub reason: String,
}

// ── FlowService ─────────────────────────────────────────────────────

/// Shared front for the backend. Cheap to clone.
///
/// Failures are logged and broadcast, never returned: one bad directive
/// must not abort the reconciliation step that produced it.
#[derive(Clone)]
pub struct FlowService {
    backend: Arc<dyn FlowBackend>,
    failures: broadcast::Sender<DirectiveFailure>,
}

impl FlowService {
    pub fn new(backend: Arc<dyn FlowBackend>) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_SIZE);
        Self { backend, failures }
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<DirectiveFailure> {
        self.failures.subscribe()
    }

    pub(crate) fn submit(&self, owner: &str, directive: &FlowDirective) -> Option<FlowHandle> {
        match self.backend.submit(directive) {
            Ok(handle) => {
                debug!(owner, %handle, %directive, "directive submitted");
                Some(handle)
            }
            Err(e) => {
                let e = CoreError::from(e);
                self.report(owner, directive.kind, DirectiveOperation::Submit, &e);
                None
            }
        }
    }

    pub(crate) fn withdraw(&self, owner: &str, installed: &InstalledDirective) {
        match self.backend.withdraw(&installed.handle) {
            Ok(()) => debug!(owner, handle = %installed.handle, "directive withdrawn"),
            Err(e) => self.report(
                owner,
                installed.directive.kind,
                DirectiveOperation::Withdraw,
                &CoreError::from(e),
            ),
        }
    }

    pub(crate) fn report(
        &self,
        owner: &str,
        kind: DirectiveKind,
        operation: DirectiveOperation,
        error: &CoreError,
    ) {
        warn!(owner, %kind, %operation, error = %error, "directive operation failed");
        // No subscribers is fine; the warning above is the record.
        let _ = self.failures.send(DirectiveFailure {
            owner: owner.to_owned(),
            kind,
            operation,
            reason: error.to_string(),
        });
    }
}

/// What a model needs to issue directives: the service plus the
/// settings in force for this reconciliation step.
#[derive(Clone, Copy)]
pub(crate) struct FlowContext<'a> {
    pub flows: &'a FlowService,
    pub settings: &'a MobilitySettings,
}
