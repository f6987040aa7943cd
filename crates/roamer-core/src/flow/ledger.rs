// ── Directive ledger ──
//
// Per-owner record of what has been submitted, keyed by connect point
// pair. An occupied key is never resubmitted; a withdraw removes exactly
// the one directive stored under its key.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use super::{ConnectPointPair, DirectiveKind, DirectiveOperation, FlowDirective, FlowHandle, FlowService};
use crate::error::CoreError;

/// A directive the backend accepted, with the handle it returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledDirective {
    pub handle: FlowHandle,
    pub directive: FlowDirective,
}

pub(crate) struct FlowLedger {
    owner: String,
    entries: DashMap<ConnectPointPair, InstalledDirective>,
}

impl FlowLedger {
    pub(crate) fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: DashMap::new(),
        }
    }

    /// Submit the directive produced by `build` unless `pair` is already
    /// recorded. Returns `true` if a new directive was installed.
    ///
    /// The key's shard stays locked across build and submit, so two
    /// concurrent installs for one key submit once. Failed builds and
    /// submissions are reported and leave the key free.
    pub(crate) fn install(
        &self,
        pair: ConnectPointPair,
        kind: DirectiveKind,
        flows: &FlowService,
        build: impl FnOnce() -> Result<FlowDirective, CoreError>,
    ) -> bool {
        let Entry::Vacant(slot) = self.entries.entry(pair) else {
            return false;
        };
        let directive = match build() {
            Ok(directive) => directive,
            Err(e) => {
                flows.report(&self.owner, kind, DirectiveOperation::Build, &e);
                return false;
            }
        };
        match flows.submit(&self.owner, &directive) {
            Some(handle) => {
                slot.insert(InstalledDirective { handle, directive });
                true
            }
            None => false,
        }
    }

    /// Withdraw the directive stored under `pair`, if any.
    pub(crate) fn withdraw(&self, pair: &ConnectPointPair, flows: &FlowService) -> bool {
        match self.entries.remove(pair) {
            Some((_, installed)) => {
                flows.withdraw(&self.owner, &installed);
                true
            }
            None => false,
        }
    }

    /// Withdraw every directive whose key satisfies `predicate`.
    pub(crate) fn withdraw_where(
        &self,
        flows: &FlowService,
        predicate: impl Fn(&ConnectPointPair) -> bool,
    ) -> usize {
        let keys: Vec<ConnectPointPair> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter(|pair| self.withdraw(pair, flows)).count()
    }

    pub(crate) fn withdraw_all(&self, flows: &FlowService) -> usize {
        self.withdraw_where(flows, |_| true)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of everything currently installed.
    pub(crate) fn installed(&self) -> Vec<InstalledDirective> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }
}
