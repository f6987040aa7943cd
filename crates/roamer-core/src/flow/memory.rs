// ── In-memory flow backend ──
//
// Records live directives instead of programming switches. Useful as a
// dry-run backend and as the backend of choice in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{BackendError, DirectiveKind, FlowBackend, FlowDirective, FlowHandle};

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    installed: DashMap<FlowHandle, FlowDirective>,
    submissions: AtomicUsize,
    withdrawals: AtomicUsize,
    fail_submissions: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submission fail until reset.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Successful submissions so far.
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Successful withdrawals so far.
    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.load(Ordering::SeqCst)
    }

    /// Directives currently live.
    pub fn installed(&self) -> Vec<FlowDirective> {
        self.installed.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn installed_of_kind(&self, kind: DirectiveKind) -> Vec<FlowDirective> {
        self.installed
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl FlowBackend for InMemoryBackend {
    fn submit(&self, directive: &FlowDirective) -> Result<FlowHandle, BackendError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                reason: "submissions disabled".into(),
            });
        }
        let handle = FlowHandle::random();
        self.installed.insert(handle, directive.clone());
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn withdraw(&self, handle: &FlowHandle) -> Result<(), BackendError> {
        if self.installed.remove(handle).is_none() {
            return Err(BackendError::UnknownHandle { handle: *handle });
        }
        self.withdrawals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
