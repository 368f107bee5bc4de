use std::collections::HashSet;

use eventstream_core::{SessionEventSink, SessionStore, StoreReadiness};
use tracing::debug;

/// Result of asking the gate whether an account may start streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Store is ready; start now.
    Ready,
    /// Store already failed to open; warn, then start anyway.
    ReadyCorrupted,
    /// Store is loading; a readiness message will follow.
    Deferred,
    /// Startup already ran for this account in the current cycle.
    AlreadyReleased,
}

/// Defers stream start until each account's store stops loading.
///
/// Guarantees at most one release per account per start cycle; `clear`
/// begins a new cycle.
#[derive(Debug, Default)]
pub struct StoreReadinessGate {
    pending: HashSet<String>,
    released: HashSet<String>,
}

impl StoreReadinessGate {
    pub fn await_ready(
        &mut self,
        account_id: &str,
        store: &dyn SessionStore,
        sink: SessionEventSink,
    ) -> GateOutcome {
        if self.released.contains(account_id) || self.pending.contains(account_id) {
            return GateOutcome::AlreadyReleased;
        }

        match store.readiness() {
            StoreReadiness::Ready => {
                self.released.insert(account_id.to_owned());
                GateOutcome::Ready
            }
            StoreReadiness::Corrupted => {
                self.released.insert(account_id.to_owned());
                GateOutcome::ReadyCorrupted
            }
            StoreReadiness::Loading => {
                debug!(%account_id, "store still loading; deferring stream start");
                self.pending.insert(account_id.to_owned());
                store.watch_readiness(sink);
                GateOutcome::Deferred
            }
        }
    }

    /// Consume a readiness signal. Returns the readiness exactly once for a
    /// pending account when it unblocks startup.
    pub fn on_store_signal(
        &mut self,
        account_id: &str,
        readiness: StoreReadiness,
    ) -> Option<StoreReadiness> {
        if !readiness.unblocks_startup() || !self.pending.remove(account_id) {
            return None;
        }
        self.released.insert(account_id.to_owned());
        Some(readiness)
    }

    pub fn is_pending(&self, account_id: &str) -> bool {
        self.pending.contains(account_id)
    }

    /// Drop all state for one account.
    pub fn forget(&mut self, account_id: &str) {
        self.pending.remove(account_id);
        self.released.remove(account_id);
    }

    /// Start a new cycle.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.released.clear();
    }
}
