use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};

use eventstream_core::AccountSession;
use tracing::warn;

/// Registered account: its ID, the attach cycle it belongs to, and a
/// non-owning reference to the session that owns its own lifecycle.
#[derive(Clone)]
pub struct AccountHandle {
    account_id: String,
    generation: u64,
    session: Weak<dyn AccountSession>,
}

impl AccountHandle {
    pub fn new(session: &Arc<dyn AccountSession>, generation: u64) -> Self {
        Self {
            account_id: session.account_id().to_owned(),
            generation,
            session: Arc::downgrade(session),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The session, unless its owner has already dropped it.
    pub fn session(&self) -> Option<Arc<dyn AccountSession>> {
        self.session.upgrade()
    }
}

impl fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountHandle")
            .field("account_id", &self.account_id)
            .field("generation", &self.generation)
            .field("alive", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Set of accounts the controller currently fans commands out to.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: BTreeMap<String, AccountHandle>,
}

impl AccountRegistry {
    /// Insert `handle`; returns `false` when the account is already present.
    pub fn register(&mut self, handle: AccountHandle) -> bool {
        if self.accounts.contains_key(handle.account_id()) {
            return false;
        }
        self.accounts.insert(handle.account_id.clone(), handle);
        true
    }

    pub fn remove(&mut self, account_id: &str) -> Option<AccountHandle> {
        self.accounts.remove(account_id)
    }

    pub fn get(&self, account_id: &str) -> Option<&AccountHandle> {
        self.accounts.get(account_id)
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    /// Whether a message stamped with `generation` still belongs to the
    /// registered attach cycle of `account_id`.
    pub fn is_current(&self, account_id: &str, generation: u64) -> bool {
        self.accounts
            .get(account_id)
            .is_some_and(|handle| handle.generation == generation)
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    /// Sessions still alive, in account-ID order; dropped ones are logged
    /// and skipped.
    pub fn live_sessions(&self) -> Vec<Arc<dyn AccountSession>> {
        self.accounts
            .values()
            .filter_map(|handle| {
                let session = handle.session();
                if session.is_none() {
                    warn!(account_id = %handle.account_id, "session was dropped by its owner; skipping");
                }
                session
            })
            .collect()
    }

    /// Remove every account and return their handles.
    pub fn clear(&mut self) -> Vec<AccountHandle> {
        std::mem::take(&mut self.accounts).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
