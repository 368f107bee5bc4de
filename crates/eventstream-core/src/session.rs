use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    error::ControllerError,
    types::{SessionEventKind, SessionMessage, StoreReadiness},
};

/// Persistent store owned by an account session.
pub trait SessionStore: Send + Sync {
    /// Current readiness.
    fn readiness(&self) -> StoreReadiness;

    /// Whether cached state is loaded.
    fn is_ready(&self) -> bool {
        self.readiness() == StoreReadiness::Ready
    }

    /// Ask the store to emit one `StoreReadiness` message on `sink` once it
    /// leaves `Loading`.
    fn watch_readiness(&self, sink: SessionEventSink);

    /// Last sync token, used to resume streaming where the store left off.
    fn resume_token(&self) -> Option<String> {
        None
    }
}

/// Stream control surface of one logged-in account.
///
/// Implementations are owned by the session layer; the controller only keeps
/// weak references to them.
pub trait AccountSession: Send + Sync {
    /// Account (user) identifier.
    fn account_id(&self) -> &str;

    /// Whether the session is still logged in and usable.
    fn is_active(&self) -> bool;

    /// Whether any call is ringing or in progress on this account.
    fn has_active_calls(&self) -> bool;

    /// The account's persistent store.
    fn store(&self) -> &dyn SessionStore;

    /// Begin continuous streaming.
    fn start_stream(&self, resume_token: Option<String>) -> Result<(), ControllerError>;

    /// Stop streaming.
    fn stop_stream(&self);

    /// Keep the connection warm but stop delivering live events.
    fn pause_stream(&self);

    /// Resume live delivery after a pause or catch-up.
    fn resume_stream(&self);

    /// Run one bounded catch-up sync, ending with `BatchComplete`.
    fn catchup_stream(&self);

    /// Start delivering events on `sink`.
    fn attach_listener(&self, sink: SessionEventSink);

    /// Stop delivering events.
    fn detach_listener(&self);
}

/// Resolves account IDs to live sessions.
pub trait SessionDirectory: Send + Sync {
    /// Session for `account_id`, if one is logged in.
    fn session(&self, account_id: &str) -> Option<Arc<dyn AccountSession>>;
}

/// Sender handed to a session so it can report events to the controller.
///
/// Every sink is stamped with the attach cycle it was created in; the
/// controller drops messages from cycles that have since ended.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    account_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl SessionEventSink {
    /// Create a sink for one account and attach cycle.
    pub fn new(
        account_id: impl Into<String>,
        generation: u64,
        tx: mpsc::UnboundedSender<SessionMessage>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            generation,
            tx,
        }
    }

    /// Account this sink reports for.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Attach cycle of this sink.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver one message. Returns `false` once the controller is gone.
    pub fn emit(&self, kind: SessionEventKind) -> bool {
        self.tx
            .send(SessionMessage {
                account_id: self.account_id.clone(),
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}
