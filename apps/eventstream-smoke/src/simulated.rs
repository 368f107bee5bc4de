//! Scripted stand-ins for logged-in account sessions.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eventstream_core::{
    AccountSession, ControllerError, NotificationRule, RoomEvent, RoomEventKind, RoomSnapshot,
    SessionDirectory, SessionEventKind, SessionEventSink, SessionStore, StoreReadiness,
};
use tracing::{debug, info};
use uuid::Uuid;

const STORE_LOAD_DELAY: Duration = Duration::from_millis(250);
const CATCHUP_PASS_DELAY: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn event_id() -> String {
    format!("${}", Uuid::new_v4().simple())
}

/// Store that finishes loading shortly after someone starts watching it.
pub struct SimulatedStore {
    readiness: Arc<Mutex<StoreReadiness>>,
}

impl SessionStore for SimulatedStore {
    fn readiness(&self) -> StoreReadiness {
        *lock(&self.readiness)
    }

    fn watch_readiness(&self, sink: SessionEventSink) {
        let readiness = Arc::clone(&self.readiness);
        tokio::spawn(async move {
            tokio::time::sleep(STORE_LOAD_DELAY).await;
            *lock(&readiness) = StoreReadiness::Ready;
            debug!(account_id = %sink.account_id(), "simulated store loaded");
            sink.emit(SessionEventKind::StoreReadiness(StoreReadiness::Ready));
        });
    }

    fn resume_token(&self) -> Option<String> {
        Some(format!("s{}", Uuid::new_v4().simple()))
    }
}

pub struct SimulatedSession {
    account_id: String,
    store: SimulatedStore,
    sink: Mutex<Option<SessionEventSink>>,
    active_call: AtomicBool,
}

impl SimulatedSession {
    pub fn new(account_id: &str, readiness: StoreReadiness) -> Arc<Self> {
        Arc::new(Self {
            account_id: account_id.to_owned(),
            store: SimulatedStore {
                readiness: Arc::new(Mutex::new(readiness)),
            },
            sink: Mutex::new(None),
            active_call: AtomicBool::new(false),
        })
    }

    /// Deliver one notify-worthy message.
    pub fn deliver_message(&self, room_id: &str, room_name: &str, sender_id: &str, body: &str) {
        let event = RoomEvent {
            event_id: event_id(),
            room_id: room_id.to_owned(),
            sender_id: sender_id.to_owned(),
            sender_display_name: None,
            kind: RoomEventKind::Message,
            body: Some(body.to_owned()),
            call_id: None,
            is_video_call: false,
            timestamp_ms: 0,
        };
        self.emit(SessionEventKind::NotifyWorthyEvent {
            event,
            room: snapshot(room_id, room_name),
            rule: message_rule(),
        });
    }

    pub fn complete_batch(&self) {
        self.emit(SessionEventKind::BatchComplete);
    }

    /// Start ringing: a call invite plus the end of its delivery batch.
    pub fn ring(&self, room_id: &str, caller_id: &str, call_id: &str) {
        self.active_call.store(true, Ordering::SeqCst);
        self.emit(SessionEventKind::NotifyWorthyEvent {
            event: call_event(room_id, caller_id, RoomEventKind::CallInvite, call_id),
            room: snapshot(room_id, "Call"),
            rule: NotificationRule {
                rule_id: ".m.rule.call".to_owned(),
                notify: true,
                sound: Some("ring".to_owned()),
                highlight: false,
            },
        });
        self.complete_batch();
    }

    pub fn hang_up(&self, room_id: &str, caller_id: &str, call_id: &str) {
        self.active_call.store(false, Ordering::SeqCst);
        self.emit(SessionEventKind::LiveEvent {
            event: call_event(room_id, caller_id, RoomEventKind::CallHangup, call_id),
            room: snapshot(room_id, "Call"),
        });
    }

    fn emit(&self, kind: SessionEventKind) {
        match lock(&self.sink).as_ref() {
            Some(sink) => {
                sink.emit(kind);
            }
            None => debug!(account_id = %self.account_id, "no listener attached; event dropped"),
        }
    }
}

impl AccountSession for SimulatedSession {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn is_active(&self) -> bool {
        true
    }

    fn has_active_calls(&self) -> bool {
        self.active_call.load(Ordering::SeqCst)
    }

    fn store(&self) -> &dyn SessionStore {
        &self.store
    }

    fn start_stream(&self, resume_token: Option<String>) -> Result<(), ControllerError> {
        info!(account_id = %self.account_id, resume_token = ?resume_token, "stream started");
        Ok(())
    }

    fn stop_stream(&self) {
        info!(account_id = %self.account_id, "stream stopped");
    }

    fn pause_stream(&self) {
        info!(account_id = %self.account_id, "stream paused");
    }

    fn resume_stream(&self) {
        info!(account_id = %self.account_id, "stream resumed");
    }

    fn catchup_stream(&self) {
        info!(account_id = %self.account_id, "catch-up pass");
        let Some(sink) = lock(&self.sink).clone() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(CATCHUP_PASS_DELAY).await;
            sink.emit(SessionEventKind::BatchComplete);
        });
    }

    fn attach_listener(&self, sink: SessionEventSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn detach_listener(&self) {
        *lock(&self.sink) = None;
    }
}

pub struct SimulatedDirectory {
    sessions: HashMap<String, Arc<SimulatedSession>>,
}

impl SimulatedDirectory {
    pub fn new(sessions: &[&Arc<SimulatedSession>]) -> Arc<Self> {
        Arc::new(Self {
            sessions: sessions
                .iter()
                .map(|session| (session.account_id.clone(), Arc::clone(session)))
                .collect(),
        })
    }
}

impl SessionDirectory for SimulatedDirectory {
    fn session(&self, account_id: &str) -> Option<Arc<dyn AccountSession>> {
        self.sessions
            .get(account_id)
            .map(|session| Arc::clone(session) as Arc<dyn AccountSession>)
    }
}

fn snapshot(room_id: &str, name: &str) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room_id.to_owned(),
        display_name: Some(name.to_owned()),
        is_direct: false,
    }
}

fn message_rule() -> NotificationRule {
    NotificationRule {
        rule_id: ".m.rule.message".to_owned(),
        notify: true,
        sound: Some("default".to_owned()),
        highlight: false,
    }
}

fn call_event(room_id: &str, sender_id: &str, kind: RoomEventKind, call_id: &str) -> RoomEvent {
    RoomEvent {
        event_id: event_id(),
        room_id: room_id.to_owned(),
        sender_id: sender_id.to_owned(),
        sender_display_name: None,
        kind,
        body: None,
        call_id: Some(call_id.to_owned()),
        is_video_call: false,
        timestamp_ms: 0,
    }
}
