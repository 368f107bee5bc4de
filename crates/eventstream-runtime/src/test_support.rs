//! Recording fakes for the session layer.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use eventstream_core::{
    AccountSession, ControllerError, NotificationRule, RoomEvent, RoomEventKind, RoomSnapshot,
    SessionDirectory, SessionEventKind, SessionEventSink, SessionStore, StoreReadiness,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Start(Option<String>),
    Stop,
    Pause,
    Resume,
    Catchup,
    Attach(u64),
    Detach,
}

pub struct FakeStore {
    readiness: Mutex<StoreReadiness>,
    watcher: Mutex<Option<SessionEventSink>>,
    resume_token: Option<String>,
}

impl FakeStore {
    fn new(readiness: StoreReadiness) -> Self {
        Self {
            readiness: Mutex::new(readiness),
            watcher: Mutex::new(None),
            resume_token: Some("s72594_4483_1934".to_owned()),
        }
    }

    /// Leave `Loading` and notify the registered watcher once.
    pub fn finish_loading(&self, readiness: StoreReadiness) -> bool {
        *lock(&self.readiness) = readiness;
        match lock(&self.watcher).take() {
            Some(sink) => sink.emit(SessionEventKind::StoreReadiness(readiness)),
            None => false,
        }
    }

    pub fn has_watcher(&self) -> bool {
        lock(&self.watcher).is_some()
    }
}

impl SessionStore for FakeStore {
    fn readiness(&self) -> StoreReadiness {
        *lock(&self.readiness)
    }

    fn watch_readiness(&self, sink: SessionEventSink) {
        *lock(&self.watcher) = Some(sink);
    }

    fn resume_token(&self) -> Option<String> {
        self.resume_token.clone()
    }
}

pub struct FakeSession {
    account_id: String,
    active: AtomicBool,
    active_calls: AtomicBool,
    fail_start: AtomicBool,
    store: FakeStore,
    sink: Mutex<Option<SessionEventSink>>,
    calls: Mutex<Vec<SessionCall>>,
}

impl FakeSession {
    pub fn new(account_id: &str, readiness: StoreReadiness) -> Arc<Self> {
        Arc::new(Self {
            account_id: account_id.to_owned(),
            active: AtomicBool::new(true),
            active_calls: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            store: FakeStore::new(readiness),
            sink: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ready(account_id: &str) -> Arc<Self> {
        Self::new(account_id, StoreReadiness::Ready)
    }

    pub fn fake_store(&self) -> &FakeStore {
        &self.store
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_active_calls(&self, active: bool) {
        self.active_calls.store(active, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, predicate: impl Fn(&SessionCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    pub fn start_count(&self) -> usize {
        self.count(|call| matches!(call, SessionCall::Start(_)))
    }

    pub fn catchup_count(&self) -> usize {
        self.count(|call| *call == SessionCall::Catchup)
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.sink).is_some()
    }

    /// Deliver through the attached listener, if any.
    pub fn emit(&self, kind: SessionEventKind) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.emit(kind),
            None => false,
        }
    }

    pub fn emit_bing(&self, event: RoomEvent, room: RoomSnapshot) -> bool {
        self.emit(SessionEventKind::NotifyWorthyEvent {
            event,
            room,
            rule: loud_rule(),
        })
    }

    fn record(&self, call: SessionCall) {
        lock(&self.calls).push(call);
    }
}

impl AccountSession for FakeSession {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn has_active_calls(&self) -> bool {
        self.active_calls.load(Ordering::SeqCst)
    }

    fn store(&self) -> &dyn SessionStore {
        &self.store
    }

    fn start_stream(&self, resume_token: Option<String>) -> Result<(), ControllerError> {
        self.record(SessionCall::Start(resume_token));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ControllerError::session(
                &self.account_id,
                "start_stream",
                "homeserver unreachable",
            ));
        }
        Ok(())
    }

    fn stop_stream(&self) {
        self.record(SessionCall::Stop);
    }

    fn pause_stream(&self) {
        self.record(SessionCall::Pause);
    }

    fn resume_stream(&self) {
        self.record(SessionCall::Resume);
    }

    fn catchup_stream(&self) {
        self.record(SessionCall::Catchup);
    }

    fn attach_listener(&self, sink: SessionEventSink) {
        self.record(SessionCall::Attach(sink.generation()));
        *lock(&self.sink) = Some(sink);
    }

    fn detach_listener(&self) {
        self.record(SessionCall::Detach);
        *lock(&self.sink) = None;
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
}

impl FakeDirectory {
    pub fn with(sessions: &[&Arc<FakeSession>]) -> Arc<Self> {
        let directory = Self::default();
        for session in sessions {
            directory.insert(Arc::clone(session));
        }
        Arc::new(directory)
    }

    pub fn insert(&self, session: Arc<FakeSession>) {
        lock(&self.sessions).insert(session.account_id.clone(), session);
    }

    pub fn remove(&self, account_id: &str) -> Option<Arc<FakeSession>> {
        lock(&self.sessions).remove(account_id)
    }
}

impl SessionDirectory for FakeDirectory {
    fn session(&self, account_id: &str) -> Option<Arc<dyn AccountSession>> {
        lock(&self.sessions)
            .get(account_id)
            .map(|session| Arc::clone(session) as Arc<dyn AccountSession>)
    }
}

pub fn loud_rule() -> NotificationRule {
    NotificationRule {
        rule_id: ".m.rule.message".to_owned(),
        notify: true,
        sound: Some("default".to_owned()),
        highlight: false,
    }
}

pub fn quiet_rule() -> NotificationRule {
    NotificationRule {
        rule_id: ".m.rule.room_one_to_one".to_owned(),
        notify: true,
        sound: None,
        highlight: false,
    }
}

pub fn message(event_id: &str, room_id: &str, sender_id: &str, body: &str) -> RoomEvent {
    RoomEvent {
        event_id: event_id.to_owned(),
        room_id: room_id.to_owned(),
        sender_id: sender_id.to_owned(),
        sender_display_name: None,
        kind: RoomEventKind::Message,
        body: Some(body.to_owned()),
        call_id: None,
        is_video_call: false,
        timestamp_ms: 1_731_000_000,
    }
}

pub fn call_event(
    event_id: &str,
    room_id: &str,
    sender_id: &str,
    kind: RoomEventKind,
    call_id: &str,
) -> RoomEvent {
    RoomEvent {
        event_id: event_id.to_owned(),
        room_id: room_id.to_owned(),
        sender_id: sender_id.to_owned(),
        sender_display_name: Some("Caller".to_owned()),
        kind,
        body: None,
        call_id: Some(call_id.to_owned()),
        is_video_call: false,
        timestamp_ms: 1_731_000_000,
    }
}

pub fn room(room_id: &str, name: &str) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room_id.to_owned(),
        display_name: Some(name.to_owned()),
        is_direct: false,
    }
}
