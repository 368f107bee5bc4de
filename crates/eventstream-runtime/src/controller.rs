use std::sync::Arc;

use eventstream_core::{
    AccountSession, ControllerChannelError, ControllerChannels, ControllerError,
    ControllerErrorCategory, ControllerEvent, ControllerPublisher, ControllerReceivers,
    ControllerState, EventStream,
    NotificationRule, ReissuePolicy, RoomEvent, RoomEventKind, RoomSnapshot, SessionDirectory,
    SessionEventKind, SessionMessage, StoreReadiness, StreamCommand, StreamStateMachine,
    Transition, TransitionPlan, UiPresence,
};
use eventstream_platform::PlatformServices;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    coalescer::{Decision, EventContext, FlushReport},
    config::ControllerConfig,
    notifications::{NotificationHub, SharedNotificationHub, lock_hub},
    readiness::{GateOutcome, StoreReadinessGate},
    registry::{AccountHandle, AccountRegistry},
};

/// Cloneable entry point to a running controller.
///
/// Commands are applied by the controller task in the order they are sent.
/// Notification queries and dismissals go straight to the shared hub.
#[derive(Clone)]
pub struct ControllerHandle {
    channels: ControllerChannels,
    publisher: ControllerPublisher,
    state_rx: watch::Receiver<ControllerState>,
    ui_tx: Arc<watch::Sender<UiPresence>>,
    hub: SharedNotificationHub,
}

impl ControllerHandle {
    pub async fn send(&self, command: StreamCommand) -> Result<(), ControllerChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn current_state(&self) -> ControllerState {
        *self.state_rx.borrow()
    }

    /// Resolve once the controller has committed `target`.
    pub async fn wait_for_state(&self, target: ControllerState) -> Result<(), ControllerChannelError> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| ControllerChannelError::ControllerGone)
    }

    /// Send `command` and resolve once `target` is committed.
    ///
    /// Fails with `CommandRejected` when the controller refuses a command
    /// while waiting, so callers should not interleave commands from other
    /// tasks with this one.
    pub async fn send_and_wait(
        &self,
        command: StreamCommand,
        target: ControllerState,
    ) -> Result<(), ControllerChannelError> {
        let mut events = self.subscribe();
        self.send(command).await?;
        tokio::select! {
            biased;
            rejection = next_rejection(&mut events) => Err(rejection),
            reached = self.wait_for_state(target) => reached,
        }
    }

    /// Report what the UI shows; read on every event and catch-up request.
    pub fn set_ui_presence(&self, presence: UiPresence) {
        self.ui_tx.send_replace(presence);
    }

    pub fn ui_presence(&self) -> UiPresence {
        self.ui_tx.borrow().clone()
    }

    pub fn is_call_notification_active(&self, call_id: &str) -> bool {
        lock_hub(&self.hub).is_call_notification_active(call_id)
    }

    /// Dismiss every notification, calls included, or only the message
    /// notifications of `room_id` when it was the last notified room.
    pub fn dismiss_notifications(&self, room_id: Option<&str>) -> bool {
        let dismissed = lock_hub(&self.hub).dismiss(room_id);
        if dismissed {
            debug!(room_id = ?room_id, "notifications dismissed");
            self.publisher.emit(ControllerEvent::NotificationsDismissed {
                room_id: room_id.map(str::to_owned),
            });
            self.publisher.emit(ControllerEvent::BadgeUpdated { total: 0 });
        }
        dismissed
    }

    pub fn on_hangup(&self, call_id: &str) -> bool {
        let dismissed = lock_hub(&self.hub).on_hangup(call_id);
        emit_call_dismissed(&self.publisher, call_id, dismissed);
        dismissed
    }

    pub fn on_answer_elsewhere(&self, call_id: &str) -> bool {
        let dismissed = lock_hub(&self.hub).on_answer_elsewhere(call_id);
        emit_call_dismissed(&self.publisher, call_id, dismissed);
        dismissed
    }

    pub fn unread_total(&self) -> u64 {
        lock_hub(&self.hub).unread_total()
    }
}

/// Spawn the controller task and return its handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_controller(
    config: ControllerConfig,
    directory: Arc<dyn SessionDirectory>,
    platform: PlatformServices,
) -> ControllerHandle {
    let (channels, receivers) = ControllerChannels::new(config.command_buffer, config.event_buffer);
    let (ui_tx, ui_rx) = watch::channel(UiPresence::background());
    let runtime = ControllerRuntime::new(
        &config,
        channels.publisher(),
        receivers,
        ui_rx,
        directory,
        platform,
    );
    let state_rx = runtime.state_tx.subscribe();
    let hub = Arc::clone(&runtime.hub);
    tokio::spawn(async move {
        runtime.run().await;
    });

    ControllerHandle {
        publisher: channels.publisher(),
        channels,
        state_rx,
        ui_tx: Arc::new(ui_tx),
        hub,
    }
}

async fn next_rejection(events: &mut EventStream) -> ControllerChannelError {
    loop {
        match events.recv().await {
            Ok(ControllerEvent::CommandRejected { code, message }) => {
                return ControllerChannelError::CommandRejected { code, message };
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return ControllerChannelError::ControllerGone,
        }
    }
}

fn emit_call_dismissed(publisher: &ControllerPublisher, call_id: &str, dismissed: bool) {
    if dismissed {
        publisher.emit(ControllerEvent::CallNotificationDismissed {
            call_id: call_id.to_owned(),
        });
    }
}

struct PendingReissue {
    cycle: u64,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ControllerRuntime {
    publisher: ControllerPublisher,
    command_rx: mpsc::Receiver<StreamCommand>,
    session_rx: mpsc::UnboundedReceiver<SessionMessage>,
    reissue_tx: mpsc::UnboundedSender<u64>,
    reissue_rx: mpsc::UnboundedReceiver<u64>,
    state_machine: StreamStateMachine,
    state_tx: watch::Sender<ControllerState>,
    ui_rx: watch::Receiver<UiPresence>,
    directory: Arc<dyn SessionDirectory>,
    platform: PlatformServices,
    hub: SharedNotificationHub,
    registry: AccountRegistry,
    readiness: StoreReadinessGate,
    reissue_policy: ReissuePolicy,
    reissue_attempts: u32,
    reissue_cycle: u64,
    pending_reissue: Option<PendingReissue>,
    next_generation: u64,
    foreground_held: bool,
}

impl ControllerRuntime {
    fn new(
        config: &ControllerConfig,
        publisher: ControllerPublisher,
        receivers: ControllerReceivers,
        ui_rx: watch::Receiver<UiPresence>,
        directory: Arc<dyn SessionDirectory>,
        platform: PlatformServices,
    ) -> Self {
        let (state_tx, _) = watch::channel(ControllerState::Unknown);
        let hub = NotificationHub::new(config.coalescer_options(), &platform).shared();
        let (reissue_tx, reissue_rx) = mpsc::unbounded_channel();
        Self {
            publisher,
            command_rx: receivers.commands,
            session_rx: receivers.sessions,
            reissue_tx,
            reissue_rx,
            state_machine: StreamStateMachine::default(),
            state_tx,
            ui_rx,
            directory,
            platform,
            hub,
            registry: AccountRegistry::default(),
            readiness: StoreReadinessGate::default(),
            reissue_policy: config.reissue_policy(),
            reissue_attempts: 0,
            reissue_cycle: 0,
            pending_reissue: None,
            next_generation: 0,
            foreground_held: false,
        }
    }

    /// Runs until every handle is dropped.
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(cycle) = self.reissue_rx.recv() => self.on_reissue_due(cycle),
                Some(message) = self.session_rx.recv() => self.on_session_message(message),
            }
        }
        info!("all controller handles dropped; shutting down");
        self.cancel_reissue().await;
        for handle in self.registry.clear() {
            if let Some(session) = handle.session() {
                session.detach_listener();
            }
        }
        self.set_foreground_presence(false);
    }

    async fn on_command(&mut self, command: StreamCommand) {
        let kind = command.kind();
        debug!(command = kind, state = ?self.state_machine.state(), "applying command");
        if let Err(err) = self.handle_command(command).await {
            warn!(command = kind, code = %err.code, error = %err.message, "command rejected");
            self.publisher.emit(err.into_rejection());
        }
        self.refresh_foreground_presence();
    }

    async fn handle_command(&mut self, command: StreamCommand) -> Result<(), ControllerError> {
        let (candidate, transition) = self.validate_transition(&command)?;
        let Transition { plan, events } = transition;

        match plan {
            TransitionPlan::FirstStart { account_ids } => self.handle_first_start(account_ids)?,
            TransitionPlan::ResumeAll => self.handle_resume().await,
            TransitionPlan::AlreadyStarted => debug!("already started; nothing to do"),
            TransitionPlan::StopAll => self.handle_stop().await,
            TransitionPlan::PauseAll => self.handle_pause().await,
            TransitionPlan::CatchupAll => self.handle_catchup().await,
            TransitionPlan::RefreshForegroundPresence => {
                debug!("re-evaluating foreground presence")
            }
            TransitionPlan::AddAccount { account_id } => {
                self.handle_add_account(&account_id, candidate.state())?
            }
            TransitionPlan::RemoveAccount { account_id } => {
                self.handle_remove_account(&account_id)?
            }
        }

        self.commit_transition(candidate, events);
        Ok(())
    }

    fn handle_first_start(&mut self, account_ids: Vec<String>) -> Result<(), ControllerError> {
        self.readiness.clear();
        let mut attached = 0_usize;
        for account_id in &account_ids {
            if self.attach_account(account_id, ControllerState::Started) {
                attached += 1;
            }
        }
        if attached == 0 {
            return Err(ControllerError::missing_prerequisite(
                "no_sessions",
                format!("none of {} requested account(s) has a live session", account_ids.len()),
            ));
        }
        info!(accounts = attached, "streams attached");
        self.reset_unread();
        Ok(())
    }

    async fn handle_resume(&mut self) {
        self.cancel_reissue().await;
        self.reset_unread();
        for session in self.registry.live_sessions() {
            session.resume_stream();
        }
    }

    async fn handle_stop(&mut self) {
        self.set_foreground_presence(false);
        self.cancel_reissue().await;
        for handle in self.registry.clear() {
            if let Some(session) = handle.session() {
                session.stop_stream();
                session.detach_listener();
            }
        }
        self.readiness.clear();
        lock_hub(&self.hub).clear();
        self.publisher.emit(ControllerEvent::BadgeUpdated { total: 0 });
    }

    async fn handle_pause(&mut self) {
        self.cancel_reissue().await;
        for session in self.registry.live_sessions() {
            session.pause_stream();
        }
    }

    async fn handle_catchup(&mut self) {
        self.cancel_reissue().await;
        self.reissue_attempts = 0;
        for session in self.registry.live_sessions() {
            session.catchup_stream();
        }
    }

    fn handle_add_account(
        &mut self,
        account_id: &str,
        mode: ControllerState,
    ) -> Result<(), ControllerError> {
        if self.registry.contains(account_id) {
            return Err(ControllerError::new(
                ControllerErrorCategory::InvalidTransition,
                "account_already_registered",
                format!("account {account_id} is already registered"),
            ));
        }
        if !self.attach_account(account_id, mode) {
            return Err(ControllerError::missing_prerequisite(
                "session_unavailable",
                format!("no live session for account {account_id}"),
            ));
        }
        info!(%account_id, accounts = self.registry.len(), "account added");
        Ok(())
    }

    fn handle_remove_account(&mut self, account_id: &str) -> Result<(), ControllerError> {
        let handle = self.registry.remove(account_id).ok_or_else(|| {
            ControllerError::missing_prerequisite(
                "unknown_account",
                format!("account {account_id} is not registered"),
            )
        })?;
        if let Some(session) = handle.session() {
            session.stop_stream();
            session.detach_listener();
        }
        self.readiness.forget(account_id);
        info!(%account_id, accounts = self.registry.len(), "account removed");
        Ok(())
    }

    /// Register and attach one account, then start it now or once its store
    /// is ready. `mode` is the state the stream must be aligned to.
    fn attach_account(&mut self, account_id: &str, mode: ControllerState) -> bool {
        let Some(session) = self.directory.session(account_id) else {
            warn!(%account_id, "no session for account; skipping");
            return false;
        };
        if !session.is_active() {
            warn!(%account_id, "session is not active; skipping");
            return false;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        if !self.registry.register(AccountHandle::new(&session, generation)) {
            debug!(%account_id, "account already registered");
            return false;
        }
        session.attach_listener(self.publisher.session_sink(account_id, generation));

        let sink = self.publisher.session_sink(account_id, generation);
        match self.readiness.await_ready(account_id, session.store(), sink) {
            GateOutcome::Ready => self.start_session(session.as_ref(), mode),
            GateOutcome::ReadyCorrupted => {
                self.report_store_corrupted(account_id);
                self.start_session(session.as_ref(), mode);
            }
            GateOutcome::Deferred => debug!(%account_id, generation, "waiting for store"),
            GateOutcome::AlreadyReleased => {
                debug!(%account_id, "stream already started in this cycle")
            }
        }
        true
    }

    fn start_session(&self, session: &dyn AccountSession, mode: ControllerState) {
        let account_id = session.account_id();
        let resume_token = session.store().resume_token();
        if let Err(err) = session.start_stream(resume_token) {
            warn!(%account_id, code = %err.code, error = %err.message, "failed to start stream");
            return;
        }
        match mode {
            ControllerState::Paused => session.pause_stream(),
            ControllerState::Catchup => session.catchup_stream(),
            _ => {}
        }
        debug!(%account_id, mode = ?mode, "stream started");
    }

    fn report_store_corrupted(&self, account_id: &str) {
        let err = ControllerError::store_corrupted(account_id);
        warn!(%account_id, code = %err.code, error = %err.message, "starting with a degraded store");
        self.platform.warnings.store_corrupted(account_id);
        self.publisher.emit(ControllerEvent::StoreCorrupted {
            account_id: account_id.to_owned(),
        });
    }

    fn on_session_message(&mut self, message: SessionMessage) {
        let SessionMessage {
            account_id,
            generation,
            kind,
        } = message;
        if !self.registry.is_current(&account_id, generation) {
            debug!(%account_id, generation, "dropping message from a detached session");
            return;
        }

        match kind {
            SessionEventKind::LiveEvent { event, .. } => self.on_live_event(&account_id, &event),
            SessionEventKind::NotifyWorthyEvent { event, room, rule } => {
                self.on_notify_worthy_event(&account_id, &event, &room, &rule)
            }
            SessionEventKind::BatchComplete => self.on_batch_complete(&account_id),
            SessionEventKind::StoreReadiness(readiness) => {
                self.on_store_readiness(&account_id, readiness)
            }
        }
    }

    fn on_live_event(&mut self, account_id: &str, event: &RoomEvent) {
        let Some(call_id) = event.call_id.as_deref() else {
            trace!(%account_id, event_id = %event.event_id, "live event");
            return;
        };
        let dismissed = match event.kind {
            RoomEventKind::CallHangup => lock_hub(&self.hub).on_hangup(call_id),
            RoomEventKind::CallAnswer if event.sender_id == account_id => {
                lock_hub(&self.hub).on_answer_elsewhere(call_id)
            }
            _ => false,
        };
        emit_call_dismissed(&self.publisher, call_id, dismissed);
    }

    fn on_notify_worthy_event(
        &mut self,
        account_id: &str,
        event: &RoomEvent,
        room: &RoomSnapshot,
        rule: &NotificationRule,
    ) {
        let ui = self.ui_rx.borrow().clone();
        let ctx = EventContext {
            account_id,
            multi_account: self.registry.len() > 1,
            ui: &ui,
        };
        let decision = lock_hub(&self.hub).on_notify_worthy_event(ctx, event, room, rule);

        match decision {
            Decision::Suppressed(reason) => {
                trace!(%account_id, event_id = %event.event_id, reason = ?reason, "notification suppressed")
            }
            Decision::MessageQueued { sender_unread } => {
                debug!(%account_id, room_id = %event.room_id, sender_unread, "message notification queued")
            }
            Decision::CallQueued { call_id } => {
                info!(%account_id, %call_id, "incoming call notification queued")
            }
            Decision::CallEnded { call_id, dismissed } => {
                emit_call_dismissed(&self.publisher, &call_id, dismissed)
            }
        }
    }

    fn on_batch_complete(&mut self, account_id: &str) {
        let (report, total) = {
            let mut hub = lock_hub(&self.hub);
            let report = hub.flush();
            (report, hub.unread_total())
        };
        if !report.is_empty() {
            debug!(%account_id, posted = report.posted.len(), failed = report.failures.len(), "delivery batch flushed");
        }
        self.publish_flush(report, total);

        if self.state_machine.state() == ControllerState::Catchup {
            self.maybe_reissue_catchup();
        }
    }

    fn publish_flush(&self, report: FlushReport, total: u64) {
        let posted_message = report.posted_message();
        for posted in report.posted {
            self.publisher.emit(ControllerEvent::NotificationPosted {
                notification_id: posted.id,
                channel: posted.channel,
            });
        }
        for failure in report.failures {
            self.publisher.emit(ControllerEvent::NotificationFlushFailed {
                code: failure.code,
                message: failure.message,
            });
        }
        if posted_message {
            self.publisher.emit(ControllerEvent::BadgeUpdated { total });
        }
    }

    fn on_store_readiness(&mut self, account_id: &str, readiness: StoreReadiness) {
        let Some(readiness) = self.readiness.on_store_signal(account_id, readiness) else {
            trace!(%account_id, readiness = ?readiness, "store signal ignored");
            return;
        };
        if readiness == StoreReadiness::Corrupted {
            self.report_store_corrupted(account_id);
        }
        let Some(session) = self.registry.get(account_id).and_then(AccountHandle::session) else {
            warn!(%account_id, "store became ready after its session was dropped");
            return;
        };
        self.start_session(session.as_ref(), self.state_machine.state());
    }

    /// Schedule another catch-up while any account still has a call going.
    fn maybe_reissue_catchup(&mut self) {
        if self.pending_reissue.is_some() {
            trace!("catch-up re-issue already scheduled");
            return;
        }
        let sessions = self.registry.live_sessions();
        if !sessions.iter().any(|session| session.has_active_calls()) {
            debug!("catch-up finished with no active call; awaiting next command");
            return;
        }
        let Some(delay) = self.reissue_policy.delay_for_attempt(self.reissue_attempts) else {
            warn!(
                attempts = self.reissue_attempts,
                "catch-up re-issue limit reached; awaiting next command"
            );
            return;
        };

        self.reissue_attempts += 1;
        self.reissue_cycle += 1;
        let cycle = self.reissue_cycle;
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let reissue_tx = self.reissue_tx.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = stop_child.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = reissue_tx.send(cycle);
                }
            }
        });
        debug!(
            attempt = self.reissue_attempts,
            delay_ms = delay.as_millis() as u64,
            "active call; catch-up re-issue scheduled"
        );
        self.pending_reissue = Some(PendingReissue { cycle, stop, task });
    }

    fn on_reissue_due(&mut self, cycle: u64) {
        if self
            .pending_reissue
            .take_if(|pending| pending.cycle == cycle)
            .is_none()
        {
            debug!(cycle, "stale catch-up re-issue ignored");
            return;
        }
        if self.state_machine.state() != ControllerState::Catchup {
            debug!(state = ?self.state_machine.state(), "left catch-up; re-issue dropped");
            return;
        }
        for session in self.registry.live_sessions() {
            session.catchup_stream();
        }
    }

    async fn cancel_reissue(&mut self) {
        let Some(pending) = self.pending_reissue.take() else {
            return;
        };
        pending.stop.cancel();
        let _ = pending.task.await;
        debug!(cycle = pending.cycle, "pending catch-up re-issue cancelled");
    }

    fn reset_unread(&self) {
        lock_hub(&self.hub).reset_unread();
        self.publisher.emit(ControllerEvent::BadgeUpdated { total: 0 });
    }

    fn refresh_foreground_presence(&mut self) {
        let wanted =
            self.state_machine.is_running() && !self.platform.push.push_delivery_active();
        self.set_foreground_presence(wanted);
    }

    fn set_foreground_presence(&mut self, held: bool) {
        if held == self.foreground_held {
            return;
        }
        if held {
            self.platform.foreground.acquire();
        } else {
            self.platform.foreground.release();
        }
        self.foreground_held = held;
        info!(held, "foreground presence changed");
        self.publisher
            .emit(ControllerEvent::ForegroundPresenceChanged { held });
    }

    fn validate_transition(
        &self,
        command: &StreamCommand,
    ) -> Result<(StreamStateMachine, Transition), ControllerError> {
        let ui_visible = self.ui_rx.borrow().in_foreground;
        let mut candidate = self.state_machine.clone();
        let transition = candidate.apply(command, ui_visible)?;
        Ok((candidate, transition))
    }

    fn commit_transition(&mut self, candidate: StreamStateMachine, events: Vec<ControllerEvent>) {
        let previous = self.state_machine.state();
        self.state_machine = candidate;
        let state = self.state_machine.state();
        if state != previous {
            info!(from = ?previous, to = ?state, "controller state changed");
        }
        self.state_tx.send_replace(state);
        for event in events {
            self.publisher.emit(event);
        }
    }
}
