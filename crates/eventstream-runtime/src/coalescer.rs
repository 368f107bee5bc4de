use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use eventstream_core::{
    CallNotification, CallSignal, ControllerError, ControllerErrorCategory, MessageNotification,
    NotificationChannel, NotificationRule, PostedNotification, RoomEvent, RoomSnapshot,
    UiPresence, call_notification_id, call_signal, notification_body, room_label, sender_label,
};
use eventstream_platform::{NotificationSink, PlatformError, WakeLock};
use tracing::{debug, trace, warn};

use crate::{dedup::SeenWindow, unread::UnreadAccumulator};

const WAKE_LOCK_TAG: &str = "eventstream:notification-flush";
const ENDED_CALL_WINDOW: usize = 64;

/// Variant flags for the notification path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerOptions {
    pub supports_calls: bool,
    pub show_multi_account_label: bool,
    pub wake_screen: Duration,
    pub dedup_window: usize,
}

impl Default for CoalescerOptions {
    fn default() -> Self {
        Self {
            supports_calls: true,
            show_multi_account_label: true,
            wake_screen: Duration::from_secs(3),
            dedup_window: 256,
        }
    }
}

/// Why an event produced no notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Duplicate,
    RuleSilent,
    ViewedRoom,
    NoDisplayableBody,
    CallSignal,
    CallsDisabled,
    StaleCall,
}

/// Outcome of one notify-worthy event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Suppressed(Suppression),
    MessageQueued { sender_unread: u64 },
    CallQueued { call_id: String },
    CallEnded { call_id: String, dismissed: bool },
}

/// Per-event facts the coalescer cannot see on its own.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub account_id: &'a str,
    pub multi_account: bool,
    pub ui: &'a UiPresence,
}

/// What one flush did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub posted: Vec<PostedNotification>,
    pub failures: Vec<ControllerError>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.posted.is_empty() && self.failures.is_empty()
    }

    pub fn posted_message(&self) -> bool {
        self.posted
            .iter()
            .any(|posted| posted.channel == NotificationChannel::Message)
    }
}

/// Releases the wake lock on every exit path, unwinding included.
struct WakeGuard {
    lock: Arc<dyn WakeLock>,
}

impl WakeGuard {
    fn acquire(lock: &Arc<dyn WakeLock>, timeout: Duration) -> Self {
        lock.acquire(WAKE_LOCK_TAG, timeout);
        Self {
            lock: Arc::clone(lock),
        }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.lock.release(WAKE_LOCK_TAG);
    }
}

/// Turns a burst of notify-worthy events into at most one message
/// notification per delivery batch, with incoming calls on their own
/// channel.
pub struct NotificationCoalescer {
    options: CoalescerOptions,
    notifications: Arc<dyn NotificationSink>,
    wake_lock: Arc<dyn WakeLock>,
    seen_events: SeenWindow,
    ended_calls: SeenWindow,
    pending_message: Option<MessageNotification>,
    pending_calls: BTreeMap<String, CallNotification>,
    posted_calls: HashSet<String>,
    notified_call_id: Option<String>,
    last_notified_room: Option<String>,
}

impl NotificationCoalescer {
    pub fn new(
        options: CoalescerOptions,
        notifications: Arc<dyn NotificationSink>,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Self {
        Self {
            options,
            notifications,
            wake_lock,
            seen_events: SeenWindow::new(options.dedup_window),
            ended_calls: SeenWindow::new(ENDED_CALL_WINDOW),
            pending_message: None,
            pending_calls: BTreeMap::new(),
            posted_calls: HashSet::new(),
            notified_call_id: None,
            last_notified_room: None,
        }
    }

    pub fn options(&self) -> CoalescerOptions {
        self.options
    }

    pub fn on_notify_worthy_event(
        &mut self,
        ctx: EventContext<'_>,
        event: &RoomEvent,
        room: &RoomSnapshot,
        rule: &NotificationRule,
        unread: &mut UnreadAccumulator,
    ) -> Decision {
        if !self.seen_events.insert(&event.event_id) {
            trace!(event_id = %event.event_id, "event already delivered");
            return Decision::Suppressed(Suppression::Duplicate);
        }
        if !rule.notify {
            return Decision::Suppressed(Suppression::RuleSilent);
        }
        if ctx.ui.is_viewing(ctx.account_id, &event.room_id) {
            trace!(room_id = %event.room_id, "room is on screen; not notifying");
            return Decision::Suppressed(Suppression::ViewedRoom);
        }

        if let Some(signal) = call_signal(event) {
            return self.on_call_signal(ctx, signal, event, room);
        }

        let Some(body) = notification_body(event) else {
            return Decision::Suppressed(Suppression::NoDisplayableBody);
        };

        // Counters only move while backgrounded.
        let sender_unread = if ctx.ui.in_foreground {
            unread.sender_count(&event.room_id, &event.sender_id)
        } else {
            unread.on_backgrounded_bing_event(&event.room_id, &event.sender_id)
        };
        let notification = MessageNotification {
            account_id: ctx.account_id.to_owned(),
            room_id: event.room_id.clone(),
            room_display_name: room_label(room, event),
            sender_display_name: sender_label(event),
            body,
            total_unread: unread.total(),
            sender_unread,
            loud: rule.is_loud(),
            multi_account: self.options.show_multi_account_label && ctx.multi_account,
        };
        if self.pending_message.replace(notification).is_some() {
            trace!("replaced unflushed message notification");
        }
        Decision::MessageQueued { sender_unread }
    }

    fn on_call_signal(
        &mut self,
        ctx: EventContext<'_>,
        signal: CallSignal,
        event: &RoomEvent,
        room: &RoomSnapshot,
    ) -> Decision {
        let Some(call_id) = event.call_id.as_deref() else {
            warn!(event_id = %event.event_id, "call event without call id");
            return Decision::Suppressed(Suppression::CallSignal);
        };

        match signal {
            CallSignal::Invite => {
                if !self.options.supports_calls {
                    return Decision::Suppressed(Suppression::CallsDisabled);
                }
                if self.ended_calls.contains(call_id) || self.posted_calls.contains(call_id) {
                    debug!(%call_id, "ignoring invite for a call already handled");
                    return Decision::Suppressed(Suppression::StaleCall);
                }
                self.pending_calls.insert(
                    call_id.to_owned(),
                    CallNotification {
                        call_id: call_id.to_owned(),
                        account_id: ctx.account_id.to_owned(),
                        room_id: event.room_id.clone(),
                        room_display_name: room_label(room, event),
                        caller_display_name: sender_label(event),
                        is_video: event.is_video_call,
                    },
                );
                self.notified_call_id = Some(call_id.to_owned());
                Decision::CallQueued {
                    call_id: call_id.to_owned(),
                }
            }
            CallSignal::Hangup => Decision::CallEnded {
                call_id: call_id.to_owned(),
                dismissed: self.on_hangup(call_id),
            },
            CallSignal::Answer if event.sender_id == ctx.account_id => Decision::CallEnded {
                call_id: call_id.to_owned(),
                dismissed: self.on_answer_elsewhere(call_id),
            },
            CallSignal::Answer | CallSignal::Other => {
                Decision::Suppressed(Suppression::CallSignal)
            }
        }
    }

    /// Post whatever accumulated since the last flush.
    ///
    /// Pending calls are posted without touching other notifications; a
    /// pending message waits for the next flush in that case. Otherwise the
    /// message channel is cleared and the latest message posted.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        if self.pending_message.is_none() && self.pending_calls.is_empty() {
            return report;
        }

        let _wake = WakeGuard::acquire(&self.wake_lock, self.options.wake_screen);

        if !self.pending_calls.is_empty() {
            for (call_id, call) in std::mem::take(&mut self.pending_calls) {
                let posted = PostedNotification::call(call);
                match self.notifications.post(&posted) {
                    Ok(()) => {
                        debug!(%call_id, "incoming call notification posted");
                        self.posted_calls.insert(call_id);
                        report.posted.push(posted);
                    }
                    Err(err) => report.failures.push(post_failure(&posted, err)),
                }
            }
            return report;
        }

        if let Some(message) = self.pending_message.take() {
            let posted = PostedNotification::message(message);
            self.notifications
                .cancel_channel(NotificationChannel::Message);
            match self.notifications.post(&posted) {
                Ok(()) => {
                    self.last_notified_room = Some(posted.room_id.clone());
                    report.posted.push(posted);
                }
                Err(err) => report.failures.push(post_failure(&posted, err)),
            }
        }

        report
    }

    /// Clear ringing state and dismiss the call notification, once.
    pub fn on_hangup(&mut self, call_id: &str) -> bool {
        debug!(%call_id, "call hung up");
        self.end_call(call_id)
    }

    /// Same as `on_hangup`, for a call picked up on another device.
    pub fn on_answer_elsewhere(&mut self, call_id: &str) -> bool {
        debug!(%call_id, "call answered on another device");
        self.end_call(call_id)
    }

    fn end_call(&mut self, call_id: &str) -> bool {
        self.ended_calls.insert(call_id);
        let was_pending = self.pending_calls.remove(call_id).is_some();
        let was_posted = self.posted_calls.remove(call_id);
        if was_posted {
            self.notifications.cancel(&call_notification_id(call_id));
        }
        if self.notified_call_id.as_deref() == Some(call_id) {
            self.notified_call_id = None;
        }
        was_pending || was_posted
    }

    /// Dismiss notifications.
    ///
    /// `None` clears everything, incoming calls included. `Some(room_id)`
    /// clears message notifications only, and only when `room_id` is the
    /// room of the last posted one.
    pub fn dismiss(&mut self, room_id: Option<&str>) -> bool {
        match room_id {
            Some(room_id) if self.last_notified_room.as_deref() != Some(room_id) => {
                return false;
            }
            Some(_) => {}
            None => self.dismiss_calls(),
        }
        self.notifications
            .cancel_channel(NotificationChannel::Message);
        self.pending_message = None;
        self.last_notified_room = None;
        true
    }

    fn dismiss_calls(&mut self) {
        self.pending_calls.clear();
        for call_id in self.posted_calls.drain() {
            debug!(%call_id, "call notification dismissed");
            self.notifications.cancel(&call_notification_id(&call_id));
        }
        self.notified_call_id = None;
    }

    /// Drop transient pending state.
    pub fn clear_pending(&mut self) {
        self.pending_message = None;
        self.pending_calls.clear();
        self.notified_call_id = None;
    }

    pub fn is_call_notification_active(&self, call_id: &str) -> bool {
        self.posted_calls.contains(call_id)
    }

    pub fn pending_message(&self) -> Option<&MessageNotification> {
        self.pending_message.as_ref()
    }

    pub fn notified_call_id(&self) -> Option<&str> {
        self.notified_call_id.as_deref()
    }

    pub fn last_notified_room(&self) -> Option<&str> {
        self.last_notified_room.as_deref()
    }
}

fn post_failure(posted: &PostedNotification, err: PlatformError) -> ControllerError {
    warn!(notification_id = %posted.id, error = %err, "failed to post notification");
    ControllerError::new(
        ControllerErrorCategory::Notification,
        "notification_post_failed",
        format!("{}: {err}", posted.id),
    )
}
