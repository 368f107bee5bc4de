use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eventstream_core::{NotificationRule, RoomEvent, RoomSnapshot};
use eventstream_platform::{BadgeDisplay, PlatformServices};

use crate::{
    coalescer::{CoalescerOptions, Decision, EventContext, FlushReport, NotificationCoalescer},
    unread::UnreadAccumulator,
};

/// Hub shared between the controller task and handle queries.
pub type SharedNotificationHub = Arc<Mutex<NotificationHub>>;

/// Lock the hub, recovering the guard if a holder panicked.
pub fn lock_hub(hub: &SharedNotificationHub) -> MutexGuard<'_, NotificationHub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unread counters and the pending-notification state of every account,
/// kept behind one lock because a notification mixes both.
pub struct NotificationHub {
    unread: UnreadAccumulator,
    coalescer: NotificationCoalescer,
    badge: Arc<dyn BadgeDisplay>,
}

impl NotificationHub {
    pub fn new(options: CoalescerOptions, platform: &PlatformServices) -> Self {
        Self {
            unread: UnreadAccumulator::default(),
            coalescer: NotificationCoalescer::new(
                options,
                Arc::clone(&platform.notifications),
                Arc::clone(&platform.wake_lock),
            ),
            badge: Arc::clone(&platform.badge),
        }
    }

    pub fn shared(self) -> SharedNotificationHub {
        Arc::new(Mutex::new(self))
    }

    pub fn on_notify_worthy_event(
        &mut self,
        ctx: EventContext<'_>,
        event: &RoomEvent,
        room: &RoomSnapshot,
        rule: &NotificationRule,
    ) -> Decision {
        self.coalescer
            .on_notify_worthy_event(ctx, event, room, rule, &mut self.unread)
    }

    /// Flush the batch; a posted message also publishes the unread total.
    pub fn flush(&mut self) -> FlushReport {
        let report = self.coalescer.flush();
        if report.posted_message() {
            self.badge.set_badge(self.unread.total());
        }
        report
    }

    pub fn reset_unread(&mut self) {
        self.unread.reset(self.badge.as_ref());
    }

    /// Dismiss message notifications and, when anything matched, reset the
    /// unread counters.
    pub fn dismiss(&mut self, room_id: Option<&str>) -> bool {
        if !self.coalescer.dismiss(room_id) {
            return false;
        }
        self.reset_unread();
        true
    }

    pub fn on_hangup(&mut self, call_id: &str) -> bool {
        self.coalescer.on_hangup(call_id)
    }

    pub fn on_answer_elsewhere(&mut self, call_id: &str) -> bool {
        self.coalescer.on_answer_elsewhere(call_id)
    }

    pub fn is_call_notification_active(&self, call_id: &str) -> bool {
        self.coalescer.is_call_notification_active(call_id)
    }

    pub fn unread_total(&self) -> u64 {
        self.unread.total()
    }

    /// Forget pending notifications and unread counts after `Stop`.
    pub fn clear(&mut self) {
        self.coalescer.clear_pending();
        self.reset_unread();
    }

    pub fn unread(&self) -> &UnreadAccumulator {
        &self.unread
    }

    pub fn coalescer(&self) -> &NotificationCoalescer {
        &self.coalescer
    }
}
