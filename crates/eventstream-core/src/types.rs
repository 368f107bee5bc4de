use serde::{Deserialize, Serialize};

/// Process-wide lifecycle state of the stream controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ControllerState {
    /// No command has been applied yet.
    #[default]
    Unknown,
    /// Streams are stopped and every listener is detached.
    Stopped,
    /// Every registered account streams live events.
    Started,
    /// Connections stay warm but live delivery is paused.
    Paused,
    /// Accounts run bounded one-shot syncs instead of a continuous stream.
    Catchup,
}

/// Per-account readiness of the persistent store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StoreReadiness {
    /// Cached state is still loading.
    Loading,
    /// Cached state is loaded and safe to stream from.
    Ready,
    /// The store failed to open; startup continues with a degraded store.
    Corrupted,
}

impl StoreReadiness {
    /// Whether this readiness unblocks stream startup.
    pub fn unblocks_startup(self) -> bool {
        matches!(self, Self::Ready | Self::Corrupted)
    }
}

/// Lifecycle command accepted by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamCommand {
    /// Start streaming, or resume from a paused/catch-up state.
    Start {
        /// Accounts to register; required only on first start.
        account_ids: Option<Vec<String>>,
    },
    /// Same semantics as `Start`.
    Resume {
        /// Accounts to register; required only on first start.
        account_ids: Option<Vec<String>>,
    },
    /// Stop every stream, detach listeners and clear the registry.
    Stop,
    /// Pause live delivery on every stream.
    Pause,
    /// Run one bounded catch-up sync per account.
    Catchup,
    /// Re-evaluate whether a foreground presence must be held.
    PushStatusUpdate,
    /// Register one more account while the controller is running.
    AddAccount {
        /// Account (user) identifier.
        account_id: String,
    },
    /// Stop and forget one account while the controller is running.
    RemoveAccount {
        /// Account (user) identifier.
        account_id: String,
    },
}

impl StreamCommand {
    /// Stable command name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Resume { .. } => "resume",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Catchup => "catchup",
            Self::PushStatusUpdate => "push_status_update",
            Self::AddAccount { .. } => "add_account",
            Self::RemoveAccount { .. } => "remove_account",
        }
    }
}

/// Room currently open in the foreground UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ViewedRoom {
    /// Account the room belongs to.
    pub account_id: String,
    /// Matrix-style room identifier.
    pub room_id: String,
}

/// Latest UI visibility reported by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UiPresence {
    /// `true` while any controller-owning UI is visible.
    pub in_foreground: bool,
    /// Room currently open, if any.
    pub viewed_room: Option<ViewedRoom>,
}

impl UiPresence {
    /// App is in the background with nothing on screen.
    pub fn background() -> Self {
        Self::default()
    }

    /// App is visible and showing the given room.
    pub fn viewing(account_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            in_foreground: true,
            viewed_room: Some(ViewedRoom {
                account_id: account_id.into(),
                room_id: room_id.into(),
            }),
        }
    }

    /// Whether `room_id` of `account_id` is open on screen right now.
    pub fn is_viewing(&self, account_id: &str, room_id: &str) -> bool {
        self.in_foreground
            && self
                .viewed_room
                .as_ref()
                .is_some_and(|viewed| viewed.account_id == account_id && viewed.room_id == room_id)
    }
}

/// Coarse event classification relevant to notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomEventKind {
    /// Regular room message.
    Message,
    /// Membership change (invite, join, leave).
    Membership,
    /// Incoming call offer.
    CallInvite,
    /// Call answered.
    CallAnswer,
    /// Call ended.
    CallHangup,
    /// Other call signaling (ICE candidates and similar).
    CallSignal,
    /// Any other event type, carrying its wire type.
    Other(String),
}

/// Room event delivered by an account session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEvent {
    /// Event ID.
    pub event_id: String,
    /// Room the event belongs to.
    pub room_id: String,
    /// Sender user ID.
    pub sender_id: String,
    /// Sender display name when known.
    pub sender_display_name: Option<String>,
    /// Event classification.
    pub kind: RoomEventKind,
    /// Display-ready body when the event has one.
    pub body: Option<String>,
    /// Call ID for call-signaling events.
    pub call_id: Option<String>,
    /// `true` when a call invite offers video.
    pub is_video_call: bool,
    /// Origin timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Snapshot of room state accompanying an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoomSnapshot {
    /// Room ID.
    pub room_id: String,
    /// Best-effort display name.
    pub display_name: Option<String>,
    /// Whether the room is a direct chat.
    pub is_direct: bool,
}

/// Notification rule matched by an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRule {
    /// Rule identifier, for example `.m.rule.message`.
    pub rule_id: String,
    /// Whether the rule asks for a notification at all.
    pub notify: bool,
    /// Sound to play, when the rule is audible.
    pub sound: Option<String>,
    /// Whether the rule marks the event as a highlight.
    pub highlight: bool,
}

impl NotificationRule {
    /// Whether a notification produced by this rule should be loud.
    pub fn is_loud(&self) -> bool {
        self.sound.is_some() || self.highlight
    }
}

/// Typed message emitted by an account session toward the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Live timeline event.
    LiveEvent {
        /// The event.
        event: RoomEvent,
        /// Room state at the event.
        room: RoomSnapshot,
    },
    /// Event matching a notification rule.
    NotifyWorthyEvent {
        /// The event.
        event: RoomEvent,
        /// Room state at the event.
        room: RoomSnapshot,
        /// Matched rule.
        rule: NotificationRule,
    },
    /// One delivery batch (sync response or catch-up pass) finished.
    BatchComplete,
    /// Store finished loading or failed to open.
    StoreReadiness(StoreReadiness),
}

/// Session message envelope tagged with the attach cycle it was produced in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMessage {
    /// Originating account.
    pub account_id: String,
    /// Attach cycle of the sink that produced the message.
    pub generation: u64,
    /// Payload.
    pub kind: SessionEventKind,
}

/// Notification channel; message churn never cancels the call channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    /// Coalesced message notifications.
    Message,
    /// Incoming-call notifications keyed by call ID.
    Call,
}

/// Coalesced message notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageNotification {
    /// Account that received the event.
    pub account_id: String,
    /// Room the latest event belongs to.
    pub room_id: String,
    /// Room display name.
    pub room_display_name: String,
    /// Sender display name.
    pub sender_display_name: String,
    /// Body text.
    pub body: String,
    /// Cross-account unread total at the time of the latest event.
    pub total_unread: u64,
    /// Unread count from this sender in this room.
    pub sender_unread: u64,
    /// Whether the notification should play a sound.
    pub loud: bool,
    /// Set when more than one account is registered.
    pub multi_account: bool,
}

impl MessageNotification {
    /// First unread message from this sender in this room.
    pub fn is_first_from_sender(&self) -> bool {
        self.sender_unread == 1
    }

    /// Title line, qualified with the account when several are registered.
    pub fn title(&self) -> String {
        if self.multi_account {
            format!("{} ({})", self.room_display_name, self.account_id)
        } else {
            self.room_display_name.clone()
        }
    }
}

/// Incoming-call notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallNotification {
    /// Call ID.
    pub call_id: String,
    /// Account receiving the call.
    pub account_id: String,
    /// Room the call happens in.
    pub room_id: String,
    /// Room display name.
    pub room_display_name: String,
    /// Caller display name.
    pub caller_display_name: String,
    /// Video rather than voice call.
    pub is_video: bool,
}

/// Notification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationContent {
    /// Message channel payload.
    Message(MessageNotification),
    /// Call channel payload.
    Call(CallNotification),
}

/// Fully built notification ready for the OS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostedNotification {
    /// Stable OS notification ID.
    pub id: String,
    /// Channel the notification is posted on.
    pub channel: NotificationChannel,
    /// Room tag used for room-scoped dismissal.
    pub room_id: String,
    /// Payload.
    pub content: NotificationContent,
}

/// Notification ID used for the single coalesced message notification.
pub const MESSAGE_NOTIFICATION_ID: &str = "message";

/// Notification ID of the incoming-call notification for `call_id`.
pub fn call_notification_id(call_id: &str) -> String {
    format!("call:{call_id}")
}

impl PostedNotification {
    /// Wrap a message notification.
    pub fn message(notification: MessageNotification) -> Self {
        Self {
            id: MESSAGE_NOTIFICATION_ID.to_owned(),
            channel: NotificationChannel::Message,
            room_id: notification.room_id.clone(),
            content: NotificationContent::Message(notification),
        }
    }

    /// Wrap a call notification.
    pub fn call(notification: CallNotification) -> Self {
        Self {
            id: call_notification_id(&notification.call_id),
            channel: NotificationChannel::Call,
            room_id: notification.room_id.clone(),
            content: NotificationContent::Call(notification),
        }
    }
}

/// Event broadcast by the controller to its observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Lifecycle transition.
    StateChanged {
        /// New state.
        state: ControllerState,
    },
    /// A command was ignored.
    CommandRejected {
        /// Stable error code.
        code: String,
        /// Human-readable reason.
        message: String,
    },
    /// Foreground presence acquired or released.
    ForegroundPresenceChanged {
        /// `true` while the presence is held.
        held: bool,
    },
    /// An account store reported corruption; startup continued.
    StoreCorrupted {
        /// Affected account.
        account_id: String,
    },
    /// A notification reached the OS.
    NotificationPosted {
        /// OS notification ID.
        notification_id: String,
        /// Channel it was posted on.
        channel: NotificationChannel,
    },
    /// Posting failed; the failure stayed local.
    NotificationFlushFailed {
        /// Stable error code.
        code: String,
        /// Human-readable reason.
        message: String,
    },
    /// An incoming-call notification was dismissed.
    CallNotificationDismissed {
        /// Call ID.
        call_id: String,
    },
    /// Message notifications were dismissed.
    NotificationsDismissed {
        /// Room filter used, `None` for all.
        room_id: Option<String>,
    },
    /// Unread badge total changed.
    BadgeUpdated {
        /// New total.
        total: u64,
    },
}
