//! Core contract shared by the stream controller and the sessions it drives.
//!
//! This crate defines the command/event protocol, the controller lifecycle
//! model, the catch-up re-issue policy, event classification helpers, the
//! session/store traits and the common error/channel abstractions.

/// Async command/session/event channel primitives.
pub mod channel;
/// Stable controller error types.
pub mod error;
/// Event classification and notification text helpers.
pub mod normalization;
/// Backoff and cap for catch-up re-issue.
pub mod retry;
/// Traits implemented by the external session layer.
pub mod session;
/// Controller lifecycle state machine.
pub mod state_machine;
/// Protocol types (commands, events, session messages, notifications).
pub mod types;

pub use channel::{
    ControllerChannelError, ControllerChannels, ControllerPublisher, ControllerReceivers,
    EventStream,
};
pub use error::{ControllerError, ControllerErrorCategory};
pub use normalization::{CallSignal, call_signal, notification_body, room_label, sender_label};
pub use retry::ReissuePolicy;
pub use session::{AccountSession, SessionDirectory, SessionEventSink, SessionStore};
pub use state_machine::{StreamStateMachine, Transition, TransitionPlan};
pub use types::{
    CallNotification, ControllerEvent, ControllerState, MESSAGE_NOTIFICATION_ID,
    MessageNotification, NotificationChannel, NotificationContent, NotificationRule,
    PostedNotification, RoomEvent, RoomEventKind, RoomSnapshot, SessionEventKind, SessionMessage,
    StoreReadiness, StreamCommand, UiPresence, ViewedRoom, call_notification_id,
};
