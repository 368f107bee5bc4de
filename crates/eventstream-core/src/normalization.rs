use crate::types::{RoomEvent, RoomEventKind, RoomSnapshot};

/// Call-signaling role of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSignal {
    /// Incoming call offer.
    Invite,
    /// Call answered (possibly by another device of the same user).
    Answer,
    /// Call ended.
    Hangup,
    /// Any other call signaling.
    Other,
}

/// Classify `event` as call signaling; `None` for non-call events.
pub fn call_signal(event: &RoomEvent) -> Option<CallSignal> {
    match event.kind {
        RoomEventKind::CallInvite => Some(CallSignal::Invite),
        RoomEventKind::CallAnswer => Some(CallSignal::Answer),
        RoomEventKind::CallHangup => Some(CallSignal::Hangup),
        RoomEventKind::CallSignal => Some(CallSignal::Other),
        _ => None,
    }
}

/// Trimmed body text when the event has a non-empty one.
pub fn displayable_body(event: &RoomEvent) -> Option<&str> {
    event
        .body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
}

/// Best-effort sender name.
pub fn sender_label(event: &RoomEvent) -> String {
    event
        .sender_display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&event.sender_id)
        .to_owned()
}

/// Best-effort room name; direct chats fall back to the sender.
pub fn room_label(room: &RoomSnapshot, event: &RoomEvent) -> String {
    if let Some(name) = room
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return name.to_owned();
    }
    if room.is_direct {
        return sender_label(event);
    }
    event.room_id.clone()
}

/// Notification body for an accepted event.
///
/// Membership events rarely carry a body, so one is synthesized.
pub fn notification_body(event: &RoomEvent) -> Option<String> {
    if let Some(body) = displayable_body(event) {
        return Some(body.to_owned());
    }
    match event.kind {
        RoomEventKind::Membership => Some(format!("{} updated their membership", sender_label(event))),
        _ => None,
    }
}
