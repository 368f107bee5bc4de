use std::collections::HashMap;

use eventstream_platform::BadgeDisplay;

/// Per-room, per-sender unread counters plus the cross-account total.
///
/// Counters only grow until `reset`.
#[derive(Debug, Default, Clone)]
pub struct UnreadAccumulator {
    total: u64,
    per_room: HashMap<String, HashMap<String, u64>>,
}

impl UnreadAccumulator {
    /// Count one notify-worthy event and return the sender's new count in
    /// that room.
    pub fn on_backgrounded_bing_event(&mut self, room_id: &str, sender_id: &str) -> u64 {
        self.total = self.total.saturating_add(1);
        let count = self
            .per_room
            .entry(room_id.to_owned())
            .or_default()
            .entry(sender_id.to_owned())
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Zero everything and publish the new total to the badge.
    pub fn reset(&mut self, badge: &dyn BadgeDisplay) {
        self.total = 0;
        self.per_room.clear();
        badge.set_badge(0);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn sender_count(&self, room_id: &str, sender_id: &str) -> u64 {
        self.per_room
            .get(room_id)
            .and_then(|senders| senders.get(sender_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn room_count(&self, room_id: &str) -> u64 {
        self.per_room
            .get(room_id)
            .map(|senders| senders.values().sum())
            .unwrap_or(0)
    }

    pub fn tracked_rooms(&self) -> usize {
        self.per_room.len()
    }
}
