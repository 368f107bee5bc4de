use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use eventstream_core::{NotificationChannel, PostedNotification};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("notification rejected: {0}")]
    NotificationRejected(String),
    #[error("platform service unavailable: {0}")]
    Unavailable(String),
}

/// OS signal that keeps the hosting process alive while streaming.
pub trait ForegroundPresence: Send + Sync {
    fn acquire(&self);

    fn release(&self);
}

/// Screen wake lock held while a notification is flushed.
pub trait WakeLock: Send + Sync {
    fn acquire(&self, tag: &str, timeout: Duration);

    fn release(&self, tag: &str);
}

/// OS notification shade.
pub trait NotificationSink: Send + Sync {
    fn post(&self, notification: &PostedNotification) -> Result<(), PlatformError>;

    fn cancel(&self, notification_id: &str);

    fn cancel_channel(&self, channel: NotificationChannel);
}

/// Launcher badge.
pub trait BadgeDisplay: Send + Sync {
    fn set_badge(&self, total: u64);
}

/// User-visible warnings (toasts).
pub trait UserWarnings: Send + Sync {
    fn store_corrupted(&self, account_id: &str);
}

/// Push delivery status for this install.
pub trait PushStatus: Send + Sync {
    /// `true` when push messages are the active wake mechanism.
    fn push_delivery_active(&self) -> bool;
}

/// Bundle of OS collaborators handed to the controller at composition time.
#[derive(Clone)]
pub struct PlatformServices {
    pub foreground: Arc<dyn ForegroundPresence>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub notifications: Arc<dyn NotificationSink>,
    pub badge: Arc<dyn BadgeDisplay>,
    pub warnings: Arc<dyn UserWarnings>,
    pub push: Arc<dyn PushStatus>,
}

impl PlatformServices {
    /// Route every collaborator to one in-memory platform.
    pub fn in_memory(platform: &InMemoryPlatform) -> Self {
        Self {
            foreground: Arc::new(platform.clone()),
            wake_lock: Arc::new(platform.clone()),
            notifications: Arc::new(platform.clone()),
            badge: Arc::new(platform.clone()),
            warnings: Arc::new(platform.clone()),
            push: Arc::new(platform.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct PlatformRecord {
    foreground_held: bool,
    foreground_acquisitions: u32,
    wake_locks_held: HashSet<String>,
    wake_lock_acquisitions: u32,
    shown: BTreeMap<String, PostedNotification>,
    post_log: Vec<PostedNotification>,
    cancel_log: Vec<String>,
    badge: u64,
    corrupted_accounts: Vec<String>,
    push_active: bool,
    fail_posts: bool,
}

/// Recording platform used by tests and the smoke binary.
#[derive(Clone, Default)]
pub struct InMemoryPlatform {
    record: Arc<RwLock<PlatformRecord>>,
}

impl InMemoryPlatform {
    pub fn with_push_active(push_active: bool) -> Self {
        let platform = Self::default();
        platform.set_push_active(push_active);
        platform
    }

    pub fn set_push_active(&self, active: bool) {
        self.write().push_active = active;
    }

    /// Make every following `post` fail until reset.
    pub fn set_fail_posts(&self, fail: bool) {
        self.write().fail_posts = fail;
    }

    pub fn foreground_held(&self) -> bool {
        self.read().foreground_held
    }

    pub fn foreground_acquisitions(&self) -> u32 {
        self.read().foreground_acquisitions
    }

    pub fn wake_lock_held(&self) -> bool {
        !self.read().wake_locks_held.is_empty()
    }

    pub fn wake_lock_acquisitions(&self) -> u32 {
        self.read().wake_lock_acquisitions
    }

    /// Notifications currently visible, ordered by ID.
    pub fn shown(&self) -> Vec<PostedNotification> {
        self.read().shown.values().cloned().collect()
    }

    pub fn is_shown(&self, notification_id: &str) -> bool {
        self.read().shown.contains_key(notification_id)
    }

    /// Every successful post, in order.
    pub fn post_log(&self) -> Vec<PostedNotification> {
        self.read().post_log.clone()
    }

    /// Every cancelled notification ID, in order.
    pub fn cancel_log(&self) -> Vec<String> {
        self.read().cancel_log.clone()
    }

    pub fn badge(&self) -> u64 {
        self.read().badge
    }

    pub fn corrupted_accounts(&self) -> Vec<String> {
        self.read().corrupted_accounts.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, PlatformRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PlatformRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ForegroundPresence for InMemoryPlatform {
    fn acquire(&self) {
        let mut record = self.write();
        record.foreground_held = true;
        record.foreground_acquisitions += 1;
    }

    fn release(&self) {
        self.write().foreground_held = false;
    }
}

impl WakeLock for InMemoryPlatform {
    fn acquire(&self, tag: &str, _timeout: Duration) {
        let mut record = self.write();
        record.wake_locks_held.insert(tag.to_owned());
        record.wake_lock_acquisitions += 1;
    }

    fn release(&self, tag: &str) {
        self.write().wake_locks_held.remove(tag);
    }
}

impl NotificationSink for InMemoryPlatform {
    fn post(&self, notification: &PostedNotification) -> Result<(), PlatformError> {
        let mut record = self.write();
        if record.fail_posts {
            return Err(PlatformError::NotificationRejected(format!(
                "post of '{}' refused",
                notification.id
            )));
        }
        record
            .shown
            .insert(notification.id.clone(), notification.clone());
        record.post_log.push(notification.clone());
        Ok(())
    }

    fn cancel(&self, notification_id: &str) {
        let mut record = self.write();
        if record.shown.remove(notification_id).is_some() {
            record.cancel_log.push(notification_id.to_owned());
        }
    }

    fn cancel_channel(&self, channel: NotificationChannel) {
        let mut record = self.write();
        let ids = record
            .shown
            .values()
            .filter(|posted| posted.channel == channel)
            .map(|posted| posted.id.clone())
            .collect::<Vec<_>>();
        for id in ids {
            record.shown.remove(&id);
            record.cancel_log.push(id);
        }
    }
}

impl BadgeDisplay for InMemoryPlatform {
    fn set_badge(&self, total: u64) {
        self.write().badge = total;
    }
}

impl UserWarnings for InMemoryPlatform {
    fn store_corrupted(&self, account_id: &str) {
        self.write().corrupted_accounts.push(account_id.to_owned());
    }
}

impl PushStatus for InMemoryPlatform {
    fn push_delivery_active(&self) -> bool {
        self.read().push_active
    }
}
