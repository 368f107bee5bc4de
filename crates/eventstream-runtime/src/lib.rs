//! Stream lifecycle controller.
//!
//! One actor task owns the lifecycle state and fans commands out to every
//! registered account session. Session messages come back over a channel
//! and feed the shared notification hub (unread counters plus the
//! notification coalescer).

/// Incoming-event to OS-notification coalescing.
pub mod coalescer;
/// Environment-backed controller configuration.
pub mod config;
/// Controller actor and its handle.
pub mod controller;
/// Bounded duplicate-ID window.
pub mod dedup;
/// Lock-shared unread and notification state.
pub mod notifications;
/// Per-account store readiness gate.
pub mod readiness;
/// Registered accounts and their attach generations.
pub mod registry;
/// Unread counters.
pub mod unread;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod test_support;

pub use coalescer::{
    CoalescerOptions, Decision, EventContext, FlushReport, NotificationCoalescer, Suppression,
};
pub use config::{ConfigError, ControllerConfig};
pub use controller::{ControllerHandle, spawn_controller};
pub use notifications::{NotificationHub, SharedNotificationHub};
pub use readiness::{GateOutcome, StoreReadinessGate};
pub use registry::{AccountHandle, AccountRegistry};
pub use unread::UnreadAccumulator;
