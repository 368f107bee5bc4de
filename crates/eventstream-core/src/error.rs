use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ControllerEvent, ControllerState};

/// Broad error category used for logging and caller-side handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerErrorCategory {
    /// Command issued from a state that does not permit it.
    InvalidTransition,
    /// Command lacks something it needs (accounts, a live session).
    MissingPrerequisite,
    /// Persistent store failed to open.
    StoreCorruption,
    /// Building or posting a notification failed.
    Notification,
    /// An account session rejected a stream operation.
    Session,
    /// Invalid configuration value.
    Config,
}

/// Stable controller error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ControllerError {
    /// High-level error category.
    pub category: ControllerErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ControllerError {
    /// Construct a new controller error.
    pub fn new(
        category: ControllerErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ControllerState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ControllerErrorCategory::InvalidTransition,
            "invalid_state_transition",
            format!("cannot run '{action}' while controller is in state {current:?}"),
        )
    }

    /// Build a missing-prerequisite error; the command becomes a no-op.
    pub fn missing_prerequisite(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ControllerErrorCategory::MissingPrerequisite, code, message)
    }

    /// Build a session-level failure for one account.
    pub fn session(account_id: &str, operation: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ControllerErrorCategory::Session,
            "session_operation_failed",
            format!("{operation} failed for account {account_id}: {reason}"),
        )
    }

    /// Build the warning raised when an account's store failed to open.
    pub fn store_corrupted(account_id: &str) -> Self {
        Self::new(
            ControllerErrorCategory::StoreCorruption,
            "store_corrupted",
            format!("store for account {account_id} is corrupted; running degraded"),
        )
    }

    /// Convert the error into the event broadcast for rejected commands.
    pub fn into_rejection(self) -> ControllerEvent {
        ControllerEvent::CommandRejected {
            code: self.code,
            message: self.message,
        }
    }
}
