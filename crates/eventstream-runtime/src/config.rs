//! Environment-backed configuration for the stream controller.

use std::{env, error::Error, fmt, time::Duration};

use eventstream_core::{ControllerError, ControllerErrorCategory, ReissuePolicy};

use crate::coalescer::CoalescerOptions;

const DEFAULT_WAKE_SCREEN_MS: u64 = 3_000;
const DEFAULT_CATCHUP_REISSUE_DELAY_MS: u64 = 1_000;
const DEFAULT_CATCHUP_REISSUE_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_MAX_CATCHUP_REISSUES: u32 = 30;
const DEFAULT_DEDUP_WINDOW: usize = 256;
const DEFAULT_COMMAND_BUFFER: usize = 64;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration for the stream controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Whether incoming calls get their own notification.
    pub supports_calls: bool,
    /// Tag message notifications with the account when several are registered.
    pub show_multi_account_label: bool,
    /// How long the screen may stay lit while a notification is flushed.
    pub wake_screen_ms: u64,
    /// First delay before catch-up is re-issued for an active call.
    pub catchup_reissue_delay_ms: u64,
    /// Cap on the re-issue backoff.
    pub catchup_reissue_max_delay_ms: u64,
    /// Consecutive re-issues allowed after one external `Catchup`.
    pub max_catchup_reissues: u32,
    /// Recently seen event IDs kept for duplicate suppression.
    pub dedup_window: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            supports_calls: true,
            show_multi_account_label: true,
            wake_screen_ms: DEFAULT_WAKE_SCREEN_MS,
            catchup_reissue_delay_ms: DEFAULT_CATCHUP_REISSUE_DELAY_MS,
            catchup_reissue_max_delay_ms: DEFAULT_CATCHUP_REISSUE_MAX_DELAY_MS,
            max_catchup_reissues: DEFAULT_MAX_CATCHUP_REISSUES,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ControllerConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration through `lookup`, which maps a key to its raw value.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let supports_calls = parse_bool("EVENTSTREAM_SUPPORTS_CALLS", true, &mut lookup)?;
        let show_multi_account_label =
            parse_bool("EVENTSTREAM_SHOW_MULTI_ACCOUNT_LABEL", true, &mut lookup)?;
        let wake_screen_ms =
            parse_u64("EVENTSTREAM_WAKE_SCREEN_MS", DEFAULT_WAKE_SCREEN_MS, &mut lookup)?;
        let catchup_reissue_delay_ms = parse_u64(
            "EVENTSTREAM_CATCHUP_REISSUE_DELAY_MS",
            DEFAULT_CATCHUP_REISSUE_DELAY_MS,
            &mut lookup,
        )?;
        let catchup_reissue_max_delay_ms = parse_u64(
            "EVENTSTREAM_CATCHUP_REISSUE_MAX_DELAY_MS",
            DEFAULT_CATCHUP_REISSUE_MAX_DELAY_MS,
            &mut lookup,
        )?;
        let max_catchup_reissues = parse_u32(
            "EVENTSTREAM_MAX_CATCHUP_REISSUES",
            DEFAULT_MAX_CATCHUP_REISSUES,
            &mut lookup,
        )?;
        let dedup_window = parse_nonzero_usize(
            "EVENTSTREAM_DEDUP_WINDOW",
            DEFAULT_DEDUP_WINDOW,
            &mut lookup,
        )?;
        let command_buffer = parse_nonzero_usize(
            "EVENTSTREAM_COMMAND_BUFFER",
            DEFAULT_COMMAND_BUFFER,
            &mut lookup,
        )?;
        let event_buffer =
            parse_nonzero_usize("EVENTSTREAM_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if catchup_reissue_max_delay_ms < catchup_reissue_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "EVENTSTREAM_CATCHUP_REISSUE_MAX_DELAY_MS",
                value: catchup_reissue_max_delay_ms.to_string(),
                reason: format!("must be at least the base delay ({catchup_reissue_delay_ms})"),
            });
        }

        Ok(Self {
            supports_calls,
            show_multi_account_label,
            wake_screen_ms,
            catchup_reissue_delay_ms,
            catchup_reissue_max_delay_ms,
            max_catchup_reissues,
            dedup_window,
            command_buffer,
            event_buffer,
        })
    }

    pub fn reissue_policy(&self) -> ReissuePolicy {
        ReissuePolicy::new(
            self.catchup_reissue_delay_ms,
            self.catchup_reissue_max_delay_ms,
            self.max_catchup_reissues,
        )
    }

    pub fn wake_screen_duration(&self) -> Duration {
        Duration::from_millis(self.wake_screen_ms)
    }

    pub fn coalescer_options(&self) -> CoalescerOptions {
        CoalescerOptions {
            supports_calls: self.supports_calls,
            show_multi_account_label: self.show_multi_account_label,
            wake_screen: self.wake_screen_duration(),
            dedup_window: self.dedup_window,
        }
    }
}

/// Errors produced while parsing controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        Self::new(ControllerErrorCategory::Config, "invalid_config", err.to_string())
    }
}

fn trimmed<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_bool<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = trimmed(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected one of 1/0/true/false/yes/no/on/off".to_owned(),
        }),
    }
}

fn parse_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = trimmed(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_u32<F>(key: &'static str, default: u32, lookup: &mut F) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = trimmed(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_nonzero_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = trimmed(key, lookup) else {
        return Ok(default);
    };
    match value.parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}
