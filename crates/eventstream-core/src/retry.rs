use std::time::Duration;

/// Backoff and cap for re-issuing catch-up while a call stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReissuePolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl ReissuePolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            max_attempts,
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before re-issue number `attempt` (0-based), or `None` once the
    /// cap is reached.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let shift = attempt.min(20);
        let multiplier = 1_u64 << shift;
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        Some(Duration::from_millis(calculated.min(self.max_delay_ms)))
    }
}

impl Default for ReissuePolicy {
    fn default() -> Self {
        Self::new(1_000, 10_000, 30)
    }
}
