//! Capped exponential backoff for signaling reconnects

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{AvatarConfig, SignalingConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay_ms: u64,
    cap_delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, cap_delay_ms: u64) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay_ms,
            cap_delay_ms,
        }
    }

    pub fn from_config(config: &SignalingConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay_ms, config.cap_delay_ms)
    }

    /// `min(base * 2^n, cap)`, saturating instead of overflowing
    pub fn delay(&self, n: u32) -> Duration {
        let ms = 2u64
            .checked_pow(n)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(self.cap_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay before the next attempt, consuming it; `None` once exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&AvatarConfig::default().signaling)
    }
}
