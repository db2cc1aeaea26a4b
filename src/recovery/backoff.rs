use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff applied before each retry-strategy invocation:
/// `delay(0) = 0` and `delay(n) = min(initial * base^(n-1), max)` for n >= 1.
/// Monotonically non-decreasing in n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub base: u32,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            base: 2,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let ms = match (self.base as u64).checked_pow(attempt - 1) {
            Some(factor) => self.initial_delay_ms.saturating_mul(factor),
            None => self.max_delay_ms,
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}
