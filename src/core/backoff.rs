use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter between optimistic retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_millis(250),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Ceiling for retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn ceiling(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }

    /// Delay before retry `retry`, drawn uniformly from [ceiling/2, ceiling]
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling_ms = self.ceiling(retry).as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}
