use std::time::Duration;

/// Capped exponential delay between ticks after consecutive failures.
///
/// ```text
/// failures   delay (base = 5s, max = 60s)
///     0        5s
///     1        5s
///     2       10s
///     3       20s
///     4       40s
///    >=5      60s
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
