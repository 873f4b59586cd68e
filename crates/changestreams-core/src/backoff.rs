//! Exponential reconnect delay shared by the database listener and the
//! client router.

use std::time::Duration;

/// Jitter fraction applied to each delay (up to +10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Delay schedule `base → 2·base → … → max`, plus jitter.
///
/// Call [`Backoff::next_delay`] after each failure and [`Backoff::reset`]
/// once a connection has been established again.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            attempt: 0,
        }
    }

    /// Number of failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay + jitter(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempt = 0;
    }
}

/// Return a jitter offset in `0 .. JITTER_FRACTION * base`.
///
/// Derived from the sub-second clock rather than an RNG.
fn jitter(base: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter_ms = (base.as_millis() as f64 * JITTER_FRACTION) as u64;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(nanos as u64 % max_jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        let d1 = b.next_delay();
        let d2 = b.next_delay();
        let d3 = b.next_delay();
        let d4 = b.next_delay();
        assert!(d1 >= Duration::from_millis(100) && d1 < Duration::from_millis(110));
        assert!(d2 >= Duration::from_millis(200) && d2 < Duration::from_millis(220));
        assert!(d3 >= Duration::from_millis(400) && d3 < Duration::from_millis(440));
        assert!(d4 >= Duration::from_millis(400) && d4 < Duration::from_millis(440));
        assert_eq!(b.attempt(), 4);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut b = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert!(b.next_delay() < Duration::from_millis(60));
    }

    #[test]
    fn max_below_base_is_clamped() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_millis(10));
        assert!(b.next_delay() >= Duration::from_millis(500));
    }
}
