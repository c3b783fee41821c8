//! Exponential backoff and bounded jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff delay for a zero-indexed attempt: `base * 2^attempt`.
#[must_use]
pub fn exponential_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// Apply bounded jitter to a duration: a uniform factor in `[1 - frac, 1 + frac]`.
///
/// Used for rate-limit backoff windows (±20%) and the appcast check interval
/// (±10%) so that pooled accounts and multiple gateway instances do not
/// thunder in lockstep.
#[must_use]
pub fn jitter(duration: Duration, frac: f64) -> Duration {
    let factor = rand::rng().random_range((1.0 - frac)..=(1.0 + frac));
    duration.mul_f64(factor.max(0.0))
}

/// Delays for a bounded retry loop: `max_retries` delays starting at `base`,
/// doubling each time.
#[must_use]
pub fn backoff_delays(base: Duration, max_retries: u32) -> Vec<Duration> {
    (0..max_retries).map(|i| exponential_delay(base, i)).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double() {
        let delays = backoff_delays(Duration::from_secs(1), 3);
        assert_eq!(delays, vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let base = Duration::from_secs(100);
        for _ in 0..100 {
            let d = jitter(base, 0.2);
            assert!(d >= Duration::from_secs(80), "{d:?}");
            assert!(d <= Duration::from_secs(120), "{d:?}");
        }
    }

    #[test]
    fn exponential_delay_saturates() {
        // Huge attempt numbers must not overflow.
        let d = exponential_delay(Duration::from_secs(1), 1000);
        assert!(d >= Duration::from_secs(1));
    }
}
