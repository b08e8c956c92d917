//! Exponential backoff with full jitter.
//!
//! Used to space out retries against the upstream presence query. The
//! deterministic ceiling grows geometrically from
//! [`BackoffConfig::initial_delay`] up to [`BackoffConfig::max_delay`]; the
//! actual wait is drawn uniformly from `[0, ceiling]`.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Ceiling for the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any ceiling.
    pub max_delay: Duration,
    /// Factor by which the ceiling grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff ceiling from the current one.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Ceiling for the given 1-based failure count.
pub fn ceiling(failures: u32, config: &BackoffConfig) -> Duration {
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..failures {
        if delay >= config.max_delay {
            break;
        }
        delay = next_delay(delay, config);
    }
    delay
}

/// Draw a uniformly random delay in `[0, ceiling]`.
pub fn full_jitter(ceiling: Duration) -> Duration {
    let max_ms = ceiling.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Jittered delay to wait after `failures` consecutive failures.
pub fn retry_delay(failures: u32, config: &BackoffConfig) -> Duration {
    full_jitter(ceiling(failures, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = BackoffConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn ceiling_sequence_caps_at_sixty_seconds() {
        let config = BackoffConfig::default();
        let expected = [1, 2, 4, 8, 16, 32, 60, 60];

        for (i, &secs) in expected.iter().enumerate() {
            assert_eq!(ceiling(i as u32 + 1, &config), Duration::from_secs(secs));
        }
    }

    #[test]
    fn jitter_stays_within_ceiling() {
        let ceiling = Duration::from_millis(500);
        for _ in 0..200 {
            assert!(full_jitter(ceiling) <= ceiling);
        }
        assert_eq!(full_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let config = BackoffConfig::default();
        assert_eq!(ceiling(10_000, &config), Duration::from_secs(60));
    }
}
