use std::time::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Delay policy between upload attempts
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `initial * multiplier^attempt`, capped at `max_delay`
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
    /// `initial + increment * attempt`, capped at `max_delay`
    Linear {
        initial_ms: u64,
        increment_ms: u64,
        max_delay_ms: u64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Fixed { delay_ms: DEFAULT_RETRY_DELAY_MS }
    }
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (0 for the first retry)
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            RetryStrategy::Exponential { initial_ms, multiplier, max_delay_ms } => {
                let delay = *initial_ms as f64 * multiplier.powf(attempt as f64);
                let delay = delay.min(*max_delay_ms as f64).max(0.0);
                Duration::from_millis(delay as u64)
            }
            RetryStrategy::Linear { initial_ms, increment_ms, max_delay_ms } => {
                let delay = initial_ms.saturating_add(increment_ms.saturating_mul(attempt as u64));
                Duration::from_millis(delay.min(*max_delay_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(5), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let strategy = RetryStrategy::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1000,
        };
        assert_eq!(strategy.get_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.get_delay(2), Duration::from_millis(400));
        assert_eq!(strategy.get_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_linear_delay_is_capped() {
        let strategy = RetryStrategy::Linear {
            initial_ms: 500,
            increment_ms: 250,
            max_delay_ms: 1000,
        };
        assert_eq!(strategy.get_delay(1), Duration::from_millis(750));
        assert_eq!(strategy.get_delay(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let strategy: RetryStrategy = toml::from_str("kind = \"fixed\"\ndelay_ms = 250").unwrap();
        assert_eq!(strategy, RetryStrategy::Fixed { delay_ms: 250 });
    }
}
