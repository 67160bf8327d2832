//! Randomized delays with jitter and exponential error backoff
//!
//! The poll loops refresh third-party pages on a human-ish rhythm: every
//! delay is drawn uniformly from a configured window rather than fixed.

use std::time::Duration;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Polling delay window for a bot loop
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pacing {
    /// Minimum delay between refreshes in milliseconds
    pub min_delay_ms: u64,
    /// Maximum delay between refreshes in milliseconds
    pub max_delay_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 4000,
        }
    }
}

impl Pacing {
    /// Draw one delay from the window
    pub fn pick(&self) -> Duration {
        let min = self.min_delay_ms;
        let max = self.max_delay_ms.max(min);
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        Duration::from_millis(ms)
    }

    /// Sleep for one drawn delay
    pub async fn wait(&self) {
        let delay = self.pick();
        debug!("Pacing wait {}ms", delay.as_millis());
        sleep(delay).await;
    }
}

/// Sleep for a random duration in `[min_ms, max_ms]`.
///
/// The short inter-action pauses every bot variant sprinkles between DOM
/// probes and clicks.
pub async fn random_delay(min_ms: u64, max_ms: u64) {
    let max_ms = max_ms.max(min_ms);
    let ms = if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    sleep(Duration::from_millis(ms)).await;
}

/// Calculate delay with exponential backoff and jitter
pub fn backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let base_delay = base_ms * 2u64.pow(attempt.saturating_sub(1).min(5));
    let capped_delay = base_delay.min(max_ms);

    // +-20% jitter
    let jitter_range = capped_delay / 5;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
    } else {
        0
    };

    Duration::from_millis((capped_delay as i64 + jitter).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_stays_in_window() {
        let pacing = Pacing { min_delay_ms: 500, max_delay_ms: 4000 };
        for _ in 0..100 {
            let d = pacing.pick().as_millis() as u64;
            assert!((500..=4000).contains(&d));
        }
    }

    #[test]
    fn degenerate_window_is_fixed() {
        let pacing = Pacing { min_delay_ms: 1000, max_delay_ms: 1000 };
        assert_eq!(pacing.pick().as_millis(), 1000);

        // max below min collapses to min instead of panicking
        let inverted = Pacing { min_delay_ms: 2000, max_delay_ms: 100 };
        assert_eq!(inverted.pick().as_millis(), 2000);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let delay1 = backoff_with_jitter(1, 100, 10000);
        let delay2 = backoff_with_jitter(2, 100, 10000);
        let delay3 = backoff_with_jitter(3, 100, 10000);

        // Each subsequent delay should be roughly double (with jitter)
        assert!(delay2.as_millis() > delay1.as_millis() / 2);
        assert!(delay3.as_millis() > delay2.as_millis() / 2);
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in 1..20 {
            let d = backoff_with_jitter(attempt, 1000, 30_000);
            // cap plus 20% jitter headroom
            assert!(d.as_millis() as u64 <= 36_000);
        }
    }
}
