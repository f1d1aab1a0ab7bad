//! Sliding one-second dispatch window used for rate limiting.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Timestamps of dispatches within the last second.
#[derive(Debug, Default)]
pub struct RateWindow {
    samples: VecDeque<Instant>,
}

impl RateWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(*front) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether another dispatch now would stay within `max` per second.
    pub fn would_allow(&mut self, max: u32, now: Instant) -> bool {
        self.prune(now);
        (self.samples.len() as u32) < max
    }

    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.samples.push_back(now);
    }

    /// Dispatches observed in the trailing window.
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blocks_at_limit_and_recovers() {
        let mut window = RateWindow::new();
        let now = Instant::now();
        for _ in 0..3 {
            assert!(window.would_allow(3, now));
            window.record(now);
        }
        assert!(!window.would_allow(3, now));

        tokio::time::advance(Duration::from_millis(1100)).await;
        let later = Instant::now();
        assert!(window.would_allow(3, later));
        assert_eq!(window.rate(later), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_counts_trailing_second_only() {
        let mut window = RateWindow::new();
        window.record(Instant::now());
        tokio::time::advance(Duration::from_millis(600)).await;
        window.record(Instant::now());
        assert_eq!(window.rate(Instant::now()), 2.0);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(window.rate(Instant::now()), 1.0);
    }
}
