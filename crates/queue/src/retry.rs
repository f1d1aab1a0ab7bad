use std::time::Duration;

/// Delay before the `retry_count`-th retry:
/// `base * multiplier^(retry_count - 1)`.
///
/// The first retry waits `base`; the series is bounded only by the queue's
/// `max_retries` count, not by a delay cap.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn backoff_delay(base: Duration, multiplier: f64, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
    base.mul_f64(multiplier.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_waits_base() {
        let d = backoff_delay(Duration::from_millis(100), 2.0, 1);
        assert_eq!(d, Duration::from_millis(100));
    }

    #[test]
    fn delays_strictly_increase() {
        let base = Duration::from_millis(100);
        let delays: Vec<Duration> = (1..=5).map(|n| backoff_delay(base, 2.0, n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(delays[4], Duration::from_millis(1600));
    }

    #[test]
    fn multiplier_one_is_constant() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1.0, 1), base);
        assert_eq!(backoff_delay(base, 1.0, 7), base);
    }
}
