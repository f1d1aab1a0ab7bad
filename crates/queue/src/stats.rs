//! Lifetime counters and a bounded window of processing durations.

use std::collections::VecDeque;

use pulsebridge_core::QueueStats;

#[derive(Debug)]
pub struct StatsWindow {
    total_success: u64,
    total_failed: u64,
    total_retries: u64,
    samples: VecDeque<f64>,
    window: usize,
}

impl StatsWindow {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            total_success: 0,
            total_failed: 0,
            total_retries: 0,
            samples: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn record_success(&mut self, elapsed_ms: f64) {
        self.total_success += 1;
        self.push_sample(elapsed_ms);
    }

    pub fn record_failure(&mut self, elapsed_ms: f64) {
        self.total_failed += 1;
        self.push_sample(elapsed_ms);
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
    }

    fn push_sample(&mut self, elapsed_ms: f64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed_ms);
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg_processing_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    #[must_use]
    pub fn snapshot(&self, current_rate: f64) -> QueueStats {
        QueueStats {
            total_success: self.total_success,
            total_failed: self.total_failed,
            total_retries: self.total_retries,
            avg_processing_ms: self.avg_processing_ms(),
            current_rate,
        }
    }
}
