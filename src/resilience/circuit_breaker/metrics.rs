//! Rolling request window feeding the trip condition.
//!
//! Ten one-second buckets; a bucket is cleared when the clock moves past it,
//! so every ratio covers at most the last ten seconds of traffic.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

const BUCKETS: usize = 10;
const BUCKET_WIDTH: Duration = Duration::from_secs(1);
/// Latency samples kept per bucket.
const MAX_SAMPLES: usize = 4096;

#[derive(Debug, Default, Clone)]
struct Bucket {
    total: u64,
    network_errors: u64,
    codes: HashMap<u16, u64>,
    latencies_us: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct RollingMetrics {
    buckets: Vec<Bucket>,
    /// Absolute bucket number of the newest bucket.
    head: u64,
    origin: Instant,
}

impl RollingMetrics {
    pub fn new(now: Instant) -> Self {
        Self {
            buckets: vec![Bucket::default(); BUCKETS],
            head: 0,
            origin: now,
        }
    }

    fn slot(&self, n: u64) -> usize {
        (n % BUCKETS as u64) as usize
    }

    /// Moves the window forward to `now`, clearing buckets that fell out.
    pub fn advance(&mut self, now: Instant) {
        let n = (now.saturating_duration_since(self.origin).as_nanos()
            / BUCKET_WIDTH.as_nanos()) as u64;
        if n <= self.head {
            return;
        }
        let stale = (n - self.head).min(BUCKETS as u64);
        for i in 0..stale {
            let slot = self.slot(n - i);
            self.buckets[slot] = Bucket::default();
        }
        self.head = n;
    }

    pub fn record(&mut self, now: Instant, status: u16, latency: Duration, network_error: bool) {
        self.advance(now);
        let slot = self.slot(self.head);
        let bucket = &mut self.buckets[slot];
        bucket.total += 1;
        if network_error {
            bucket.network_errors += 1;
        }
        *bucket.codes.entry(status).or_insert(0) += 1;
        if bucket.latencies_us.len() < MAX_SAMPLES {
            bucket.latencies_us.push(latency.as_micros() as u64);
        }
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.total).sum()
    }

    pub fn network_error_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let errors: u64 = self.buckets.iter().map(|b| b.network_errors).sum();
        errors as f64 / total as f64
    }

    fn codes_in(&self, start: i64, end: i64) -> u64 {
        self.buckets
            .iter()
            .flat_map(|b| b.codes.iter())
            .filter(|(code, _)| (start..end).contains(&i64::from(**code)))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Responses with codes in `[start_a, end_a)` over those in
    /// `[start_b, end_b)`; zero when the denominator is empty.
    pub fn response_code_ratio(&self, start_a: i64, end_a: i64, start_b: i64, end_b: i64) -> f64 {
        let denominator = self.codes_in(start_b, end_b);
        if denominator == 0 {
            return 0.0;
        }
        self.codes_in(start_a, end_a) as f64 / denominator as f64
    }

    /// Latency in milliseconds at percentile `quantile` (0..=100).
    pub fn latency_at_quantile_ms(&self, quantile: f64) -> f64 {
        let mut samples: Vec<u64> = self
            .buckets
            .iter()
            .flat_map(|b| b.latencies_us.iter().copied())
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_unstable();
        let rank = ((quantile / 100.0) * samples.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, samples.len()) - 1;
        samples[idx] as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ratios() {
        let now = Instant::now();
        let mut m = RollingMetrics::new(now);
        for _ in 0..3 {
            m.record(now, 200, Duration::from_millis(10), false);
        }
        m.record(now, 502, Duration::from_millis(40), true);

        assert_eq!(m.network_error_ratio(), 0.25);
        assert_eq!(m.response_code_ratio(500, 600, 0, 600), 0.25);
        assert_eq!(m.response_code_ratio(500, 600, 300, 400), 0.0);
        assert_eq!(m.latency_at_quantile_ms(50.0), 10.0);
        assert_eq!(m.latency_at_quantile_ms(100.0), 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires_old_buckets() {
        let start = Instant::now();
        let mut m = RollingMetrics::new(start);
        m.record(start, 502, Duration::from_millis(1), true);

        m.advance(start + Duration::from_secs(5));
        assert_eq!(m.total(), 1);

        m.advance(start + Duration::from_secs(11));
        assert_eq!(m.total(), 0);
        assert_eq!(m.network_error_ratio(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_is_zero() {
        let m = RollingMetrics::new(Instant::now());
        assert_eq!(m.latency_at_quantile_ms(99.0), 0.0);
        assert_eq!(m.response_code_ratio(500, 600, 0, 600), 0.0);
    }
}
