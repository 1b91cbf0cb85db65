// crates/inference-loadtest/src/stats.rs
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;

/// Window over which current RPS, failure rate and percentiles are computed.
const ROLLING_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct Completion {
    at: Instant,
    latency_ms: f64,
    failed: bool,
}

/// Aggregate statistics shared by every user task. Each finished request is
/// recorded here; the sampler reads rolling aggregates out of it on a fixed
/// cadence.
pub struct StatsRegistry {
    started: Instant,
    rolling_window: Duration,
    window: Mutex<VecDeque<Completion>>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
}

/// One row of the run history: rolling aggregates transcribed at a single
/// point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub time: String,
    pub elapsed_secs: f64,
    pub current_rps: f64,
    pub current_fail_per_sec: f64,
    pub response_time_percentile_90: f64,
    pub response_time_percentile_95: f64,
    pub avg_response_time: f64,
    pub user_count: u64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::with_rolling_window(ROLLING_WINDOW)
    }

    pub fn with_rolling_window(rolling_window: Duration) -> Self {
        Self {
            started: Instant::now(),
            rolling_window,
            window: Mutex::new(VecDeque::new()),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency_ms: f64, failed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back(Completion {
            at: now,
            latency_ms,
            failed,
        });
        evict(&mut window, now, self.rolling_window);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Transcribe the current rolling aggregates into one history row.
    pub fn sample(&self, user_count: u64) -> StatsSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.started);

        let (count, failures, mut latencies) = {
            let mut window = self.window.lock();
            evict(&mut window, now, self.rolling_window);
            let count = window.len();
            let failures = window.iter().filter(|c| c.failed).count();
            let latencies: Vec<f64> = window.iter().map(|c| c.latency_ms).collect();
            (count, failures, latencies)
        };

        // Early in the run less than a full window has elapsed; divide by the
        // covered span so the first samples are not deflated.
        let span_secs = elapsed.min(self.rolling_window).as_secs_f64().max(0.001);

        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        StatsSnapshot {
            time: chrono::Utc::now().format("%H:%M:%S").to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            current_rps: count as f64 / span_secs,
            current_fail_per_sec: failures as f64 / span_secs,
            response_time_percentile_90: percentile(&latencies, 90.0),
            response_time_percentile_95: percentile(&latencies, 95.0),
            avg_response_time: avg,
            user_count,
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn evict(window: &mut VecDeque<Completion>, now: Instant, rolling_window: Duration) {
    while let Some(front) = window.front() {
        if now.duration_since(front.at) <= rolling_window {
            break;
        }
        window.pop_front();
    }
}

/// Linear-interpolated percentile over an ascending-sorted slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len() as f64;
    let rank = (p / 100.0) * (n - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - (lo as f64);
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_slice_is_zero() {
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn percentile_of_single_sample_is_that_sample() {
        assert_eq!(percentile(&[42.0], 90.0), 42.0);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert!((percentile(&sorted, 50.0) - 30.0).abs() < 1e-9);
        assert!((percentile(&sorted, 90.0) - 46.0).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 100.0), 50.0);
    }

    #[test]
    fn sample_reports_counts_and_averages() {
        let registry = StatsRegistry::new();
        registry.record(100.0, false);
        registry.record(200.0, false);
        registry.record(300.0, true);

        let snapshot = registry.sample(3);
        assert_eq!(registry.total_requests(), 3);
        assert_eq!(registry.total_failures(), 1);
        assert!(snapshot.current_rps > 0.0);
        assert!(snapshot.current_fail_per_sec > 0.0);
        assert!((snapshot.avg_response_time - 200.0).abs() < 1e-9);
        assert_eq!(snapshot.user_count, 3);
        assert!(snapshot.response_time_percentile_95 <= 300.0);
        assert!(snapshot.response_time_percentile_90 <= snapshot.response_time_percentile_95);
    }

    #[test]
    fn completions_fall_out_of_the_rolling_window() {
        let registry = StatsRegistry::with_rolling_window(Duration::from_millis(50));
        registry.record(100.0, false);
        std::thread::sleep(Duration::from_millis(80));

        let snapshot = registry.sample(1);
        assert_eq!(snapshot.current_rps, 0.0);
        assert_eq!(snapshot.avg_response_time, 0.0);
        // totals are cumulative and unaffected by eviction
        assert_eq!(registry.total_requests(), 1);
    }

    #[test]
    fn snapshot_serializes_with_expected_fields() {
        let registry = StatsRegistry::new();
        registry.record(10.0, false);
        let value = serde_json::to_value(registry.sample(1)).expect("serialize snapshot");
        for field in [
            "time",
            "current_rps",
            "current_fail_per_sec",
            "response_time_percentile_90",
            "response_time_percentile_95",
            "avg_response_time",
            "user_count",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }
}
