//! MetricsAggregator - Rolling-Window Request Statistics
//!
//! Live operational numbers for the serving layer without unbounded memory:
//!
//! - a **global window** of the last 1000 request samples (all endpoints),
//! - a **per-endpoint window** of the last 100 response times per endpoint,
//! - **lifetime counters** (total / success / failure) and an error-kind histogram.
//!
//! Windows are ring buffers: once full, the oldest sample is dropped as the
//! newest is appended. Lifetime counters are monotonic until `reset()`.
//!
//! ```text
//! record() ──▶ AtomicU64 counters  (lock-free)
//!          └─▶ RwLock<MetricsWindows>
//!                 global:       VecDeque<MetricSample>   (cap 1000)
//!                 by_endpoint:  HashMap<_, VecDeque<_>>  (cap 100 each)
//!                 error_types:  HashMap<String, u64>
//!
//! snapshot() ── read lock ──▶ MetricsSnapshot (derived, not stored)
//! ```
//!
//! ## Consistency
//!
//! `record()` is the hot path and only holds the write lock for a few pushes.
//! A snapshot taken while requests are being recorded may see a counter
//! increment whose sample has not landed in the window yet; the numbers are
//! approximate by nature and no snapshot isolation is provided.
//!
//! ## `requests_per_second`
//!
//! This is the number of samples in the global window recorded within the
//! last second, not a long-run rate. Under more than `window` requests per
//! second it saturates at the window size.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default size of the global rolling window.
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Default size of each per-endpoint rolling window.
pub const DEFAULT_ENDPOINT_WINDOW_SIZE: usize = 100;

const P95_QUANTILE: f64 = 0.95;
const RPS_WINDOW: Duration = Duration::from_secs(1);

// ============================================================================
// Samples & snapshots
// ============================================================================

/// One completed request in the global window.
///
/// Outcome and error kind are folded into the lifetime counters and the
/// error-kind table at record time; the window itself only needs the
/// timestamp and latency.
#[derive(Debug, Clone)]
struct MetricSample {
    recorded_at: Instant,
    response_time: Duration,
}

/// Aggregate statistics derived from the current windows.
///
/// Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: f64,
    pub p95_response_time: f64,
    pub requests_per_second: f64,
    pub uptime_seconds: f64,
    pub error_rate: f64,
    pub error_types: BTreeMap<String, u64>,
}

/// Statistics for one endpoint's window. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    pub requests: usize,
    pub avg_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,
}

#[derive(Debug)]
struct MetricsWindows {
    global: VecDeque<MetricSample>,
    by_endpoint: HashMap<String, VecDeque<Duration>>,
    error_types: HashMap<String, u64>,
    started_at: Instant,
}

impl MetricsWindows {
    fn new() -> Self {
        Self {
            global: VecDeque::new(),
            by_endpoint: HashMap::new(),
            error_types: HashMap::new(),
            started_at: Instant::now(),
        }
    }
}

/// Append to a ring buffer of fixed capacity, dropping the oldest item first.
fn push_bounded<T>(window: &mut VecDeque<T>, capacity: usize, item: T) {
    if capacity == 0 {
        return;
    }
    while window.len() >= capacity {
        window.pop_front();
    }
    window.push_back(item);
}

/// Index of the `quantile` element in an ascending window of `len` samples,
/// clamped to the last valid index.
fn percentile_index(len: usize, quantile: f64) -> usize {
    let index = (len as f64 * quantile).floor() as usize;
    index.min(len.saturating_sub(1))
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

// ============================================================================
// MetricsAggregator
// ============================================================================

/// Concurrency-safe recorder of request outcomes.
///
/// Constructed once at startup and shared as `Arc<MetricsAggregator>`.
pub struct MetricsAggregator {
    window_size: usize,
    endpoint_window_size: usize,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    windows: RwLock<MetricsWindows>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("window_size", &self.window_size)
            .field("endpoint_window_size", &self.endpoint_window_size)
            .field(
                "total_requests",
                &self.total_requests.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an aggregator with the default 1000/100 sample windows.
    pub fn new() -> Self {
        Self::with_windows(DEFAULT_WINDOW_SIZE, DEFAULT_ENDPOINT_WINDOW_SIZE)
    }

    /// Create an aggregator with custom global and per-endpoint window sizes.
    pub fn with_windows(window_size: usize, endpoint_window_size: usize) -> Self {
        Self {
            window_size,
            endpoint_window_size,
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            windows: RwLock::new(MetricsWindows::new()),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record one completed request.
    ///
    /// `error_kind` is counted only for failed requests.
    pub async fn record(
        &self,
        endpoint: &str,
        response_time: Duration,
        success: bool,
        error_kind: Option<&str>,
    ) {
        let recorded_at = Instant::now();

        // Counters move under the same write lock that `reset` holds.
        let mut guard = self.windows.write().await;
        let windows = &mut *guard;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        push_bounded(
            &mut windows.global,
            self.window_size,
            MetricSample {
                recorded_at,
                response_time,
            },
        );

        let endpoint_window = windows
            .by_endpoint
            .entry(endpoint.to_string())
            .or_insert_with(VecDeque::new);
        push_bounded(endpoint_window, self.endpoint_window_size, response_time);

        if !success {
            if let Some(kind) = error_kind {
                *windows.error_types.entry(kind.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Compute aggregate statistics from the current windows.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let windows = self.windows.read().await;
        let now = Instant::now();

        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);

        let mut times: Vec<Duration> = windows.global.iter().map(|s| s.response_time).collect();

        let average_response_time = if times.is_empty() {
            0.0
        } else {
            let sum: f64 = times.iter().copied().map(as_millis_f64).sum();
            sum / times.len() as f64
        };

        let p95_response_time = if times.is_empty() {
            0.0
        } else {
            times.sort_unstable();
            as_millis_f64(times[percentile_index(times.len(), P95_QUANTILE)])
        };

        let recent = windows
            .global
            .iter()
            .filter(|s| now.saturating_duration_since(s.recorded_at) <= RPS_WINDOW)
            .count();

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            average_response_time,
            p95_response_time,
            requests_per_second: recent as f64,
            uptime_seconds: now
                .saturating_duration_since(windows.started_at)
                .as_secs_f64(),
            error_rate: failed as f64 / total.max(1) as f64 * 100.0,
            error_types: windows
                .error_types
                .iter()
                .map(|(kind, count)| (kind.clone(), *count))
                .collect(),
        }
    }

    /// Statistics for a single endpoint's window.
    pub async fn endpoint_snapshot(&self, endpoint: &str) -> EndpointSnapshot {
        let windows = self.windows.read().await;

        let times = match windows.by_endpoint.get(endpoint) {
            Some(times) if !times.is_empty() => times,
            _ => {
                return EndpointSnapshot {
                    requests: 0,
                    avg_time: 0.0,
                    min_time: None,
                    max_time: None,
                }
            }
        };

        let sum: f64 = times.iter().copied().map(as_millis_f64).sum();
        EndpointSnapshot {
            requests: times.len(),
            avg_time: sum / times.len() as f64,
            min_time: times.iter().min().copied().map(as_millis_f64),
            max_time: times.iter().max().copied().map(as_millis_f64),
        }
    }

    /// Clear every window and counter and restart the uptime clock.
    pub async fn reset(&self) {
        let mut windows = self.windows.write().await;
        *windows = MetricsWindows::new();
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        tracing::info!("MetricsAggregator: metrics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test]
    async fn test_large_windows_start_empty() {
        let metrics = MetricsAggregator::with_windows(usize::MAX, usize::MAX);
        metrics
            .record("/api/predict", Duration::from_millis(4), true, None)
            .await;

        assert_eq!(metrics.snapshot().await.total_requests, 1);
        assert_eq!(metrics.endpoint_snapshot("/api/predict").await.requests, 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let metrics = MetricsAggregator::new();
        let snap = metrics.snapshot().await;

        assert_eq!(snap.total_requests, 0);
        assert_close(snap.average_response_time, 0.0);
        assert_close(snap.p95_response_time, 0.0);
        assert_close(snap.requests_per_second, 0.0);
        assert_close(snap.error_rate, 0.0);
        assert!(snap.error_types.is_empty());
    }

    #[tokio::test]
    async fn test_counters_and_error_types() {
        let metrics = MetricsAggregator::new();
        metrics
            .record("/api/predict", Duration::from_millis(10), true, None)
            .await;
        metrics
            .record(
                "/api/predict",
                Duration::from_millis(20),
                false,
                Some("InferenceFailure"),
            )
            .await;
        metrics
            .record(
                "/api/predict",
                Duration::from_millis(30),
                false,
                Some("InferenceFailure"),
            )
            .await;
        metrics
            .record("/health", Duration::from_millis(40), false, None)
            .await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 3);
        assert_close(snap.error_rate, 75.0);
        assert_close(snap.average_response_time, 25.0);
        assert_eq!(snap.error_types.get("InferenceFailure"), Some(&2));
        assert_eq!(snap.error_types.len(), 1);
    }

    #[tokio::test]
    async fn test_window_keeps_only_recent_samples() {
        let metrics = MetricsAggregator::with_windows(3, 2);
        for _ in 0..2 {
            metrics
                .record("/api/predict", Duration::from_millis(100), true, None)
                .await;
        }
        for _ in 0..3 {
            metrics
                .record("/api/predict", Duration::from_millis(10), true, None)
                .await;
        }

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_requests, 5);
        assert_close(snap.average_response_time, 10.0);

        let endpoint = metrics.endpoint_snapshot("/api/predict").await;
        assert_eq!(endpoint.requests, 2);
    }

    #[tokio::test]
    async fn test_p95_uses_floor_index() {
        let metrics = MetricsAggregator::with_windows(100, 100);
        // Recorded out of order on purpose; the window is sorted for the percentile.
        for ms in (1..=100u64).rev() {
            metrics
                .record("/x", Duration::from_millis(ms), true, None)
                .await;
        }
        let snap = metrics.snapshot().await;
        // floor(0.95 * 100) = 95 → the 96th smallest value.
        assert_close(snap.p95_response_time, 96.0);
    }

    #[tokio::test]
    async fn test_p95_single_sample() {
        let metrics = MetricsAggregator::new();
        metrics
            .record("/x", Duration::from_millis(7), true, None)
            .await;
        assert_close(metrics.snapshot().await.p95_response_time, 7.0);
    }

    #[test]
    fn test_percentile_index_is_clamped() {
        assert_eq!(percentile_index(1, 0.95), 0);
        assert_eq!(percentile_index(20, 0.95), 19);
        assert_eq!(percentile_index(10, 1.0), 9);
        assert_eq!(percentile_index(0, 0.95), 0);
    }

    #[test]
    fn test_push_bounded_drops_oldest() {
        let mut window = VecDeque::new();
        for i in 0..5 {
            push_bounded(&mut window, 3, i);
        }
        assert_eq!(window, VecDeque::from(vec![2, 3, 4]));

        let mut disabled = VecDeque::new();
        push_bounded(&mut disabled, 0, 1);
        assert!(disabled.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_per_second_counts_last_second() {
        let metrics = MetricsAggregator::new();
        for _ in 0..3 {
            metrics
                .record("/x", Duration::from_millis(5), true, None)
                .await;
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        metrics
            .record("/x", Duration::from_millis(5), true, None)
            .await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_requests, 4);
        assert_close(snap.requests_per_second, 1.0);
        assert!(snap.uptime_seconds >= 2.0);
    }

    #[tokio::test]
    async fn test_endpoint_snapshot() {
        let metrics = MetricsAggregator::new();
        for ms in [10, 20, 60] {
            metrics
                .record("/api/predict", Duration::from_millis(ms), true, None)
                .await;
        }
        metrics
            .record("/health", Duration::from_millis(1), true, None)
            .await;

        let snap = metrics.endpoint_snapshot("/api/predict").await;
        assert_eq!(snap.requests, 3);
        assert_close(snap.avg_time, 30.0);
        assert_close(snap.min_time.unwrap(), 10.0);
        assert_close(snap.max_time.unwrap(), 60.0);

        let unknown = metrics.endpoint_snapshot("/nope").await;
        assert_eq!(unknown.requests, 0);
        assert!(unknown.min_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let metrics = MetricsAggregator::new();
        metrics
            .record("/x", Duration::from_millis(5), false, Some("ModelNotReady"))
            .await;
        tokio::time::advance(Duration::from_secs(10)).await;

        metrics.reset().await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.failed_requests, 0);
        assert!(snap.error_types.is_empty());
        assert!(snap.uptime_seconds < 1.0);
        assert_eq!(metrics.endpoint_snapshot("/x").await.requests, 0);
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        let metrics = Arc::new(MetricsAggregator::with_windows(50, 10));
        let mut handles = Vec::new();

        for i in 0..200u64 {
            let metrics = metrics.clone();
            handles.push(tokio::spawn(async move {
                let ok = i % 4 != 0;
                metrics
                    .record(
                        "/api/predict",
                        Duration::from_millis(i % 7),
                        ok,
                        (!ok).then_some("InferenceFailure"),
                    )
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = metrics.snapshot().await;
        assert_eq!(snap.total_requests, 200);
        assert_eq!(snap.failed_requests, 50);
        assert_eq!(snap.successful_requests, 150);
        assert_eq!(snap.error_types.get("InferenceFailure"), Some(&50));
        assert_eq!(metrics.endpoint_snapshot("/api/predict").await.requests, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_during_recording_keeps_counters_consistent() {
        for _ in 0..50 {
            let metrics = Arc::new(MetricsAggregator::with_windows(1000, 100));
            let mut handles = Vec::new();

            for i in 0..64u64 {
                let task_metrics = metrics.clone();
                handles.push(tokio::spawn(async move {
                    let ok = i % 2 == 0;
                    task_metrics
                        .record(
                            "/api/predict",
                            Duration::from_millis(i),
                            ok,
                            (!ok).then_some("InferenceFailure"),
                        )
                        .await;
                }));
                if i == 32 {
                    let metrics = metrics.clone();
                    handles.push(tokio::spawn(async move { metrics.reset().await }));
                }
            }
            for handle in handles {
                handle.await.unwrap();
            }

            let snap = metrics.snapshot().await;
            let error_total: u64 = snap.error_types.values().sum();
            assert_eq!(
                snap.total_requests,
                snap.successful_requests + snap.failed_requests
            );
            assert_eq!(error_total, snap.failed_requests);
        }
    }

    #[test]
    fn test_aggregator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MetricsAggregator>();
    }
}
