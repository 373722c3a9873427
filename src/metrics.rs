use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of sink latency samples kept for percentile estimates
pub const DEFAULT_PERCENTILE_WINDOW: usize = 1000;

/// A sliding window of latency samples with percentile queries
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker keeping at most `window_size` samples
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record one sample, evicting the oldest once the window is full
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let mut samples = self.samples.lock();
        if samples.len() >= self.window_size {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of samples currently in the window
    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Counters shared by every Logic of one running pipeline
///
/// Cloning is cheap; all clones observe the same counters.
#[derive(Debug, Clone)]
pub struct FlowMetrics {
    /// Items the source pushed into the first stage
    items_emitted: Arc<AtomicU64>,
    /// Items that reached the sink callback
    items_delivered: Arc<AtomicU64>,
    /// Items an `alsoTo` branch skipped because it was still busy
    branch_dropped: Arc<AtomicU64>,
    /// Times a stage held back upstream because it was at capacity
    backpressure_waits: Arc<AtomicU64>,
    sink_latency: PercentileTracker,
    start_time: Instant,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self {
            items_emitted: Arc::new(AtomicU64::new(0)),
            items_delivered: Arc::new(AtomicU64::new(0)),
            branch_dropped: Arc::new(AtomicU64::new(0)),
            backpressure_waits: Arc::new(AtomicU64::new(0)),
            sink_latency: PercentileTracker::new(DEFAULT_PERCENTILE_WINDOW),
            start_time: Instant::now(),
        }
    }

    pub fn record_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one sink invocation and how long it took to settle
    pub fn record_delivered(&self, latency: Duration) {
        self.items_delivered.fetch_add(1, Ordering::Relaxed);
        self.sink_latency.record(latency);
    }

    pub fn record_dropped(&self) {
        self.branch_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_emitted(&self) -> u64 {
        self.items_emitted.load(Ordering::Relaxed)
    }

    pub fn total_delivered(&self) -> u64 {
        self.items_delivered.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.branch_dropped.load(Ordering::Relaxed)
    }

    pub fn total_blocks(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }

    /// Items delivered to the sink per second since the run started
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_delivered() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_emitted: self.total_emitted(),
            total_delivered: self.total_delivered(),
            total_dropped: self.total_dropped(),
            total_blocks: self.total_blocks(),
            throughput_ips: self.throughput_ips(),
            sink_latency_p50_us: self.sink_latency.p50_us(),
            sink_latency_p95_us: self.sink_latency.p95_us(),
            sink_latency_p99_us: self.sink_latency.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of a pipeline's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_emitted: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
    pub total_blocks: u64,
    pub throughput_ips: f64,
    pub sink_latency_p50_us: f64,
    pub sink_latency_p95_us: f64,
    pub sink_latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Emitted: {}, Delivered: {}, Branch drops: {}, Backpressure waits: {}, \
             Throughput: {:.2} items/s, Sink P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, \
             Elapsed: {:.2}s",
            self.total_emitted,
            self.total_delivered,
            self.total_dropped,
            self.total_blocks,
            self.throughput_ips,
            self.sink_latency_p50_us,
            self.sink_latency_p95_us,
            self.sink_latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(Duration::from_micros(i));
        }
        assert_eq!(tracker.p50_us(), 5.0);
        assert_eq!(tracker.p99_us(), 10.0);
    }

    #[test]
    fn test_percentile_window_evicts_oldest() {
        let tracker = PercentileTracker::new(3);
        for i in 1..=5 {
            tracker.record(Duration::from_micros(i * 100));
        }
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.p50_us(), 400.0);
    }

    #[test]
    fn test_flow_metrics_shared_between_clones() {
        let metrics = FlowMetrics::new();
        let clone = metrics.clone();
        for _ in 0..4 {
            clone.record_emitted();
            clone.record_delivered(Duration::from_micros(10));
        }
        clone.record_dropped();
        clone.record_block();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_emitted, 4);
        assert_eq!(snapshot.total_delivered, 4);
        assert_eq!(snapshot.total_dropped, 1);
        assert_eq!(snapshot.total_blocks, 1);
        assert!(snapshot.format().contains("Delivered: 4"));
    }
}
