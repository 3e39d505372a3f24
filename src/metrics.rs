//! Request metrics and statistics tracking for the coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::info;

/// Per-model request counts by outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub success: u64,
    pub error: u64,
}

impl StatusCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.success + self.error
    }
}

/// Metrics collector for inference routing.
pub struct CoordinatorMetrics {
    /// Total routed requests across all models
    pub requests_total: AtomicU64,
    /// Request counts by (model, status)
    request_counts: RwLock<HashMap<String, StatusCounts>>,
    /// Request durations by model (in microseconds)
    durations: RwLock<HashMap<String, Vec<u64>>>,
    /// Per-model availability gauge
    availability: RwLock<HashMap<String, bool>>,
    /// Start time for throughput calculation
    start_time: Instant,
}

impl CoordinatorMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            request_counts: RwLock::new(HashMap::new()),
            durations: RwLock::new(HashMap::new()),
            availability: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record one routed request, successful or not.
    pub fn record_request(&self, model: &str, success: bool, duration: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut counts) = self.request_counts.write() {
            let entry = counts.entry(model.to_string()).or_default();
            if success {
                entry.success += 1;
            } else {
                entry.error += 1;
            }
        }

        if let Ok(mut durations) = self.durations.write() {
            let model_durations = durations.entry(model.to_string()).or_default();
            model_durations.push(duration.as_micros() as u64);
            // Keep only last 1000 per model
            if model_durations.len() > 1000 {
                model_durations.drain(0..500);
            }
        }
    }

    /// Set the availability gauge for a model.
    pub fn set_model_availability(&self, model: &str, available: bool) {
        if let Ok(mut availability) = self.availability.write() {
            availability.insert(model.to_string(), available);
        }
    }

    /// Get the availability gauge for all known models.
    pub fn availability(&self) -> HashMap<String, bool> {
        self.availability.read().unwrap().clone()
    }

    /// Get request counts by model.
    pub fn request_counts(&self) -> HashMap<String, StatusCounts> {
        self.request_counts.read().unwrap().clone()
    }

    /// Get per-model duration statistics.
    pub fn get_model_stats(&self) -> HashMap<String, ModelStats> {
        let durations = self.durations.read().unwrap();
        let mut stats = HashMap::new();

        for (model, model_durations) in durations.iter() {
            if model_durations.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = model_durations.clone();
            sorted.sort_unstable();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                model.clone(),
                ModelStats {
                    requests: count as u64,
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p95_us: sorted[(count as f64 * 0.95) as usize],
                    p99_us: sorted[(count as f64 * 0.99) as usize],
                },
            );
        }

        stats
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests_total.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let total = self.requests_total.load(Ordering::Relaxed);
        let throughput = self.get_throughput();
        let counts = self.request_counts();
        let stats = self.get_model_stats();
        let availability = self.availability();

        info!(
            requests_total = total,
            throughput = format!("{:.1} req/s", throughput),
            "Coordinator metrics summary"
        );

        for (model, status) in &counts {
            let error_rate = if status.total() > 0 {
                (status.error as f64 / status.total() as f64) * 100.0
            } else {
                0.0
            };
            info!(
                model = %model,
                success = status.success,
                error = status.error,
                error_rate = format!("{error_rate:.1}%"),
                "Requests by model"
            );
        }

        for (model, model_stats) in &stats {
            info!(
                model = %model,
                mean_us = model_stats.mean_us,
                p50_us = model_stats.p50_us,
                p95_us = model_stats.p95_us,
                p99_us = model_stats.p99_us,
                "Request duration by model"
            );
        }

        for (model, available) in &availability {
            info!(model = %model, available = available, "Model availability");
        }
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-model duration statistics
#[derive(Debug)]
pub struct ModelStats {
    pub requests: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<CoordinatorMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<CoordinatorMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
