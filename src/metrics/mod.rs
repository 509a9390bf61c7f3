//! In-process metrics for the VCA lifecycle
//!
//! Counters for postings and rewards, gauges for ledger head, latency
//! histograms for toolchain calls. Exported as JSON or Prometheus text.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Metrics registry shared by the lifecycle services
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter
    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value
    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write().await;
        let histogram = histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()));
        histogram.observe(value);
    }

    /// Record a duration, in seconds
    pub async fn record_latency(&self, name: &str, elapsed: Duration) {
        self.observe_histogram(name, elapsed.as_secs_f64()).await;
    }

    /// Observation count of a histogram (0 when it doesn't exist)
    pub async fn histogram_count(&self, name: &str) -> u64 {
        let histograms = self.histograms.read().await;
        histograms.get(name).map(|h| h.count()).unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// All metrics as JSON
    pub async fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let counter_values: BTreeMap<&str, u64> = counters
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let gauge_values: BTreeMap<&str, u64> = gauges
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let histogram_values: BTreeMap<&str, serde_json::Value> = histograms
            .iter()
            .map(|(k, h)| (k.as_str(), h.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    /// Prometheus text exposition
    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();

        output.push_str("# HELP vca_uptime_seconds Time since process start\n");
        output.push_str("# TYPE vca_uptime_seconds gauge\n");
        output.push_str(&format!("vca_uptime_seconds {}\n\n", self.uptime_seconds()));

        for (name, counter) in counters.iter() {
            let prometheus_name = prometheus_name(name);
            output.push_str(&format!("# TYPE {} counter\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                counter.load(Ordering::Relaxed)
            ));
        }

        for (name, gauge) in gauges.iter() {
            let prometheus_name = prometheus_name(name);
            output.push_str(&format!("# TYPE {} gauge\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                gauge.load(Ordering::Relaxed)
            ));
        }

        for (name, histogram) in histograms.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket histogram. The sum is kept in microseconds.
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|bucket| value <= *bucket) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let bucket_counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": bucket_counts,
            "sum": self.sum(),
            "count": self.count(),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let prometheus_name = prometheus_name(name);
        let mut output = format!("# TYPE {} histogram\n", prometheus_name);

        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                prometheus_name, bucket, cumulative
            ));
        }

        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            prometheus_name,
            self.count()
        ));
        output.push_str(&format!("{}_sum {}\n", prometheus_name, self.sum()));
        output.push_str(&format!("{}_count {}\n", prometheus_name, self.count()));

        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Proof generation runs in seconds, so the buckets reach further
        // than a typical request histogram.
        Self::new(vec![
            0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    // Lifecycle
    pub const VCAS_GENERATED: &str = "vca.generated";
    pub const CONSENT_APPROVED: &str = "vca.consent.approved";
    pub const CONSENT_VETOED: &str = "vca.consent.vetoed";
    pub const CONSENT_CANCELLED: &str = "vca.consent.cancelled";

    // Ledger
    pub const ENTRIES_POSTED: &str = "vca.ledger.posted";
    pub const DUPLICATES_REJECTED: &str = "vca.ledger.duplicates_rejected";
    pub const ROLLUPS_POSTED: &str = "vca.ledger.rollups_posted";
    pub const VGT_ISSUED: &str = "vca.ledger.vgt_issued";
    pub const LEDGER_HEAD: &str = "vca.ledger.head";

    // Batches
    pub const BATCH_ITEMS_MINTED: &str = "vca.batch.minted";
    pub const BATCH_ITEMS_FAILED: &str = "vca.batch.failed";

    // Latency histograms
    pub const PROVER_LATENCY: &str = "vca.prover.latency_seconds";
    pub const GENERATE_LATENCY: &str = "vca.generate.latency_seconds";
}

/// Time an async operation into a histogram
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics.record_latency(metric_name, start.elapsed()).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter() {
        let registry = MetricsRegistry::new();

        registry.inc_counter(metric_names::ENTRIES_POSTED).await;
        registry.inc_counter(metric_names::ENTRIES_POSTED).await;
        registry.add_counter(metric_names::ENTRIES_POSTED, 5).await;

        assert_eq!(registry.get_counter(metric_names::ENTRIES_POSTED).await, 7);
        assert_eq!(registry.get_counter("vca.unknown").await, 0);
    }

    #[tokio::test]
    async fn test_gauge() {
        let registry = MetricsRegistry::new();

        registry.set_gauge(metric_names::LEDGER_HEAD, 100).await;
        assert_eq!(registry.get_gauge(metric_names::LEDGER_HEAD).await, 100);

        registry.set_gauge(metric_names::LEDGER_HEAD, 50).await;
        assert_eq!(registry.get_gauge(metric_names::LEDGER_HEAD).await, 50);
    }

    #[tokio::test]
    async fn test_histogram_export() {
        let registry = MetricsRegistry::new();
        registry
            .record_latency(metric_names::PROVER_LATENCY, Duration::from_millis(300))
            .await;
        registry.observe_histogram(metric_names::PROVER_LATENCY, 200.0).await;

        assert_eq!(registry.histogram_count(metric_names::PROVER_LATENCY).await, 2);

        let text = registry.to_prometheus().await;
        assert!(text.contains("vca_prover_latency_seconds_bucket{le=\"0.5\"} 1"));
        assert!(text.contains("vca_prover_latency_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("vca_prover_latency_seconds_count 2"));
    }

    #[tokio::test]
    async fn test_timed_records_latency() {
        let registry = MetricsRegistry::new();
        let value = timed(&registry, metric_names::GENERATE_LATENCY, async { 42 }).await;
        assert_eq!(value, 42);
        assert_eq!(
            registry.histogram_count(metric_names::GENERATE_LATENCY).await,
            1
        );

        let json = registry.to_json().await;
        assert_eq!(json["histograms"][metric_names::GENERATE_LATENCY]["count"], 1);
    }
}
