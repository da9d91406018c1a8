use ahash::RandomState;
use dashmap::DashMap;
use hdrhistogram::Histogram;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::metrics::{MetricKind, MetricSeriesSummary, MetricValues, MetricsRegistry, SeriesHandle};
use super::sample::Sample;

#[derive(Debug, Default)]
struct CheckCounters {
    total: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub name: String,
    pub total: u64,
    pub failed: u64,
}

/// Latency statistics in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencySummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EndpointSummary {
    pub tag: String,
    pub requests: u64,
    pub failed: u64,
    pub error_rate: f64,
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub error_rate: f64,
    pub iterations_total: u64,
    pub scenario_errors_total: u64,
    pub checks_total: u64,
    pub checks_failed: u64,
    pub checks: Vec<CheckSummary>,
    /// Failure breakdown keyed by outcome label ("404", "timeout", "connect").
    pub failures_by_reason: Vec<(String, u64)>,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub run_duration: Duration,
    pub rps: f64,
    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
    pub req_per_sec_stdev_pct: f64,
    pub latency: Option<LatencySummary>,
    pub endpoints: Vec<EndpointSummary>,
    pub metrics: Vec<MetricSeriesSummary>,
}

/// Welford accumulator over per-tick requests/sec samples.
#[derive(Debug, Default, Clone, Copy)]
struct RpsAgg {
    count: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RpsAgg {
    fn record(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }

        self.count = self.count.saturating_add(1);
        let delta = sample - self.mean;
        self.mean += delta / (self.count as f64);
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
        self.max = self.max.max(sample);
    }

    fn summary(&self) -> (f64, f64, f64, f64) {
        if self.count == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let avg = self.mean;
        let stdev = if self.count >= 2 {
            (self.m2 / ((self.count - 1) as f64)).sqrt()
        } else {
            0.0
        };

        let stdev_pct = if avg > 0.0 { (stdev / avg) * 100.0 } else { 0.0 };
        (avg, stdev, self.max, stdev_pct)
    }
}

/// The aggregator: every virtual user records into this, nothing else is
/// shared between them. `record_sample` is O(1) amortized and never fails;
/// readers take snapshots, they never hold writers up for long.
#[derive(Debug)]
pub struct RunStats {
    requests_total: AtomicU64,
    failed_requests_total: AtomicU64,
    iterations_total: AtomicU64,
    scenario_errors_total: AtomicU64,
    checks_total: AtomicU64,
    checks_failed: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    timeouts_total: AtomicU64,
    bytes_received_total: AtomicU64,
    bytes_sent_total: AtomicU64,

    checks_by_name: DashMap<Arc<str>, Arc<CheckCounters>, RandomState>,
    failures_by_reason: DashMap<Arc<str>, AtomicU64, RandomState>,

    latency_us: Mutex<Histogram<u64>>,
    latency_us_window: Mutex<Histogram<u64>>,
    rps_samples: Mutex<RpsAgg>,

    metrics: Arc<MetricsRegistry>,
    metric_http_reqs: SeriesHandle,
    metric_http_req_duration: SeriesHandle,
    metric_http_req_failed: SeriesHandle,
    metric_checks: SeriesHandle,
    metric_data_received: SeriesHandle,
    metric_data_sent: SeriesHandle,
    metric_iterations: SeriesHandle,
    metric_iteration_duration: SeriesHandle,
    metric_scenario_errors: SeriesHandle,
}

impl Default for RunStats {
    fn default() -> Self {
        fn new_hist() -> Histogram<u64> {
            // Up to 60s in microseconds with 3 sigfigs; saturates beyond.
            Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
                .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
        }

        let metrics: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::default());
        let metric_http_reqs = metrics.handle(MetricKind::Counter, "http_reqs");
        let metric_http_req_duration = metrics.handle(MetricKind::Trend, "http_req_duration");
        let metric_http_req_failed = metrics.handle(MetricKind::Rate, "http_req_failed");
        let metric_checks = metrics.handle(MetricKind::Rate, "checks");
        let metric_data_received = metrics.handle(MetricKind::Counter, "data_received");
        let metric_data_sent = metrics.handle(MetricKind::Counter, "data_sent");
        let metric_iterations = metrics.handle(MetricKind::Counter, "iterations");
        let metric_iteration_duration = metrics.handle(MetricKind::Trend, "iteration_duration");
        let metric_scenario_errors = metrics.handle(MetricKind::Counter, "scenario_errors");

        Self {
            requests_total: AtomicU64::new(0),
            failed_requests_total: AtomicU64::new(0),
            iterations_total: AtomicU64::new(0),
            scenario_errors_total: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            timeouts_total: AtomicU64::new(0),
            bytes_received_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),

            checks_by_name: DashMap::default(),
            failures_by_reason: DashMap::default(),

            latency_us: Mutex::new(new_hist()),
            latency_us_window: Mutex::new(new_hist()),
            rps_samples: Mutex::new(RpsAgg::default()),

            metrics,
            metric_http_reqs,
            metric_http_req_duration,
            metric_http_req_failed,
            metric_checks,
            metric_data_received,
            metric_data_sent,
            metric_iterations,
            metric_iteration_duration,
            metric_scenario_errors,
        }
    }
}

impl RunStats {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failed_requests_total(&self) -> u64 {
        self.failed_requests_total.load(Ordering::Relaxed)
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations_total.load(Ordering::Relaxed)
    }

    pub fn checks_failed_total(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_received_total(&self) -> u64 {
        self.bytes_received_total.load(Ordering::Relaxed)
    }

    pub fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent_total.load(Ordering::Relaxed)
    }

    /// Ingest one sample. Exactly one series per tag; counters are atomic,
    /// the only lock taken is the short per-histogram one.
    pub fn record_sample(&self, sample: &Sample) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match sample.outcome.status() {
            Some(200..=299) => {
                self.status_2xx.fetch_add(1, Ordering::Relaxed);
            }
            Some(400..=499) => {
                self.status_4xx.fetch_add(1, Ordering::Relaxed);
            }
            Some(500..=599) => {
                self.status_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if matches!(sample.outcome, super::sample::CallOutcome::Timeout) {
            self.timeouts_total.fetch_add(1, Ordering::Relaxed);
        }

        let failed = sample.failed();
        if failed {
            self.failed_requests_total.fetch_add(1, Ordering::Relaxed);
            self.bump_failure_reason(&sample.outcome.label());
        }

        self.record_latency(sample.latency);

        if sample.bytes_received != 0 {
            self.bytes_received_total
                .fetch_add(sample.bytes_received, Ordering::Relaxed);
            self.metric_data_received.add(sample.bytes_received as f64);
        }
        if sample.bytes_sent != 0 {
            self.bytes_sent_total
                .fetch_add(sample.bytes_sent, Ordering::Relaxed);
            self.metric_data_sent.add(sample.bytes_sent as f64);
        }

        let duration_ms = sample.latency.as_secs_f64() * 1000.0;
        let name_tag = [("name".to_string(), sample.tag.to_string())];
        let full_tags = [
            ("name".to_string(), sample.tag.to_string()),
            ("method".to_string(), sample.method.to_string()),
            ("outcome".to_string(), sample.outcome.label()),
        ];

        self.metric_http_reqs.add_with_tags(1.0, &full_tags);
        // Duration and failure rate keep only the endpoint tag so the
        // per-endpoint table stays one series per tag.
        self.metric_http_req_duration
            .add_with_tags(duration_ms, &name_tag);
        self.metric_http_req_failed
            .observe_with_tags(failed, &name_tag);
    }

    pub fn record_check(&self, name: &str, ok: bool) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.metric_checks.observe(ok);

        let counters = match self.checks_by_name.get(name) {
            Some(c) => c.clone(),
            None => self
                .checks_by_name
                .entry(Arc::from(name))
                .or_default()
                .clone(),
        };
        counters.total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_iteration(&self, elapsed: Duration) {
        self.iterations_total.fetch_add(1, Ordering::Relaxed);
        self.metric_iterations.add(1.0);
        self.metric_iteration_duration
            .add(elapsed.as_secs_f64() * 1000.0);
    }

    /// A scenario body failed outside any single call. Recorded, never fatal.
    pub fn record_scenario_error(&self) {
        self.scenario_errors_total.fetch_add(1, Ordering::Relaxed);
        self.metric_scenario_errors.add(1.0);
        self.record_check("scenario_error", false);
    }

    pub fn record_rps_sample(&self, rps_now: f64) {
        let mut agg = self
            .rps_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        agg.record(rps_now);
    }

    /// `(avg, stdev, max, stdev_pct)` over recorded per-tick RPS samples.
    pub fn req_per_sec_summary(&self) -> (f64, f64, f64, f64) {
        self.rps_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .summary()
    }

    fn bump_failure_reason(&self, reason: &str) {
        if let Some(counter) = self.failures_by_reason.get(reason) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.failures_by_reason
            .entry(Arc::from(reason))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros();
        if us == 0 {
            return;
        }
        let value = us.min(u64::MAX as u128) as u64;

        {
            let mut h = self
                .latency_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            h.saturating_record(value);
        }
        {
            let mut h = self
                .latency_us_window
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            h.saturating_record(value);
        }
    }

    /// Drain the windowed histogram: (p50, p90, p95, p99) in ms since the
    /// previous call. Feeds live progress only.
    pub fn take_latency_window_ms(
        &self,
    ) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
        let mut h = self
            .latency_us_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let out = if h.is_empty() {
            (None, None, None, None)
        } else {
            (
                Some(h.value_at_quantile(0.50) as f64 / 1000.0),
                Some(h.value_at_quantile(0.90) as f64 / 1000.0),
                Some(h.value_at_quantile(0.95) as f64 / 1000.0),
                Some(h.value_at_quantile(0.99) as f64 / 1000.0),
            )
        };

        h.reset();
        out
    }

    pub fn metrics_snapshot(&self) -> Vec<MetricSeriesSummary> {
        self.metrics.summarize()
    }

    pub fn summarize(&self, elapsed: Duration) -> RunSummary {
        let secs = elapsed.as_secs_f64().max(1e-9);

        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let failed_requests_total = self.failed_requests_total.load(Ordering::Relaxed);
        let error_rate = if requests_total == 0 {
            0.0
        } else {
            failed_requests_total as f64 / requests_total as f64
        };

        let checks = {
            let mut out: Vec<CheckSummary> = self
                .checks_by_name
                .iter()
                .map(|entry| CheckSummary {
                    name: entry.key().to_string(),
                    total: entry.value().total.load(Ordering::Relaxed),
                    failed: entry.value().failed.load(Ordering::Relaxed),
                })
                .collect();
            out.sort_by(|a, b| a.name.cmp(&b.name));
            out
        };

        let failures_by_reason = {
            let mut out: Vec<(String, u64)> = self
                .failures_by_reason
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect();
            out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            out
        };

        let latency = {
            let h = self
                .latency_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if h.is_empty() {
                None
            } else {
                let q = |quantile: f64| Some(h.value_at_quantile(quantile) as f64 / 1000.0);
                Some(LatencySummary {
                    count: h.len(),
                    min: Some(h.min() as f64 / 1000.0),
                    max: Some(h.max() as f64 / 1000.0),
                    mean: Some(h.mean() / 1000.0),
                    stdev: Some(h.stdev() / 1000.0),
                    p50: q(0.50),
                    p75: q(0.75),
                    p90: q(0.90),
                    p95: q(0.95),
                    p99: q(0.99),
                })
            }
        };

        let (req_per_sec_avg, req_per_sec_stdev, req_per_sec_max, req_per_sec_stdev_pct) = {
            let agg = self
                .rps_samples
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            agg.summary()
        };

        let metrics = self.metrics.summarize();
        let endpoints = endpoint_summaries(&metrics);

        RunSummary {
            requests_total,
            failed_requests_total,
            error_rate,
            iterations_total: self.iterations_total.load(Ordering::Relaxed),
            scenario_errors_total: self.scenario_errors_total.load(Ordering::Relaxed),
            checks_total: self.checks_total.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            checks,
            failures_by_reason,
            bytes_received_total: self.bytes_received_total.load(Ordering::Relaxed),
            bytes_sent_total: self.bytes_sent_total.load(Ordering::Relaxed),
            run_duration: elapsed,
            rps: (requests_total as f64) / secs,
            req_per_sec_avg,
            req_per_sec_stdev,
            req_per_sec_max,
            req_per_sec_stdev_pct,
            latency,
            endpoints,
            metrics,
        }
    }
}

/// Build the per-endpoint table from the tagged duration/failure series.
fn endpoint_summaries(metrics: &[MetricSeriesSummary]) -> Vec<EndpointSummary> {
    fn single_name_tag(s: &MetricSeriesSummary) -> Option<&str> {
        match s.tags.as_slice() {
            [(k, v)] if k == "name" => Some(v.as_str()),
            _ => None,
        }
    }

    let mut out: Vec<EndpointSummary> = Vec::new();

    for s in metrics.iter().filter(|s| s.name == "http_req_failed") {
        let Some(tag) = single_name_tag(s) else {
            continue;
        };
        let MetricValues::Rate { total, trues, rate } = &s.values else {
            continue;
        };

        let latency = metrics
            .iter()
            .filter(|m| m.name == "http_req_duration")
            .find(|m| single_name_tag(m) == Some(tag))
            .and_then(|m| match &m.values {
                MetricValues::Trend {
                    count,
                    min,
                    max,
                    avg,
                    p50,
                    p75,
                    p90,
                    p95,
                    p99,
                } => Some(LatencySummary {
                    count: *count,
                    min: *min,
                    max: *max,
                    mean: *avg,
                    stdev: None,
                    p50: *p50,
                    p75: *p75,
                    p90: *p90,
                    p95: *p95,
                    p99: *p99,
                }),
                _ => None,
            });

        out.push(EndpointSummary {
            tag: tag.to_string(),
            requests: *total,
            failed: *trues,
            error_rate: rate.unwrap_or(0.0),
            latency,
        });
    }

    out.sort_by(|a, b| a.tag.cmp(&b.tag));
    out
}
