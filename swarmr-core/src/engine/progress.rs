use std::time::Duration;

use super::controller::RunPhase;
use super::schedule::StageSnapshot;
use super::thresholds::ThresholdViolation;

/// Rolling metrics attached to one progress tick. `*_now` values cover the
/// last tick interval only; totals cover the run so far.
#[derive(Debug, Clone, Default)]
pub struct LiveMetrics {
    pub rps_now: f64,
    pub bytes_received_per_sec_now: u64,
    pub bytes_sent_per_sec_now: u64,

    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub iterations_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,

    pub iterations_per_sec_now: f64,
    /// Failed / total requests during the last tick (0..=1).
    pub error_rate_now: f64,

    pub req_per_sec_avg: f64,
    pub req_per_sec_max: f64,

    /// Latency percentiles over the last tick window, milliseconds.
    pub latency_p50_ms_now: Option<f64>,
    pub latency_p90_ms_now: Option<f64>,
    pub latency_p95_ms_now: Option<f64>,
    pub latency_p99_ms_now: Option<f64>,
}

/// One periodic emission from the run loop, roughly once per second.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based tick counter.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub phase: RunPhase,
    /// Target concurrency right now.
    pub vus_target: u64,
    pub max_vus: u64,
    /// Present for staged runs only.
    pub stage: Option<StageSnapshot>,
    pub metrics: LiveMetrics,
    /// Thresholds currently out of bounds; advisory unless the plan aborts
    /// on breach.
    pub violations: Vec<ThresholdViolation>,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
