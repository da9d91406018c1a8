use std::io::Write as _;
use std::sync::Arc;

use serde::Serialize;

use swarmr_core::{ProgressFn, ProgressUpdate, RunPhase, RunPlan, RunReport};

use super::OutputFormatter;

/// Newline-delimited JSON on stdout: one `progress` line per tick, one
/// `summary` line at the end. Nothing else is printed, so the stream is
/// machine-consumable as-is.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, scenario: &str, plan: &RunPlan) {
        emit_json_line(&JsonHeaderLine {
            kind: "header",
            scenario,
            base_url: plan.base_url.as_str(),
            vus: plan.vus,
            duration_secs: plan.duration.as_secs_f64(),
            iterations: plan.iterations,
            stages: plan
                .stages
                .iter()
                .map(|s| JsonStage {
                    target: s.target,
                    duration_secs: s.duration.as_secs_f64(),
                })
                .collect(),
            thresholds: plan
                .thresholds
                .iter()
                .map(|t| format!("{}:{}", t.metric, t.expr))
                .collect(),
        });
    }

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(|u| {
            emit_json_line(&JsonProgressLine::from_update(&u));
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine::from_report(report));
        Ok(())
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if serde_json::to_writer(&mut handle, line).is_ok() {
        handle.write_all(b"\n").ok();
    }
}

fn phase_name(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "idle",
        RunPhase::Ramping { .. } => "ramping",
        RunPhase::Draining => "draining",
        RunPhase::Completed => "completed",
    }
}

#[derive(Serialize)]
struct JsonStage {
    target: u64,
    duration_secs: f64,
}

#[derive(Serialize)]
struct JsonHeaderLine<'a> {
    kind: &'static str,
    scenario: &'a str,
    base_url: &'a str,
    vus: u64,
    duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stages: Vec<JsonStage>,
    thresholds: Vec<String>,
}

#[derive(Serialize)]
struct JsonProgressLine {
    kind: &'static str,
    tick: u64,
    elapsed_secs: f64,
    phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<usize>,
    vus_target: u64,
    rps_now: f64,
    iterations_per_sec_now: f64,
    error_rate_now: f64,
    requests_total: u64,
    failed_requests_total: u64,
    checks_failed_total: u64,
    iterations_total: u64,
    bytes_received_total: u64,
    bytes_sent_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_p50_ms_now: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_p95_ms_now: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_p99_ms_now: Option<f64>,
    threshold_breaches: usize,
}

impl JsonProgressLine {
    fn from_update(u: &ProgressUpdate) -> Self {
        Self {
            kind: "progress",
            tick: u.tick,
            elapsed_secs: u.elapsed.as_secs_f64(),
            phase: phase_name(u.phase),
            stage: match u.phase {
                RunPhase::Ramping { stage, .. } => Some(stage),
                _ => None,
            },
            vus_target: u.vus_target,
            rps_now: u.metrics.rps_now,
            iterations_per_sec_now: u.metrics.iterations_per_sec_now,
            error_rate_now: u.metrics.error_rate_now,
            requests_total: u.metrics.requests_total,
            failed_requests_total: u.metrics.failed_requests_total,
            checks_failed_total: u.metrics.checks_failed_total,
            iterations_total: u.metrics.iterations_total,
            bytes_received_total: u.metrics.bytes_received_total,
            bytes_sent_total: u.metrics.bytes_sent_total,
            latency_p50_ms_now: u.metrics.latency_p50_ms_now,
            latency_p95_ms_now: u.metrics.latency_p95_ms_now,
            latency_p99_ms_now: u.metrics.latency_p99_ms_now,
            threshold_breaches: u.violations.len(),
        }
    }
}

#[derive(Serialize)]
struct JsonLatency {
    count: u64,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
    mean_ms: Option<f64>,
    p50_ms: Option<f64>,
    p90_ms: Option<f64>,
    p95_ms: Option<f64>,
    p99_ms: Option<f64>,
}

#[derive(Serialize)]
struct JsonCheck {
    name: String,
    total: u64,
    failed: u64,
}

#[derive(Serialize)]
struct JsonEndpoint {
    tag: String,
    requests: u64,
    failed: u64,
    error_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<JsonLatency>,
}

#[derive(Serialize)]
struct JsonThresholdResult {
    metric: String,
    expression: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed: Option<f64>,
}

#[derive(Serialize)]
struct JsonSummaryLine {
    kind: &'static str,
    duration_secs: f64,
    requests_total: u64,
    failed_requests_total: u64,
    error_rate: f64,
    iterations_total: u64,
    scenario_errors_total: u64,
    checks_total: u64,
    checks_failed: u64,
    checks: Vec<JsonCheck>,
    failures_by_reason: Vec<(String, u64)>,
    bytes_received_total: u64,
    bytes_sent_total: u64,
    rps: f64,
    req_per_sec_avg: f64,
    req_per_sec_max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<JsonLatency>,
    endpoints: Vec<JsonEndpoint>,
    thresholds_failed: Vec<JsonThresholdResult>,
    aborted_on_breach: bool,
    passed: bool,
}

impl JsonSummaryLine {
    fn from_report(report: &RunReport) -> Self {
        let summary = &report.summary;

        let to_latency = |l: &swarmr_core::LatencySummary| JsonLatency {
            count: l.count,
            min_ms: l.min,
            max_ms: l.max,
            mean_ms: l.mean,
            p50_ms: l.p50,
            p90_ms: l.p90,
            p95_ms: l.p95,
            p99_ms: l.p99,
        };

        Self {
            kind: "summary",
            duration_secs: summary.run_duration.as_secs_f64(),
            requests_total: summary.requests_total,
            failed_requests_total: summary.failed_requests_total,
            error_rate: summary.error_rate,
            iterations_total: summary.iterations_total,
            scenario_errors_total: summary.scenario_errors_total,
            checks_total: summary.checks_total,
            checks_failed: summary.checks_failed,
            checks: summary
                .checks
                .iter()
                .map(|c| JsonCheck {
                    name: c.name.clone(),
                    total: c.total,
                    failed: c.failed,
                })
                .collect(),
            failures_by_reason: summary.failures_by_reason.clone(),
            bytes_received_total: summary.bytes_received_total,
            bytes_sent_total: summary.bytes_sent_total,
            rps: summary.rps,
            req_per_sec_avg: summary.req_per_sec_avg,
            req_per_sec_max: summary.req_per_sec_max,
            latency: summary.latency.as_ref().map(to_latency),
            endpoints: summary
                .endpoints
                .iter()
                .map(|e| JsonEndpoint {
                    tag: e.tag.clone(),
                    requests: e.requests,
                    failed: e.failed,
                    error_rate: e.error_rate,
                    latency: e.latency.as_ref().map(to_latency),
                })
                .collect(),
            thresholds_failed: report
                .violations
                .iter()
                .map(|v| JsonThresholdResult {
                    metric: v.metric.clone(),
                    expression: v.expression.clone(),
                    passed: false,
                    observed: v.observed,
                })
                .collect(),
            aborted_on_breach: report.aborted_on_breach,
            passed: report.passed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use swarmr_core::{LiveMetrics, RunSummary, ThresholdViolation};

    fn empty_summary() -> RunSummary {
        RunSummary {
            requests_total: 0,
            failed_requests_total: 0,
            error_rate: 0.0,
            iterations_total: 0,
            scenario_errors_total: 0,
            checks_total: 0,
            checks_failed: 0,
            checks: Vec::new(),
            failures_by_reason: Vec::new(),
            bytes_received_total: 0,
            bytes_sent_total: 0,
            run_duration: Duration::from_secs(1),
            rps: 0.0,
            req_per_sec_avg: 0.0,
            req_per_sec_stdev: 0.0,
            req_per_sec_max: 0.0,
            req_per_sec_stdev_pct: 0.0,
            latency: None,
            endpoints: Vec::new(),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn summary_line_reports_breaches_and_verdict() {
        let report = RunReport {
            summary: empty_summary(),
            violations: vec![ThresholdViolation {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.02".to_string(),
                observed: Some(0.05),
            }],
            aborted_on_breach: true,
        };

        let line = JsonSummaryLine::from_report(&report);
        let value = serde_json::to_value(&line).unwrap_or_else(|e| panic!("serialize: {e}"));

        assert_eq!(value["kind"], "summary");
        assert_eq!(value["passed"], false);
        assert_eq!(value["aborted_on_breach"], true);
        assert_eq!(value["thresholds_failed"][0]["metric"], "http_req_failed");
        assert_eq!(value["thresholds_failed"][0]["observed"], 0.05);
    }

    #[test]
    fn progress_line_skips_absent_latency() {
        let update = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            total_duration: Duration::from_secs(60),
            phase: RunPhase::Ramping { stage: 1, stages: 2 },
            vus_target: 4,
            max_vus: 10,
            stage: None,
            metrics: LiveMetrics::default(),
            violations: Vec::new(),
        };

        let line = JsonProgressLine::from_update(&update);
        let value = serde_json::to_value(&line).unwrap_or_else(|e| panic!("serialize: {e}"));

        assert_eq!(value["kind"], "progress");
        assert_eq!(value["phase"], "ramping");
        assert_eq!(value["stage"], 1);
        assert!(value.get("latency_p95_ms_now").is_none());
    }
}
