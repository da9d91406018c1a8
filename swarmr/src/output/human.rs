use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use swarmr_core::{
    LatencySummary, ProgressFn, RunPhase, RunPlan, RunReport, RunSummary,
};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            bar: Arc::new(Mutex::new(None)),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario: &str, plan: &RunPlan) {
        println!("scenario: {scenario}");
        println!("target:   {}", plan.base_url);
        if plan.stages.is_empty() {
            match plan.iterations {
                Some(iterations) => println!(
                    "plan:     vus={} iterations={} (max {})",
                    plan.vus,
                    iterations,
                    humantime::format_duration(plan.duration)
                ),
                None => println!(
                    "plan:     vus={} duration={}",
                    plan.vus,
                    humantime::format_duration(plan.duration)
                ),
            }
        } else {
            let ramp: Vec<String> = plan
                .stages
                .iter()
                .map(|s| format!("{}:{}", s.target, humantime::format_duration(s.duration)))
                .collect();
            println!("plan:     stages {}", ramp.join(" -> "));
        }
        for t in &plan.thresholds {
            println!("gate:     {}:{}", t.metric, t.expr);
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let bar_slot = self.bar.clone();

        Some(Arc::new(move |u| {
            let mut slot = bar_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let bar = slot.get_or_insert_with(|| {
                let bar = ProgressBar::with_draw_target(
                    Some(u.total_duration.as_millis() as u64),
                    ProgressDrawTarget::stderr_with_hz(5),
                );
                if let Ok(style) =
                    ProgressStyle::with_template("{bar:30.cyan/dim} {percent:>3}% {msg}")
                {
                    bar.set_style(style);
                }
                bar
            });

            let phase = match u.phase {
                RunPhase::Idle => "idle",
                RunPhase::Ramping { .. } => "running",
                RunPhase::Draining => "draining",
                RunPhase::Completed => "done",
            };
            let stage = match (&u.stage, u.phase) {
                (Some(s), RunPhase::Ramping { .. }) => {
                    format!(" stage={}/{}", s.index + 1, s.count)
                }
                _ => String::new(),
            };
            let p95 = u
                .metrics
                .latency_p95_ms_now
                .map(|v| format!("{v:.0}ms"))
                .unwrap_or_else(|| "-".to_string());

            bar.set_position((u.elapsed.as_millis() as u64).min(u.total_duration.as_millis() as u64));
            bar.set_message(format!(
                "{phase}{stage} vus={} rps={:.0} p95={} errors={:.1}% breaches={}",
                u.vus_target,
                u.metrics.rps_now,
                p95,
                u.metrics.error_rate_now * 100.0,
                u.violations.len()
            ));
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        {
            let mut slot = self
                .bar
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }

        print!("{}", render(report));
        Ok(())
    }
}

fn render(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        out,
        "  duration: {}",
        format_duration_secs(summary.run_duration)
    )
    .ok();
    writeln!(
        out,
        "  requests: {} (failed {}, error rate {:.2}%)",
        summary.requests_total,
        summary.failed_requests_total,
        summary.error_rate * 100.0
    )
    .ok();
    writeln!(out, "  iterations: {}", summary.iterations_total).ok();
    writeln!(
        out,
        "  bytes: recv {} sent {}",
        format_bytes(summary.bytes_received_total),
        format_bytes(summary.bytes_sent_total)
    )
    .ok();
    writeln!(
        out,
        "  rps: {:.1} (avg {:.1}, max {:.1})",
        summary.rps, summary.req_per_sec_avg, summary.req_per_sec_max
    )
    .ok();

    match &summary.latency {
        Some(latency) => {
            writeln!(out, "  latency: {}", format_latency(latency)).ok();
        }
        None => out.push_str("  latency: n/a\n"),
    }

    if summary.scenario_errors_total > 0 {
        writeln!(out, "  scenario errors: {}", summary.scenario_errors_total).ok();
    }

    if !summary.failures_by_reason.is_empty() {
        out.push_str("\nfailures\n");
        for (reason, count) in &summary.failures_by_reason {
            writeln!(out, "  {reason}: {count}").ok();
        }
    }

    if !summary.checks.is_empty() {
        out.push_str("\nchecks\n");
        for check in &summary.checks {
            let mark = if check.failed == 0 { "ok  " } else { "FAIL" };
            writeln!(
                out,
                "  {mark} {} ({}/{})",
                check.name,
                check.total - check.failed,
                check.total
            )
            .ok();
        }
    }

    if !summary.endpoints.is_empty() {
        out.push_str("\nendpoints\n");
        for endpoint in &summary.endpoints {
            let p95 = endpoint
                .latency
                .as_ref()
                .and_then(|l| l.p95)
                .map(|v| format!("{v:.0}ms"))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "  {}: requests={} failed={} ({:.2}%) p95={}",
                endpoint.tag,
                endpoint.requests,
                endpoint.failed,
                endpoint.error_rate * 100.0,
                p95
            )
            .ok();
        }
    }

    out.push('\n');
    out.push_str(&render_verdict(report, summary));
    out
}

fn render_verdict(report: &RunReport, summary: &RunSummary) -> String {
    let mut out = String::new();

    if report.aborted_on_breach {
        out.push_str("run aborted early: threshold breached\n");
    }

    if report.violations.is_empty() {
        if summary.checks_failed > 0 {
            writeln!(out, "thresholds: ok, but {} checks failed", summary.checks_failed).ok();
        } else {
            out.push_str("thresholds: ok\n");
        }
        return out;
    }

    writeln!(out, "thresholds: {} breached", report.violations.len()).ok();
    for violation in &report.violations {
        writeln!(out, "  FAIL {violation}").ok();
    }
    out
}

fn format_latency(latency: &LatencySummary) -> String {
    fn ms(v: Option<f64>) -> String {
        v.map(|v| format!("{v:.1}ms")).unwrap_or_else(|| "-".to_string())
    }

    format!(
        "p50={} p90={} p95={} p99={} mean={} max={} (n={})",
        ms(latency.p50),
        ms(latency.p90),
        ms(latency.p95),
        ms(latency.p99),
        ms(latency.mean),
        ms(latency.max),
        latency.count
    )
}

fn format_duration_secs(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MiB");
    }

    #[test]
    fn render_marks_failed_checks_and_thresholds() {
        let report = RunReport {
            summary: RunSummary {
                requests_total: 100,
                failed_requests_total: 3,
                error_rate: 0.03,
                iterations_total: 50,
                scenario_errors_total: 0,
                checks_total: 100,
                checks_failed: 3,
                checks: vec![swarmr_core::CheckSummary {
                    name: "products status is 200".to_string(),
                    total: 100,
                    failed: 3,
                }],
                failures_by_reason: vec![("500".to_string(), 3)],
                bytes_received_total: 4096,
                bytes_sent_total: 1024,
                run_duration: Duration::from_secs(10),
                rps: 10.0,
                req_per_sec_avg: 10.0,
                req_per_sec_stdev: 0.0,
                req_per_sec_max: 12.0,
                req_per_sec_stdev_pct: 0.0,
                latency: None,
                endpoints: Vec::new(),
                metrics: Vec::new(),
            },
            violations: vec![swarmr_core::ThresholdViolation {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.02".to_string(),
                observed: Some(0.03),
            }],
            aborted_on_breach: false,
        };

        let text = render(&report);
        assert!(text.contains("FAIL products status is 200"));
        assert!(text.contains("thresholds: 1 breached"));
        assert!(text.contains("http_req_failed"));
    }
}
