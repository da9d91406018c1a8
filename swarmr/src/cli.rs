use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use swarmr_core::Stage;

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 2m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 2m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 2m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 2m)"
        )),
    }
}

/// `TARGET:DURATION`, e.g. `10:30s` ramps the VU target to 10 over 30s.
pub fn parse_stage(input: &str) -> Result<Stage, String> {
    let (target_str, duration_str) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected TARGET:DURATION, e.g. 10:30s)"))?;

    let target: u64 = target_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid stage target '{target_str}' in '{input}'"))?;
    let duration = parse_duration(duration_str)?;

    Ok(Stage { target, duration })
}

/// `METRIC:EXPR`, e.g. `http_req_duration:p(95)<1200`. Validation of the
/// expression itself happens during plan assembly.
pub fn parse_threshold_arg(input: &str) -> Result<(String, String), String> {
    let (metric, expr) = input.split_once(':').ok_or_else(|| {
        format!("invalid threshold '{input}' (expected METRIC:EXPR, e.g. http_req_failed:rate<0.01)")
    })?;
    if metric.trim().is_empty() || expr.trim().is_empty() {
        return Err(format!("invalid threshold '{input}'"));
    }
    Ok((metric.trim().to_string(), expr.trim().to_string()))
}

pub fn parse_env_override(input: &str) -> Result<(String, String), String> {
    let (k, v) = input
        .split_once('=')
        .ok_or_else(|| format!("invalid --env (expected KEY=VALUE): {input}"))?;
    if k.is_empty() {
        return Err(format!("invalid --env (empty KEY): {input}"));
    }
    Ok((k.to_string(), v.to_string()))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary with a live progress bar.
    HumanReadable,
    /// JSON progress and summary lines (NDJSON) on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "swarmr",
    author,
    version,
    about = "Synthetic load generator for HTTP services",
    long_about = "swarmr drives built-in scenarios against an HTTP target with a pool of virtual users, aggregates latency/error metrics, and verdicts the run against declared thresholds.\n\nBy default environment variables of the current process are visible to scenarios; use --env KEY=VALUE to add or override values.",
    after_help = "Examples:\n  swarmr run storefront-browse --base-url http://localhost:8080\n  swarmr run checkout --vus 5 --duration 3m --env PRODUCT_ID=1\n  swarmr run media-upload --stage 3:30s --stage 3:60s --stage 0:30s\n  swarmr run storefront-browse --threshold 'http_req_duration:p(95)<1200' --abort-on-breach"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load scenario against a target
    #[command(
        long_about = "Run one built-in scenario. CLI flags override the scenario's default plan (VUs, duration, thresholds)."
    )]
    Run(RunArgs),

    /// List the built-in scenarios and their default plans
    List,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scenario name (see `swarmr list`)
    pub scenario: String,

    /// Base URL of the target service
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Number of virtual users (constant shape)
    #[arg(long)]
    pub vus: Option<u64>,

    /// Run duration (e.g. 30s, 2m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Total iteration budget shared by all VUs
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Ramp stage TARGET:DURATION (repeatable; replaces --vus/--duration)
    #[arg(long = "stage", value_name = "TARGET:DURATION", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Threshold METRIC:EXPR (repeatable; replaces the scenario defaults)
    #[arg(long = "threshold", value_name = "METRIC:EXPR", value_parser = parse_threshold_arg)]
    pub thresholds: Vec<(String, String)>,

    /// Add/override env vars visible to the scenario (repeatable, KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_override)]
    pub env: Vec<(String, String)>,

    /// Per-request timeout (e.g. 5s)
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Stop the run early when a threshold is breached (default: report-only)
    #[arg(long)]
    pub abort_on_breach: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
