use std::collections::HashMap;
use std::fmt;

use url::Url;

use swarmr_core::{RunPlan, Threshold, run_plan};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::{output, scenarios};

#[derive(Debug)]
pub enum RunError {
    /// Bad plan or unknown scenario; the run never started.
    Invalid(String),
    /// Startup or I/O failure after the arguments themselves were fine.
    Runtime(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(msg) | Self::Runtime(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RunError {}

impl RunError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Invalid(_) => ExitCode::InvalidInput,
            Self::Runtime(_) => ExitCode::RuntimeError,
        }
    }
}

impl From<swarmr_core::Error> for RunError {
    fn from(err: swarmr_core::Error) -> Self {
        match &err {
            swarmr_core::Error::Io(_)
            | swarmr_core::Error::Join(_)
            | swarmr_core::Error::BaseUrlUnreachable { .. } => Self::Runtime(err.to_string()),
            _ => Self::Invalid(err.to_string()),
        }
    }
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let entry = scenarios::by_name(&args.scenario).ok_or_else(|| {
        RunError::Invalid(format!(
            "unknown scenario '{}' (see `swarmr list`)",
            args.scenario
        ))
    })?;

    let plan = build_plan(entry, &args)?;
    let out = output::formatter(args.output);
    out.print_header(entry.name, &plan);

    let report = run_plan(plan, (entry.build)(), out.progress()).await?;

    out.print_summary(&report)
        .map_err(|err| RunError::Runtime(format!("writing summary: {err}")))?;

    if !report.violations.is_empty() {
        eprintln!("thresholds_failed: {}", report.violations.len());
        for violation in &report.violations {
            eprintln!("  {violation}");
        }
    }

    Ok(ExitCode::from_quality_gates(
        report.summary.checks_failed > 0,
        !report.violations.is_empty(),
    ))
}

fn build_plan(entry: &scenarios::ScenarioEntry, args: &RunArgs) -> Result<RunPlan, RunError> {
    let base_url = Url::parse(&args.base_url)
        .map_err(|err| RunError::Invalid(format!("invalid base url '{}': {err}", args.base_url)))?;

    let mut plan = RunPlan::new(base_url)
        .with_vus(args.vus.unwrap_or(entry.default_vus))
        .with_duration(args.duration.unwrap_or(entry.default_duration))
        .with_thresholds(resolve_thresholds(entry, args)?)
        .with_env(resolve_env(args))
        .with_abort_on_breach(args.abort_on_breach);

    if let Some(iterations) = args.iterations {
        plan = plan.with_iterations(iterations);
    }
    if !args.stages.is_empty() {
        plan = plan.with_stages(args.stages.clone());
    }
    if let Some(timeout) = args.request_timeout {
        plan = plan.with_request_timeout(timeout);
    }

    plan.validate().map_err(RunError::from)?;
    Ok(plan)
}

/// CLI thresholds replace the scenario defaults wholesale; mixing the two
/// would make a passing default invisible behind a stricter override.
fn resolve_thresholds(
    entry: &scenarios::ScenarioEntry,
    args: &RunArgs,
) -> Result<Vec<Threshold>, RunError> {
    if args.thresholds.is_empty() {
        return entry
            .default_thresholds
            .iter()
            .map(|(metric, expr)| Threshold::new(*metric, expr).map_err(RunError::from))
            .collect();
    }

    args.thresholds
        .iter()
        .map(|(metric, expr)| Threshold::new(metric.as_str(), expr).map_err(RunError::from))
        .collect()
}

/// The process environment seeds the scenario environment; `--env` entries
/// win on conflict.
fn resolve_env(args: &RunArgs) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = swarmr_core::process_env_snapshot()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in &args.env {
        env.insert(key.clone(), value.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cli::OutputFormat;

    fn args(scenario: &str) -> RunArgs {
        RunArgs {
            scenario: scenario.to_string(),
            base_url: "http://localhost:8080".to_string(),
            vus: None,
            duration: None,
            iterations: None,
            stages: Vec::new(),
            thresholds: Vec::new(),
            env: Vec::new(),
            request_timeout: None,
            abort_on_breach: false,
            output: OutputFormat::HumanReadable,
        }
    }

    fn entry(name: &str) -> &'static scenarios::ScenarioEntry {
        scenarios::by_name(name).unwrap_or_else(|| panic!("missing scenario {name}"))
    }

    #[test]
    fn defaults_come_from_the_catalog() {
        let plan = build_plan(entry("checkout"), &args("checkout"))
            .unwrap_or_else(|e| panic!("build_plan: {e}"));

        assert_eq!(plan.vus, 5);
        assert_eq!(plan.duration, Duration::from_secs(180));
        assert_eq!(plan.thresholds.len(), 3);
        assert!(!plan.abort_on_breach);
    }

    #[test]
    fn cli_thresholds_replace_defaults() {
        let mut a = args("checkout");
        a.thresholds = vec![("http_req_failed".to_string(), "rate<0.5".to_string())];

        let plan =
            build_plan(entry("checkout"), &a).unwrap_or_else(|e| panic!("build_plan: {e}"));
        assert_eq!(plan.thresholds.len(), 1);
        assert_eq!(plan.thresholds[0].metric, "http_req_failed");
    }

    #[test]
    fn env_overrides_win_over_process_env() {
        let mut a = args("checkout");
        a.env = vec![("PRODUCT_ID".to_string(), "42".to_string())];

        let plan =
            build_plan(entry("checkout"), &a).unwrap_or_else(|e| panic!("build_plan: {e}"));
        assert_eq!(plan.env.get("PRODUCT_ID").map(String::as_str), Some("42"));
    }

    #[test]
    fn bad_threshold_expression_is_invalid_input() {
        let mut a = args("checkout");
        a.thresholds = vec![("http_req_duration".to_string(), "p(42)<100".to_string())];

        match build_plan(entry("checkout"), &a) {
            Err(err) => assert!(matches!(err.exit_code(), ExitCode::InvalidInput)),
            Ok(_) => panic!("expected an error for an unsupported percentile"),
        }
    }

    #[test]
    fn bad_base_url_is_invalid_input() {
        let mut a = args("checkout");
        a.base_url = "not a url".to_string();

        match build_plan(entry("checkout"), &a) {
            Err(err) => assert!(matches!(err.exit_code(), ExitCode::InvalidInput)),
            Ok(_) => panic!("expected an error for a malformed base url"),
        }
    }
}
